//! An in-memory [`StoreSink`] for tests.

use crate::{StoreError, StoreSink};
use async_trait::async_trait;
use data_types::{ChunkSet, DatasetRef};
use observability_deps::tracing::debug;
use parking_lot::Mutex;
use std::{collections::BTreeSet, time::Duration};

/// One recorded call to [`StoreSink::write`].
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    /// The target dataset.
    pub dataset: DatasetRef,
    /// The chunk sets written.
    pub chunks: Vec<ChunkSet>,
    /// The per-row TTL.
    pub ttl: Duration,
}

#[derive(Debug, Default)]
struct MockState {
    writes: Vec<RecordedWrite>,
    fail_datasets: BTreeSet<String>,
    delay: Option<Duration>,
}

/// Records writes and optionally fails or delays them.
#[derive(Debug, Default)]
pub struct MockStoreSink {
    state: Mutex<MockState>,
}

impl MockStoreSink {
    /// An empty mock that acknowledges every write.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes to `dataset` return an error response.
    pub fn fail_dataset(&self, dataset: &DatasetRef) {
        self.state
            .lock()
            .fail_datasets
            .insert(dataset.as_str().to_string());
    }

    /// Delay every write by `delay` before responding.
    pub fn delay_writes(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    /// All successfully recorded writes so far.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state.lock().writes.clone()
    }
}

#[async_trait]
impl StoreSink for MockStoreSink {
    async fn write(
        &self,
        dataset: DatasetRef,
        chunks: Vec<ChunkSet>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.fail_datasets.contains(dataset.as_str()) {
            return Err(StoreError::write_rejected(format!(
                "injected failure for {dataset}"
            )));
        }
        debug!(%dataset, chunk_sets = chunks.len(), "recording mock store write");
        state.writes.push(RecordedWrite {
            dataset,
            chunks,
            ttl,
        });
        Ok(())
    }
}
