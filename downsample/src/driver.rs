//! The batch driver: pages raw partitions, downsamples each into
//! per-resolution partitions, collects the flushable chunks, writes
//! them to the store, and tears the batch down.
//!
//! Per-partition problems are isolated: a partition that cannot be
//! paged or aggregated is logged and skipped, and the batch carries on.
//! Store-level problems are terminal. Whatever happens, the teardown
//! ordering at batch end is fixed: mark blocks reclaimable, free the
//! paged raw partitions, shut the downsample partitions down.

use crate::{
    config::DownsamplerConfig,
    paged::PagedRawPartition,
    partition::DownsamplePartition,
    window::WindowDownsampler,
};
use arena::ArenaMemory;
use chunk_store::{StoreError, StoreSink};
use data_types::{ChunkSet, DatasetRef, RawPartData, Resolution, SchemaId, TimeRange};
use futures::future;
use observability_deps::tracing::{debug, info, warn};
use schema::SchemaRegistry;
use snafu::{ResultExt, Snafu};
use std::{collections::BTreeMap, sync::Arc, time::Duration};

/// Terminal batch errors. Everything partition-scoped is handled (and
/// logged) inside the batch instead.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("store write to {dataset} failed: {source}"))]
    StoreWrite {
        dataset: DatasetRef,
        source: StoreError,
    },

    #[snafu(display("store write to {dataset} timed out after {timeout:?}"))]
    StoreWriteTimeout {
        dataset: DatasetRef,
        timeout: Duration,
    },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Counters for one completed (or aborted) batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    /// Raw partitions handed to the batch.
    pub partitions_seen: u64,
    /// Partitions fully downsampled.
    pub partitions_downsampled: u64,
    /// Partitions skipped (no schema, no downsample declaration,
    /// malformed data, or aggregation failure).
    pub partitions_skipped: u64,
    /// Aggregate rows ingested across all resolutions.
    pub rows_ingested: u64,
    /// Aggregate rows dropped for arriving out of order.
    pub rows_dropped: u64,
    /// Chunk sets handed to the store across all resolutions.
    pub chunk_sets_written: u64,
}

/// Downsamples batches of raw partitions and writes the results to
/// per-resolution datasets.
#[derive(Debug)]
pub struct BatchDownsampler {
    config: DownsamplerConfig,
    schemas: Arc<SchemaRegistry>,
    store: Arc<dyn StoreSink>,
}

impl BatchDownsampler {
    /// Create a driver writing through `store`.
    pub fn new(
        config: DownsamplerConfig,
        schemas: Arc<SchemaRegistry>,
        store: Arc<dyn StoreSink>,
    ) -> Self {
        Self {
            config,
            schemas,
            store,
        }
    }

    /// Downsample one batch over the user time window
    /// `[window.start, window.end]` and synchronously await the store
    /// acknowledgements. The arena is torn down on every exit path.
    pub async fn downsample_batch(
        &self,
        arena: &mut ArenaMemory,
        batch: Vec<RawPartData>,
        window: TimeRange,
    ) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        let mut per_res: BTreeMap<Resolution, Vec<ChunkSet>> =
            self.config.resolutions().map(|r| (r, vec![])).collect();
        let mut paged_frees: Vec<PagedRawPartition> = vec![];
        let mut ds_frees: Vec<DownsamplePartition> = vec![];

        for raw in &batch {
            summary.partitions_seen += 1;
            self.downsample_partition(
                arena,
                raw,
                window,
                &mut per_res,
                &mut paged_frees,
                &mut ds_frees,
                &mut summary,
            );
        }
        summary.chunk_sets_written = per_res.values().map(|c| c.len() as u64).sum();

        let result = self.persist(per_res).await;

        // teardown runs whether persist succeeded or not, and in this
        // order: blocks, then paged raw partitions, then downsample
        // partitions
        let reclaimed = arena.block_factory.mark_used_blocks_reclaimable();
        debug!(reclaimed, "marked batch blocks reclaimable");
        for paged in &mut paged_frees {
            paged.free(&mut arena.allocator);
        }
        for ds_part in &mut ds_frees {
            if let Some(pool) = arena.pool_for(ds_part.schema_id()) {
                ds_part.shutdown(pool);
            }
        }

        result.map(|_| summary)
    }

    /// Downsample one raw partition into `per_res`, recording what must
    /// be freed at batch end. Failures here skip the partition.
    #[allow(clippy::too_many_arguments)]
    fn downsample_partition(
        &self,
        arena: &mut ArenaMemory,
        raw: &RawPartData,
        window: TimeRange,
        per_res: &mut BTreeMap<Resolution, Vec<ChunkSet>>,
        paged_frees: &mut Vec<PagedRawPartition>,
        ds_frees: &mut Vec<DownsamplePartition>,
        summary: &mut BatchSummary,
    ) {
        let schema_id = match raw.partition_key().map(SchemaId::from_key) {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                warn!(error = %e, "skipping partition with malformed key");
                summary.partitions_skipped += 1;
                return;
            }
            Err(e) => {
                warn!(error = %e, "skipping malformed raw partition");
                summary.partitions_skipped += 1;
                return;
            }
        };

        let schema = match self.schemas.get(schema_id) {
            Some(schema) => Arc::clone(schema),
            None => {
                warn!(%schema_id, "skipping partition with unregistered schema");
                summary.partitions_skipped += 1;
                return;
            }
        };
        let ds_spec = match schema.downsample() {
            Some(ds_spec) => ds_spec,
            None => {
                warn!(%schema_id, schema = schema.name(), "schema has no downsample declaration");
                summary.partitions_skipped += 1;
                return;
            }
        };
        if arena.pool_for(schema_id).is_none() {
            warn!(%schema_id, "arena has no buffer pool for schema");
            summary.partitions_skipped += 1;
            return;
        }

        let paged = match PagedRawPartition::new(Arc::clone(&schema), raw, &mut arena.allocator) {
            Ok(paged) => paged,
            Err(e) => {
                warn!(error = %e, %schema_id, "skipping malformed raw partition");
                summary.partitions_skipped += 1;
                return;
            }
        };

        let mut outs = BTreeMap::new();
        if let Some(pool) = arena.pool_for(schema_id) {
            for resolution in self.config.resolutions() {
                outs.insert(
                    resolution,
                    DownsamplePartition::new(schema_id, paged.partition_key().clone(), pool),
                );
            }
        }

        let run = WindowDownsampler::new(&ds_spec.aggregators).run(
            &paged,
            &mut outs,
            &mut arena.block_factory,
            window,
        );
        paged_frees.push(paged);

        match run {
            Ok(()) => {
                summary.partitions_downsampled += 1;
                for (resolution, mut ds_part) in outs {
                    ds_part.switch_buffers();
                    let chunks = ds_part.make_flush_chunks(&mut arena.block_factory);
                    summary.rows_ingested += ds_part.rows_ingested();
                    summary.rows_dropped += ds_part.rows_dropped();
                    if let Some(collected) = per_res.get_mut(&resolution) {
                        collected.extend(chunks);
                    }
                    ds_frees.push(ds_part);
                }
            }
            Err(e) => {
                warn!(error = %e, %schema_id, "downsampling failed; skipping partition");
                summary.partitions_skipped += 1;
                // hand the buffers back now so the partition's blocks
                // are unreferenced by the time they are marked
                for (_, mut ds_part) in outs {
                    if let Some(pool) = arena.pool_for(schema_id) {
                        ds_part.shutdown(pool);
                    }
                }
            }
        }
    }

    /// Issue one store write per resolution, then await every
    /// acknowledgement. Any error or timeout aborts the batch.
    async fn persist(&self, mut per_res: BTreeMap<Resolution, Vec<ChunkSet>>) -> Result<()> {
        let timeout = self.config.store_write_timeout();
        let mut pending = vec![];
        for (resolution, ttl) in self.config.ttls() {
            let chunks = per_res.remove(&resolution).unwrap_or_default();
            if chunks.is_empty() {
                continue;
            }
            let dataset = self.config.dataset_for(resolution);
            info!(
                %dataset,
                chunk_sets = chunks.len(),
                ttl_secs = ttl.as_secs(),
                "writing downsampled chunks"
            );
            let store = Arc::clone(&self.store);
            pending.push(async move {
                let response =
                    tokio::time::timeout(timeout, store.write(dataset.clone(), chunks, ttl)).await;
                (dataset, response)
            });
        }

        for (dataset, response) in future::join_all(pending).await {
            match response {
                Err(_) => return StoreWriteTimeoutSnafu { dataset, timeout }.fail(),
                Ok(acked) => acked.context(StoreWriteSnafu { dataset })?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena::ArenaSizing;
    use assert_matches::assert_matches;
    use chunk_store::MockStoreSink;
    use data_types::{vector, Histogram, RawColumn, RawPartBuilder};
    use schema::{
        AggregatorSpec, ColumnSpec, ColumnType, DoubleAggKind, DownsampleSchema, DownsampleSpec,
        HistAggKind, RawSchema,
    };

    const SEC: i64 = 1_000;
    const MIN: i64 = 60 * SEC;
    const FIVE_PM: i64 = 17 * 60 * MIN;

    const GAUGE: SchemaId = SchemaId::new(1);
    const UNTRACKED: SchemaId = SchemaId::new(2);
    const LATENCY: SchemaId = SchemaId::new(3);

    fn registry() -> Arc<SchemaRegistry> {
        let gauge = RawSchema::new(
            GAUGE,
            "gauge",
            vec![
                ColumnSpec::new("timestamp", ColumnType::Timestamp),
                ColumnSpec::new("value", ColumnType::F64),
            ],
        )
        .unwrap()
        .with_downsample(DownsampleSpec {
            schema: DownsampleSchema::new(
                "gauge_ds",
                vec![
                    ColumnSpec::new("timestamp", ColumnType::Timestamp),
                    ColumnSpec::new("sum", ColumnType::F64),
                    ColumnSpec::new("max", ColumnType::F64),
                ],
                100,
            )
            .unwrap(),
            aggregators: vec![
                AggregatorSpec::Time { col: 0 },
                AggregatorSpec::Double {
                    kind: DoubleAggKind::Sum,
                    col: 1,
                },
                AggregatorSpec::Double {
                    kind: DoubleAggKind::Max,
                    col: 1,
                },
            ],
        })
        .unwrap();

        let untracked = RawSchema::new(
            UNTRACKED,
            "untracked",
            vec![
                ColumnSpec::new("timestamp", ColumnType::Timestamp),
                ColumnSpec::new("value", ColumnType::F64),
            ],
        )
        .unwrap();

        let latency = RawSchema::new(
            LATENCY,
            "latency",
            vec![
                ColumnSpec::new("timestamp", ColumnType::Timestamp),
                ColumnSpec::new("buckets", ColumnType::Histogram),
            ],
        )
        .unwrap()
        .with_downsample(DownsampleSpec {
            schema: DownsampleSchema::new(
                "latency_ds",
                vec![
                    ColumnSpec::new("timestamp", ColumnType::Timestamp),
                    ColumnSpec::new("buckets", ColumnType::Histogram),
                ],
                100,
            )
            .unwrap(),
            aggregators: vec![
                AggregatorSpec::Time { col: 0 },
                AggregatorSpec::Histogram {
                    kind: HistAggKind::Sum,
                    col: 1,
                },
            ],
        })
        .unwrap();

        Arc::new(SchemaRegistry::new([gauge, untracked, latency]).unwrap())
    }

    struct TestSetup {
        driver: BatchDownsampler,
        arena: ArenaMemory,
        sink: Arc<MockStoreSink>,
    }

    fn setup(store_write_timeout: Duration) -> TestSetup {
        test_helpers::maybe_start_logging();
        let registry = registry();
        let config = DownsamplerConfig::new(
            "prom",
            BTreeMap::from([
                (Resolution::from_minutes(5), Duration::from_secs(86_400)),
                (
                    Resolution::from_minutes(60),
                    Duration::from_secs(7 * 86_400),
                ),
            ]),
            store_write_timeout,
        )
        .unwrap();
        let arena = ArenaMemory::new(&registry, ArenaSizing::default());
        let sink = Arc::new(MockStoreSink::new());
        let driver =
            BatchDownsampler::new(config, registry, Arc::clone(&sink) as Arc<dyn StoreSink>);
        TestSetup {
            driver,
            arena,
            sink,
        }
    }

    fn gauge_part(key_fields: &[u8], timestamps: &[i64], values: &[f64]) -> RawPartData {
        RawPartBuilder::new(GAUGE, key_fields)
            .with_chunk(timestamps, &[RawColumn::F64(values.to_vec())])
            .unwrap()
            .build()
            .unwrap()
    }

    fn scenario_part() -> RawPartData {
        gauge_part(
            b"series-a",
            &[
                FIVE_PM - 4 * MIN - 59 * SEC,
                FIVE_PM - 3 * MIN - 30 * SEC,
                FIVE_PM - SEC,
                FIVE_PM,
            ],
            &[1.0, 2.0, 3.0, 4.0],
        )
    }

    fn window() -> TimeRange {
        TimeRange::new(16 * 60 * MIN, 18 * 60 * MIN)
    }

    fn rows(chunks: &[ChunkSet]) -> Vec<(i64, f64, f64)> {
        let mut rows = vec![];
        for chunk in chunks {
            for i in 0..chunk.num_rows as usize {
                rows.push((
                    vector::i64_at(&chunk.columns[0], i),
                    vector::f64_at(&chunk.columns[1], i),
                    vector::f64_at(&chunk.columns[2], i),
                ));
            }
        }
        rows
    }

    #[tokio::test]
    async fn writes_chunks_per_resolution_with_ttls() {
        let TestSetup {
            driver,
            mut arena,
            sink,
        } = setup(Duration::from_secs(5));

        let summary = driver
            .downsample_batch(&mut arena, vec![scenario_part()], window())
            .await
            .unwrap();

        assert_eq!(summary.partitions_seen, 1);
        assert_eq!(summary.partitions_downsampled, 1);
        assert_eq!(summary.partitions_skipped, 0);
        assert_eq!(summary.rows_ingested, 2);
        assert_eq!(summary.chunk_sets_written, 2);

        let writes = sink.writes();
        assert_eq!(writes.len(), 2);

        assert_eq!(writes[0].dataset, DatasetRef::new("prom_ds_5"));
        assert_eq!(writes[0].ttl, Duration::from_secs(86_400));
        assert_eq!(rows(&writes[0].chunks), vec![(FIVE_PM, 10.0, 4.0)]);

        assert_eq!(writes[1].dataset, DatasetRef::new("prom_ds_60"));
        assert_eq!(writes[1].ttl, Duration::from_secs(7 * 86_400));
        assert_eq!(rows(&writes[1].chunks), vec![(FIVE_PM, 10.0, 4.0)]);

        // every row of the batch carries the window start as its
        // ingestion time
        assert!(writes
            .iter()
            .flat_map(|w| &w.chunks)
            .all(|c| c.ingestion_time == window().start));

        assert_eq!(arena.allocator.outstanding(), 0);
        assert_eq!(arena.pool_for(GAUGE).unwrap().outstanding(), 0);
    }

    #[tokio::test]
    async fn store_error_aborts_the_batch_but_memory_is_reclaimed() {
        let TestSetup {
            driver,
            mut arena,
            sink,
        } = setup(Duration::from_secs(5));
        sink.fail_dataset(&DatasetRef::new("prom_ds_60"));

        let err = driver
            .downsample_batch(&mut arena, vec![scenario_part()], window())
            .await
            .unwrap_err();
        assert_matches!(err, Error::StoreWrite { dataset, .. } => {
            assert_eq!(dataset, DatasetRef::new("prom_ds_60"));
        });

        assert_eq!(arena.allocator.outstanding(), 0);
        assert_eq!(arena.pool_for(GAUGE).unwrap().outstanding(), 0);
    }

    #[tokio::test]
    async fn store_timeout_is_terminal() {
        let TestSetup {
            driver, mut arena, sink,
        } = setup(Duration::from_millis(20));
        sink.delay_writes(Duration::from_millis(200));

        let err = driver
            .downsample_batch(&mut arena, vec![scenario_part()], window())
            .await
            .unwrap_err();
        assert_matches!(err, Error::StoreWriteTimeout { .. });
        assert_eq!(arena.allocator.outstanding(), 0);
    }

    #[tokio::test]
    async fn partitions_without_downsample_declaration_are_skipped() {
        let TestSetup {
            driver,
            mut arena,
            sink,
        } = setup(Duration::from_secs(5));

        let untracked = RawPartBuilder::new(UNTRACKED, b"series-u")
            .with_chunk(&[FIVE_PM], &[RawColumn::F64(vec![9.0])])
            .unwrap()
            .build()
            .unwrap();

        let summary = driver
            .downsample_batch(&mut arena, vec![untracked, scenario_part()], window())
            .await
            .unwrap();

        assert_eq!(summary.partitions_seen, 2);
        assert_eq!(summary.partitions_downsampled, 1);
        assert_eq!(summary.partitions_skipped, 1);
        assert_eq!(rows(&sink.writes()[0].chunks), vec![(FIVE_PM, 10.0, 4.0)]);
    }

    #[tokio::test]
    async fn malformed_partitions_are_skipped() {
        let TestSetup {
            driver,
            mut arena,
            sink,
        } = setup(Duration::from_secs(5));

        let garbage = RawPartData::new(vec![0xff]);
        let unregistered = RawPartBuilder::new(SchemaId::new(9), b"series-x")
            .with_chunk(&[FIVE_PM], &[RawColumn::F64(vec![1.0])])
            .unwrap()
            .build()
            .unwrap();

        let summary = driver
            .downsample_batch(
                &mut arena,
                vec![garbage, unregistered, scenario_part()],
                window(),
            )
            .await
            .unwrap();

        assert_eq!(summary.partitions_seen, 3);
        assert_eq!(summary.partitions_skipped, 2);
        assert_eq!(summary.partitions_downsampled, 1);
        assert_eq!(sink.writes().len(), 2);
        assert_eq!(arena.allocator.outstanding(), 0);
    }

    #[tokio::test]
    async fn aggregation_failure_skips_only_that_partition() {
        let TestSetup {
            driver,
            mut arena,
            sink,
        } = setup(Duration::from_secs(5));

        // two histograms with different bucket schemes in one period
        let bad_latency = RawPartBuilder::new(LATENCY, b"series-l")
            .with_chunk(
                &[FIVE_PM - 2 * SEC, FIVE_PM - SEC],
                &[RawColumn::Histogram(vec![
                    Histogram::new(vec![1.0], vec![1]).unwrap(),
                    Histogram::new(vec![2.0], vec![1]).unwrap(),
                ])],
            )
            .unwrap()
            .build()
            .unwrap();

        let summary = driver
            .downsample_batch(&mut arena, vec![bad_latency, scenario_part()], window())
            .await
            .unwrap();

        assert_eq!(summary.partitions_skipped, 1);
        assert_eq!(summary.partitions_downsampled, 1);
        let writes = sink.writes();
        assert!(writes
            .iter()
            .flat_map(|w| &w.chunks)
            .all(|c| c.partition_key.schema_id().unwrap() == GAUGE));
        assert_eq!(arena.allocator.outstanding(), 0);
        assert_eq!(arena.pool_for(LATENCY).unwrap().outstanding(), 0);
    }

    #[tokio::test]
    async fn reruns_produce_byte_identical_chunks() {
        let TestSetup {
            driver,
            mut arena,
            sink,
        } = setup(Duration::from_secs(5));

        let batch = || {
            vec![
                scenario_part(),
                gauge_part(
                    b"series-b",
                    &[FIVE_PM + MIN, FIVE_PM + 2 * MIN],
                    &[5.0, 6.0],
                ),
            ]
        };

        driver
            .downsample_batch(&mut arena, batch(), window())
            .await
            .unwrap();
        driver
            .downsample_batch(&mut arena, batch(), window())
            .await
            .unwrap();

        let writes = sink.writes();
        assert_eq!(writes.len(), 4);
        let (first, second) = writes.split_at(2);
        for (a, b) in first.iter().zip(second) {
            assert_eq!(a.dataset, b.dataset);
            assert_eq!(a.chunks, b.chunks);
        }
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() {
        let TestSetup {
            driver,
            mut arena,
            sink,
        } = setup(Duration::from_secs(5));

        let summary = driver
            .downsample_batch(&mut arena, vec![], window())
            .await
            .unwrap();

        assert_eq!(summary, BatchSummary::default());
        assert!(sink.writes().is_empty());
    }
}
