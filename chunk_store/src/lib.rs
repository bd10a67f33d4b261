//! The write-sink boundary to the long-term wide-column store.
//!
//! The batch driver hands finished chunk sets to a [`StoreSink`] and
//! treats the response as authoritative: transient retries are the
//! sink's concern, and any error that comes back is terminal for the
//! batch.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use async_trait::async_trait;
use data_types::{ChunkSet, DatasetRef};
use std::{
    fmt::{Debug, Display, Formatter},
    time::Duration,
};

pub mod mock;

pub use mock::MockStoreSink;

/// Generic boxed error type for sink implementations.
///
/// The dynamic boxing makes it easier to deal with errors from
/// different store drivers.
#[derive(Debug)]
pub struct StoreError {
    inner: Box<dyn std::error::Error + Sync + Send>,
    kind: StoreErrorKind,
}

impl StoreError {
    /// Wrap an error of the given kind.
    pub fn new(
        kind: StoreErrorKind,
        e: impl Into<Box<dyn std::error::Error + Sync + Send>>,
    ) -> Self {
        Self {
            inner: e.into(),
            kind,
        }
    }

    /// The store rejected the write.
    pub fn write_rejected(e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self::new(StoreErrorKind::WriteRejected, e)
    }

    /// A fatal IO error talking to the store.
    pub fn io(e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self::new(StoreErrorKind::Io, e)
    }

    /// Returns the kind of error this was.
    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    /// Returns the inner error.
    pub fn inner(&self) -> &dyn std::error::Error {
        self.inner.as_ref()
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "StoreError({:?}): {}", self.kind, self.inner)
    }
}

impl std::error::Error for StoreError {}

/// Classification of sink errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The store acknowledged the request with an error response.
    WriteRejected,

    /// A fatal IO error occurred - non-fatal errors should be retried
    /// by the sink internally.
    Io,

    /// This operation failed for an unknown reason.
    Unknown,
}

/// Writes chunk sets to a dataset in the long-term store.
///
/// Implementations must be atomic at chunk-set granularity and honor
/// the TTL per row. The shared store client behind an implementation is
/// expected to be thread-safe.
#[async_trait]
pub trait StoreSink: Send + Sync + Debug {
    /// Write `chunks` to `dataset` with the given per-row TTL,
    /// returning once the store has acknowledged the write.
    async fn write(
        &self,
        dataset: DatasetRef,
        chunks: Vec<ChunkSet>,
        ttl: Duration,
    ) -> Result<(), StoreError>;
}
