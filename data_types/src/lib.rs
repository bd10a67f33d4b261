//! Shared data types for the batch downsampler: schema ids, partition
//! keys, resolutions, user time windows, and the canonical columnar
//! chunk representation.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use bytes::Bytes;
use snafu::Snafu;
use std::{fmt::Display, time::Duration};

pub mod chunk;
pub mod histogram;
pub mod raw;
pub mod vector;

pub use chunk::{BlockData, ChunkSet, ChunkVector};
pub use histogram::Histogram;
pub use raw::{RawColumn, RawPartBuilder, RawPartData};

/// Errors for the types in this module.
#[derive(Debug, Snafu)]
#[allow(missing_copy_implementations, missing_docs)]
pub enum Error {
    #[snafu(display("partition key of {len} bytes is too short to carry a schema id"))]
    KeyTooShort { len: usize },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Unique identifier of a registered raw schema, embedded little-endian
/// as the first four bytes of every partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaId(u32);

impl SchemaId {
    /// The number of key bytes occupied by the schema id prefix.
    pub const PREFIX_LEN: usize = 4;

    /// Construct a schema id from its numeric value.
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    /// The numeric value of this schema id.
    pub fn get(&self) -> u32 {
        self.0
    }

    /// Extract the schema id prefix from a partition key.
    pub fn from_key(key: &[u8]) -> Result<Self> {
        if key.len() < Self::PREFIX_LEN {
            return KeyTooShortSnafu { len: key.len() }.fail();
        }
        let mut prefix = [0u8; Self::PREFIX_LEN];
        prefix.copy_from_slice(&key[..Self::PREFIX_LEN]);
        Ok(Self(u32::from_le_bytes(prefix)))
    }
}

impl Display for SchemaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque partition key identifying one time series. The first four
/// bytes are the [`SchemaId`] prefix; the remainder is laid out by the
/// owning schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey(Bytes);

impl PartitionKey {
    /// Wrap raw key bytes.
    pub fn new(key: impl Into<Bytes>) -> Self {
        Self(key.into())
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The schema id embedded in this key.
    pub fn schema_id(&self) -> Result<SchemaId> {
        SchemaId::from_key(&self.0)
    }
}

/// The period length of one downsample output, e.g. five minutes or one
/// hour. Sub-millisecond resolutions are not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Resolution(Duration);

impl Resolution {
    /// Wrap a period length.
    pub fn new(period: Duration) -> Self {
        Self(period)
    }

    /// Convenience constructor for whole-minute resolutions.
    pub fn from_minutes(minutes: u64) -> Self {
        Self(Duration::from_secs(minutes * 60))
    }

    /// The period length in milliseconds.
    pub fn as_millis(&self) -> i64 {
        self.0.as_millis() as i64
    }

    /// The period length in whole minutes, used for dataset routing.
    pub fn as_minutes(&self) -> u64 {
        self.0.as_secs() / 60
    }
}

impl Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.as_secs() % 60 == 0 {
            write!(f, "{}m", self.as_minutes())
        } else {
            write!(f, "{}s", self.0.as_secs())
        }
    }
}

/// A closed interval of epoch milliseconds, e.g. the user time window
/// of one downsample batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub start: i64,
    /// Inclusive upper bound.
    pub end: i64,
}

impl TimeRange {
    /// Construct a range; `start` must not exceed `end`.
    pub fn new(start: i64, end: i64) -> Self {
        assert!(start <= end, "invalid time range [{start}, {end}]");
        Self { start, end }
    }

    /// Whether `ts` lies within this range (both bounds inclusive).
    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Reference to a dataset (table) in the long-term store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetRef(String);

impl DatasetRef {
    /// Wrap a dataset name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The dataset name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DatasetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One cell of an aggregate output row, tagged by column type.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    /// An epoch-ms timestamp cell.
    Timestamp(i64),
    /// A floating point cell.
    F64(f64),
    /// A histogram cell.
    Histogram(Histogram),
}
