//! Flushable chunk sets: the immutable columnar output of downsample
//! ingestion, ready for persistence.

use crate::PartitionKey;
use std::{ops::Deref, sync::Arc};

/// An immutable byte region produced by the arena block factory. Blocks
/// back the column vectors of flushed chunks and are recycled once the
/// batch has released all references.
#[derive(Debug)]
pub struct BlockData(Vec<u8>);

impl BlockData {
    /// Freeze a filled buffer into an immutable block.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// The block's bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Recover the backing buffer for recycling.
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

/// One encoded column vector: a view into an arena block.
#[derive(Debug, Clone)]
pub struct ChunkVector {
    block: Arc<BlockData>,
    offset: usize,
    len: usize,
}

impl ChunkVector {
    /// A view of `len` bytes at `offset` into `block`.
    pub fn new(block: Arc<BlockData>, offset: usize, len: usize) -> Self {
        debug_assert!(offset + len <= block.as_slice().len());
        Self { block, offset, len }
    }

    /// The encoded vector bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.block.as_slice()[self.offset..self.offset + self.len]
    }
}

impl Deref for ChunkVector {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl PartialEq for ChunkVector {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

/// A flushable, immutable chunk of one downsample partition in the
/// store's canonical columnar layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSet {
    /// The owning partition's key.
    pub partition_key: PartitionKey,
    /// Timestamp of the first row.
    pub start_time: i64,
    /// Timestamp of the last row.
    pub end_time: i64,
    /// The batch ingestion time all rows were ingested at.
    pub ingestion_time: i64,
    /// Number of rows.
    pub num_rows: u32,
    /// Encoded column vectors, one per downsample schema column.
    pub columns: Vec<ChunkVector>,
}
