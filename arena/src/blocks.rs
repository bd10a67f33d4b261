//! Fixed-size recyclable blocks backing the column vectors of flushed
//! chunks.
//!
//! A [`BlockWriter`] packs one chunk's encoded vectors into a single
//! block; chunks larger than the block size get an oversized block,
//! which is recycled like any other. Blocks handed out since the last
//! mark return to the free list on [`BlockFactory::mark_used_blocks_reclaimable`],
//! which the batch driver must call at batch end on every exit path.

use data_types::{BlockData, ChunkVector};
use observability_deps::tracing::warn;
use std::sync::Arc;

/// Yields blocks for chunk encoding and recycles them between batches.
#[derive(Debug)]
pub struct BlockFactory {
    block_size: usize,
    free: Vec<Vec<u8>>,
    used: Vec<Arc<BlockData>>,
}

impl BlockFactory {
    /// Create a factory yielding blocks of `block_size` bytes.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            free: vec![],
            used: vec![],
        }
    }

    /// The configured block size.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Start encoding one chunk's vectors. `estimate` is the expected
    /// total encoded size and only matters when it exceeds the block
    /// size.
    pub fn chunk_writer(&mut self, estimate: usize) -> BlockWriter<'_> {
        let mut buf = self.free.pop().unwrap_or_default();
        buf.clear();
        buf.reserve(self.block_size.max(estimate));
        BlockWriter {
            factory: self,
            buf,
            ranges: vec![],
        }
    }

    /// Return every block handed out since the last mark to the free
    /// list. Blocks still referenced by unconsumed chunk sets are
    /// dropped from tracking and freed when the last reference goes.
    pub fn mark_used_blocks_reclaimable(&mut self) -> usize {
        let mut reclaimed = 0;
        for block in self.used.drain(..) {
            match Arc::try_unwrap(block) {
                Ok(block) => {
                    let mut buf = block.into_inner();
                    buf.clear();
                    self.free.push(buf);
                    reclaimed += 1;
                }
                Err(block) => {
                    warn!(
                        refs = Arc::strong_count(&block) - 1,
                        "block still referenced at reclaim mark"
                    );
                }
            }
        }
        reclaimed
    }

    /// Number of blocks on the free list.
    pub fn free_blocks(&self) -> usize {
        self.free.len()
    }

    /// Number of blocks handed out since the last mark.
    pub fn used_blocks(&self) -> usize {
        self.used.len()
    }

    fn seal(&mut self, buf: Vec<u8>, ranges: Vec<(usize, usize)>) -> Vec<ChunkVector> {
        let block = Arc::new(BlockData::new(buf));
        self.used.push(Arc::clone(&block));
        ranges
            .into_iter()
            .map(|(offset, len)| ChunkVector::new(Arc::clone(&block), offset, len))
            .collect()
    }
}

/// Encodes the vectors of one chunk into a block.
#[derive(Debug)]
pub struct BlockWriter<'a> {
    factory: &'a mut BlockFactory,
    buf: Vec<u8>,
    ranges: Vec<(usize, usize)>,
}

impl<'a> BlockWriter<'a> {
    /// Append one vector, produced by `encode` writing into the block.
    pub fn append_vector(&mut self, encode: impl FnOnce(&mut Vec<u8>)) {
        let start = self.buf.len();
        encode(&mut self.buf);
        self.ranges.push((start, self.buf.len() - start));
    }

    /// Freeze the block and return one [`ChunkVector`] view per
    /// appended vector.
    pub fn seal(self) -> Vec<ChunkVector> {
        let Self {
            factory,
            buf,
            ranges,
        } = self;
        factory.seal(buf, ranges)
    }
}
