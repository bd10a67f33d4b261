//! Per-worker memory arena for downsample batches.
//!
//! An [`ArenaMemory`] bundles the three memory resources a batch
//! touches: a native allocator for paged raw partitions, a block
//! factory backing flushed chunk vectors, and one write buffer pool per
//! raw schema. The arena is thread-affine: one per worker, threaded
//! through the batch by `&mut`, never shared and never locked. Its
//! internals are recycled between batches; the arena itself lives for
//! the worker's lifetime.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use data_types::SchemaId;
use hashbrown::HashMap;
use schema::SchemaRegistry;
use std::sync::Arc;

mod allocator;
mod blocks;
mod pool;

pub use allocator::{NativeAllocator, NativeBuffer};
pub use blocks::{BlockFactory, BlockWriter};
pub use pool::{BufferPool, ColumnBuffer, Error as PoolError, WriteBufferSet};

/// Blocks are never smaller than this, whatever the schemas declare.
const MIN_BLOCK_SIZE: usize = 4096;

/// Sizing knobs for a worker arena.
#[derive(Debug, Clone, Copy)]
pub struct ArenaSizing {
    /// Downsample partitions expected live at once per schema; sizes
    /// the write buffer pools.
    pub expected_partitions_per_schema: usize,
}

impl Default for ArenaSizing {
    fn default() -> Self {
        Self {
            expected_partitions_per_schema: 8,
        }
    }
}

/// The per-worker arena: allocator, block factory, and buffer pools.
#[derive(Debug)]
pub struct ArenaMemory {
    /// Allocator for paged raw partitions.
    pub allocator: NativeAllocator,
    /// Factory for the blocks backing flushed chunk vectors.
    pub block_factory: BlockFactory,
    buffer_pools: HashMap<SchemaId, BufferPool>,
}

impl ArenaMemory {
    /// Build an arena for every schema in `registry` that declares a
    /// downsample schema.
    pub fn new(registry: &SchemaRegistry, sizing: ArenaSizing) -> Self {
        let mut block_size = MIN_BLOCK_SIZE;
        let mut buffer_pools = HashMap::new();

        for raw in registry.iter() {
            if let Some(ds) = raw.downsample() {
                let ds_schema = Arc::new(ds.schema.clone());
                // declared meta sizes have been observed to undercount;
                // keep 2x headroom on top of the vector estimate
                block_size = block_size
                    .max(ds_schema.max_chunk_bytes_hint() + 2 * ds_schema.block_meta_size());
                buffer_pools.insert(
                    raw.id(),
                    BufferPool::new(ds_schema, sizing.expected_partitions_per_schema),
                );
            }
        }

        Self {
            allocator: NativeAllocator::new(),
            block_factory: BlockFactory::new(block_size),
            buffer_pools,
        }
    }

    /// The write buffer pool for a raw schema, if that schema declares
    /// a downsample schema.
    pub fn pool_for(&mut self, id: SchemaId) -> Option<&mut BufferPool> {
        self.buffer_pools.get_mut(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::{
        AggregatorSpec, ColumnSpec, ColumnType, DownsampleSchema, DownsampleSpec, RawSchema,
    };

    fn registry() -> SchemaRegistry {
        let ds = DownsampleSchema::new(
            "gauge_ds",
            vec![
                ColumnSpec::new("timestamp", ColumnType::Timestamp),
                ColumnSpec::new("sum", ColumnType::F64),
            ],
            100,
        )
        .unwrap();
        let with_ds = RawSchema::new(
            SchemaId::new(1),
            "gauge",
            vec![
                ColumnSpec::new("timestamp", ColumnType::Timestamp),
                ColumnSpec::new("value", ColumnType::F64),
            ],
        )
        .unwrap()
        .with_downsample(DownsampleSpec {
            schema: ds,
            aggregators: vec![
                AggregatorSpec::Time { col: 0 },
                AggregatorSpec::Double {
                    kind: schema::DoubleAggKind::Sum,
                    col: 1,
                },
            ],
        })
        .unwrap();
        let without_ds = RawSchema::new(
            SchemaId::new(2),
            "untracked",
            vec![ColumnSpec::new("timestamp", ColumnType::Timestamp)],
        )
        .unwrap();

        SchemaRegistry::new([with_ds, without_ds]).unwrap()
    }

    #[test]
    fn pools_exist_only_for_downsampled_schemas() {
        test_helpers::maybe_start_logging();
        let mut arena = ArenaMemory::new(&registry(), ArenaSizing::default());
        assert!(arena.pool_for(SchemaId::new(1)).is_some());
        assert!(arena.pool_for(SchemaId::new(2)).is_none());
    }

    #[test]
    fn block_size_covers_declared_chunks() {
        let arena = ArenaMemory::new(&registry(), ArenaSizing::default());
        assert!(arena.block_factory.block_size() >= MIN_BLOCK_SIZE);
    }
}
