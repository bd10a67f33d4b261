//! Native buffer allocation for paged raw partitions, with outstanding
//! allocation accounting.

use std::ops::Deref;

/// A buffer owned by the batch that paged it in. Returned to the
/// allocator through [`NativeAllocator::free`] at batch end.
#[derive(Debug)]
pub struct NativeBuffer {
    data: Vec<u8>,
}

impl Deref for NativeBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

/// Hands out buffers for paged raw partitions and tracks what is still
/// outstanding. After a batch has torn down, `outstanding()` must read
/// zero; anything else is a leak in the batch driver.
#[derive(Debug, Default)]
pub struct NativeAllocator {
    outstanding: usize,
    outstanding_bytes: usize,
}

impl NativeAllocator {
    /// Create an allocator with nothing outstanding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a buffer holding a copy of `src`.
    pub fn alloc_copied(&mut self, src: &[u8]) -> NativeBuffer {
        self.outstanding += 1;
        self.outstanding_bytes += src.len();
        NativeBuffer {
            data: src.to_vec(),
        }
    }

    /// Return a buffer to the allocator.
    pub fn free(&mut self, buf: NativeBuffer) {
        self.outstanding -= 1;
        self.outstanding_bytes -= buf.data.len();
    }

    /// Number of buffers currently allocated and not yet freed.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Total bytes currently allocated and not yet freed.
    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding_bytes
    }
}
