//! Batch downsampler core for the columnar time-series store.
//!
//! A batch job reads a window of raw chunks for a set of partitions,
//! computes aggregate samples at one or more coarser resolutions,
//! chunks the aggregates into the on-disk columnar format, and writes
//! the resulting chunk sets to resolution-specific datasets with
//! per-resolution TTLs.
//!
//! The pipeline for one batch:
//!
//! ```text
//! RawPartData[] -> PagedRawPartition -> WindowDownsampler
//!     -> DownsamplePartition (per resolution) -> ChunkSet iterator
//!     -> StoreSink::write(dataset_for(resolution), chunks, ttl)
//! ```
//!
//! Each worker owns one [`arena::ArenaMemory`] that supplies every
//! buffer the batch touches and is torn down by the driver on every
//! exit path.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod aggregate;
pub mod config;
pub mod driver;
pub mod paged;
pub mod partition;
pub mod read;
pub mod window;

pub use config::DownsamplerConfig;
pub use driver::{BatchDownsampler, BatchSummary};
pub use paged::PagedRawPartition;
pub use partition::DownsamplePartition;
pub use window::WindowDownsampler;
