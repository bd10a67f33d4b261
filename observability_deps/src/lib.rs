//! This crate exists to coordinate the version of the observability
//! ecosystem used across the workspace, so that every crate emits
//! through the same `tracing` version and subscriber.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]

pub use tracing;
