//! Shared support for tests across the workspace.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

// the subscriber below and the macros in the workspace must agree on a
// `tracing` version, so go through the workspace pin
use observability_deps::tracing;
use std::sync::Once;

/// A test helper macro for asserting that two floating point numbers
/// are within the machine epsilon of each other.
#[macro_export]
macro_rules! assert_close {
    ($left:expr, $right:expr) => {{
        let left = $left;
        let right = $right;
        assert!(
            (left - right).abs() <= f64::EPSILON,
            "{} and {} are not close",
            left,
            right
        )
    }};
}

static LOG_SETUP: Once = Once::new();

/// Enables debug logging if the RUST_LOG environment variable is set.
/// Does nothing if `RUST_LOG` is not set. If enable_logging has been
/// set previously, does nothing.
pub fn maybe_start_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        start_logging()
    }
}

/// Start logging regardless of the `RUST_LOG` environment variable.
pub fn start_logging() {
    // ensure the global has been initialized
    LOG_SETUP.call_once(|| {
        // honor any global RUST_LOG settings, routing `log` records
        // through tracing as well
        let _ = tracing_log::LogTracer::init();

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    })
}
