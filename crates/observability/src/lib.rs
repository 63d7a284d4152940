//! Tracing/logging setup shared by every binary and test suite.

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use crate::tracing::{init_for_tests, LogFormat};

/// Initialize process-wide logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::from_env());
}
