//! Logging setup shared by processes hosting streamfold projections.

/// Initialize process-wide structured logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize logging routed through the test harness's captured output.
pub fn init_test() {
    tracing::init_test();
}

/// Subscriber configuration (filters, formatting).
pub mod tracing;
