use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize tracing for test binaries. Safe to call multiple times.
///
/// Honors `RUST_LOG`; defaults to `info`. Output goes through the test
/// writer so it is captured per test.
pub fn init_tracing_for_tests() {
    INIT.call_once(|| {
        use tracing_subscriber::filter::EnvFilter;
        use tracing_subscriber::fmt;
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_test_writer()
            .try_init();
    });
}
