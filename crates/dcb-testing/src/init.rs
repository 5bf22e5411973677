//! Test-local tracing initialization: a
//! `tracing_subscriber::fmt().with_test_writer().try_init()` one-liner for
//! tests that want DEBUG-level output routed through the test harness.

/// Installs a `tracing_subscriber` formatter that writes through the test
/// harness's captured output, at `DEBUG` and above. Safe to call from every
/// test in a suite: `try_init` is idempotent, so only the first call in a
/// process actually installs a subscriber.
pub fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}
