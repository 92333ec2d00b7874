//! Test logging setup.
//!
//! ```ignore
//! use itr_common::testing::init_test_logging;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     init_test_logging(); // safe to call from every test
//!     tracing::info!(scope = "develop-abc1234", "visible with --nocapture");
//! }
//! ```

use std::sync::Once;

static TEST_LOGGING_INIT: Once = Once::new();

/// Install a compact subscriber that writes through the test harness.
///
/// The level comes from `ITR_TEST_LOG_LEVEL` (default `debug`).
pub fn init_test_logging() {
    TEST_LOGGING_INIT.call_once(|| {
        let level = std::env::var("ITR_TEST_LOG_LEVEL").unwrap_or_else(|_| "debug".to_string());
        let filter =
            tracing_subscriber::EnvFilter::try_new(format!("itrd={level},itr_common={level}"))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(filter)
            .with_target(true)
            .compact()
            .try_init();
    });
}
