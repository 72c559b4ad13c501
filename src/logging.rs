//! Logger setup for the replay binary and tests.
//!
//! Library code only uses the `log` macros; a binary opts into output by calling
//! [`init_logging`].

use env_logger::Env;

/// Environment variable holding the `env_logger` filter, e.g. `chunked_inference=debug`.
pub const LOG_FILTER_ENV: &str = "INFERENCE_LOG";
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Installs the global logger. Returns false when a logger was already installed.
pub fn init_logging() -> bool {
    env_logger::Builder::from_env(Env::default().filter_or(LOG_FILTER_ENV, DEFAULT_LOG_FILTER))
        .format_timestamp_millis()
        .try_init()
        .is_ok()
}

/// Routes log output through the test harness so it only shows for failing tests.
pub fn init_test_logging() {
    let _ = env_logger::Builder::from_env(Env::default().filter_or(LOG_FILTER_ENV, "debug"))
        .is_test(true)
        .try_init();
}
