//! Tracing subscriber setup.
//!
//! Logs go to stderr so JSON on stdout stays machine-readable. The filter is
//! taken from `MISSIONCTL_LOG`, then `RUST_LOG`, then the configured level.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "MISSIONCTL_LOG";

fn normalized_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "warn",
    }
}

pub fn make_filter(fallback_level: &str) -> EnvFilter {
    let fallback = normalized_level(fallback_level);
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Install the global subscriber. Repeated calls are harmless.
pub fn init_logging(fallback_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(make_filter(fallback_level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
