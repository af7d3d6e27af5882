//! Tracing setup shared by the worker and the one-shot parser binaries.

use models::LogFormat;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info";

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into())
}

/// Initialize the global subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init(format: LogFormat) {
    init_with_filter(format, DEFAULT_FILTER);
}

pub fn init_with_filter(format: LogFormat, default_filter: &str) {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(default_filter));
    let result = match format {
        LogFormat::Pretty => builder.with_target(false).try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if result.is_ok() {
        tracing::debug!(?format, "logging initialized");
    }
}
