//! Tracing/logging initialization.
//!
//! JSON lines with timestamps; the filter comes from `RUST_LOG` when present.

use tracing_subscriber::EnvFilter;

const DEFAULT_LEVEL: &str = "info";

fn filter(default_level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = default_level
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_LEVEL);
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
    })
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(default_level: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(default_level))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
