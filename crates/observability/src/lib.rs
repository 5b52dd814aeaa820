//! Tracing and logging setup shared by every binary and test harness.

/// Initialize process-wide tracing with the filter from `RUST_LOG` (default `info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(None);
}

/// Initialize tracing with an explicit default level, e.g. the configured
/// `telemetry.log_level`. `RUST_LOG` still wins when set.
pub fn init_with_level(level: &str) {
    tracing::init(Some(level));
}

/// Tracing configuration (filters, layers).
pub mod tracing;
