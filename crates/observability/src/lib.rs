//! Process-wide logging setup.

/// Log subscriber configuration (filter, output format).
pub mod tracing;

pub use crate::tracing::{LogConfig, LogFormat};

/// Install the default subscriber: JSON lines, `RUST_LOG` filter (default
/// `info`), format overridable with `ENTITLE_LOG_FORMAT=pretty`.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    crate::tracing::init(LogConfig::from_env());
}
