//! Process-wide logging setup shared by the bioforge binaries.

/// Initialize process-wide tracing from `RUST_LOG` and `LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Subscriber configuration (filters, output format).
pub mod tracing;

pub use tracing::LogFormat;
