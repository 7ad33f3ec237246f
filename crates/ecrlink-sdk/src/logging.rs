//! Tracing bootstrap for applications embedding the SDK.

use tracing_subscriber::{fmt, EnvFilter};

use ecrlink_core::error::{EcrError, Result};

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
/// Errors if a global subscriber is already set.
pub fn try_init() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| EcrError::Internal(format!("tracing init failed: {e}")))
}

/// Like [`try_init`], ignoring an already-installed subscriber.
pub fn init() {
    let _ = try_init();
}
