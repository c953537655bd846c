//! Tracing setup.
//!
//! Structured, async-aware logging for the whole application using the
//! `tracing` and `tracing-subscriber` crates. The filter honours `RUST_LOG`
//! when set, otherwise it falls back to the level from the configuration
//! file, so a deployed bench can be turned noisy without editing config.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{BenchError, Result};

/// Initialise the global tracing subscriber.
///
/// `level` is the configured default ("trace" through "error"); the
/// `RUST_LOG` environment variable takes precedence when present.
pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| BenchError::InvalidParameters(format!("bad log level '{level}': {e}")))?;

    fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_target(true)
        .try_init()
        .map_err(|e| BenchError::InvalidParameters(format!("tracing init failed: {e}")))?;

    Ok(())
}
