//! Subscriber setup for binaries and test harnesses embedding the engine.
//!
//! The engine itself only emits `tracing` events. Resolution, polling,
//! dispatch and retry decisions are logged at `debug`, individual poll
//! samples at `trace`, and exhausted retries at `warn`.

use tracing_subscriber::EnvFilter;

use crate::result::{TenazError, TenazResult};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "tenaz=info";

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Install a global subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_FILTER`].
///
/// # Errors
///
/// Returns [`TenazError::Config`] if a global subscriber is already set.
pub fn init_tracing(format: LogFormat) -> TenazResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| TenazError::Config {
        message: format!("tracing subscriber already installed: {e}"),
    })
}
