//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Errors raised while installing the global subscriber
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(String),
}

/// Install a stderr fmt subscriber. `RUST_LOG` wins over `verbose`.
pub fn init(verbose: bool) -> Result<(), LoggingError> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| LoggingError::SetGlobal(e.to_string()))
}
