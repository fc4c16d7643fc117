//! Daemon error types.

use courier_domain::Fault;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Broker receive failed permanently, or kept failing past the listen deadline
    #[error("Broker error: {0}")]
    Broker(#[source] Fault),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
