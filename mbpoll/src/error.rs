//! Error types for the polling engine.

use thiserror::Error;

/// Result type alias using [`PollError`].
pub type Result<T> = std::result::Result<T, PollError>;

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Modbus exception: {0}")]
    Exception(String),
    #[error("Request timed out after {0} ms")]
    Timeout(u64),
    #[error("Port not open")]
    NotConnected,
    #[error("Connection type {0} is not supported by this transport")]
    Unsupported(String),
}

/// Errors surfaced by the engine, both to direct callers and on the event bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// Bad connection type, unknown or missing function code, malformed item.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connect, read or write failure reported by the transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Too many consecutive failures within one pass.
    #[error("Retry budget exhausted after {retries} consecutive failures")]
    RetryBudgetExceeded { retries: u32 },

    /// A monitor tick found a pass still running.
    #[error("Monitor intervals overlap: a polling pass is still running")]
    Overlap,

    /// Direct request refused while a pass owns the connection.
    #[error("A polling pass is running")]
    Busy,

    /// The engine task is gone.
    #[error("Engine has stopped")]
    EngineStopped,
}

impl PollError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether this error came from configuration rather than the link.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
