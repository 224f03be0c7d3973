use thiserror::Error;

/// Common error type for mbpoll components.
///
/// Read and parse failures carry the file path in the message.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using mbpoll's common Error.
pub type Result<T> = std::result::Result<T, Error>;
