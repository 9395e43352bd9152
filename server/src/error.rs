//! Error taxonomy shared by the control surface and the authoritative loop

use thiserror::Error;

/// Errors surfaced to callers of the server's control operations.
///
/// Connection refusals are not errors; see [`crate::policy::Rejection`].
#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed argument rejected before anything reached the server loop
    #[error("Invalid argument: {0}")]
    Validation(String),

    /// The listening socket could not be acquired
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server is not running")]
    NotRunning,

    #[error("Server is already running")]
    AlreadyRunning,

    /// The operation was dropped or panicked before producing a result
    #[error("Operation aborted before completing")]
    OperationAborted,

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServerError::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
