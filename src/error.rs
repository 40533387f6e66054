//! Error types for the server engine

use thiserror::Error;

/// Result type alias for server operations
pub type Result<T, E = ServerError> = std::result::Result<T, E>;

/// Startup and transport errors.
///
/// Everything here is fatal to server startup or to the accept loop.
/// Per-request failures never surface through this type; they are converted
/// into error responses at the connection boundary.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured logger sink could not be opened.
    #[error("failed to open logger sink {path}: {source}")]
    Sink {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The listener could not bind its address or socket path.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The application config could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// Transport-level I/O failure in the accept loop.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
