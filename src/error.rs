//! Error types for racksync.

use thiserror::Error;

/// Result type alias using racksync's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the remote inventory API.
///
/// Client-class HTTP failures (4xx other than 403) are deliberately *not*
/// represented here: the affected operation is abandoned and the run
/// continues, so the API client reports them through its `Outcome` type
/// instead of an error.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure (connection refused, timeout) after all
    /// retry attempts were exhausted.
    #[error("giving up after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },

    /// Authentication or authorization failure (HTTP 403).
    #[error("remote API rejected credentials: {0}")]
    Auth(String),

    /// Server-side failure (HTTP 5xx).
    #[error("remote API server error ({status}): {message}")]
    RemoteServer { status: u16, message: String },

    /// A list response was missing its results sequence.
    #[error("result data for '{type_name}' missing from response")]
    MissingResults { type_name: String },

    /// Remote API version could not be determined or is unsupported.
    #[error("unsupported remote API: {0}")]
    ApiVersion(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a transport error.
    pub fn transport(attempts: u32, message: impl Into<String>) -> Self {
        Self::Transport {
            attempts,
            message: message.into(),
        }
    }

    /// Create a server error.
    pub fn remote_server(status: u16, message: impl Into<String>) -> Self {
        Self::RemoteServer {
            status,
            message: message.into(),
        }
    }

    /// Create a missing-results error.
    pub fn missing_results(type_name: impl Into<String>) -> Self {
        Self::MissingResults {
            type_name: type_name.into(),
        }
    }
}
