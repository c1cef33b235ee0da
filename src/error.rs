//! Error types for the avatar gateway

use thiserror::Error;

/// Result type alias for avatar gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the avatar gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection descriptor could not be obtained
    #[error("descriptor error: {0}")]
    Descriptor(String),

    /// Media transport negotiation failed
    #[error("negotiation error: {0}")]
    Negotiation(String),

    /// Media transport did not become ready in time
    #[error("negotiation timed out after {0} ms")]
    NegotiationTimeout(u64),

    /// Speech recognition error
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Speech synthesis error
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Backend reasoning endpoint returned a non-success status
    #[error("backend error {status}: {body}")]
    Backend {
        /// HTTP status code
        status: u16,
        /// Response body (may be empty)
        body: String,
    },

    /// The session has already been closed
    #[error("session closed")]
    SessionClosed,

    /// Reconnection gave up
    #[error("reconnection failed after {0} attempts")]
    RetriesExhausted(u32),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
