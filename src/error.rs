//! Error types for rssecmanager.
//!
//! These errors stay inside the crate's collaborator seams. The public
//! session operations fold them into status codes or `bool` results.

use thiserror::Error;

/// Main error type for rssecmanager operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport could not deliver the call or produced no response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote side answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The remote response did not have the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration file or value.
    #[error("Invalid config: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias for rssecmanager operations.
pub type Result<T> = std::result::Result<T, Error>;
