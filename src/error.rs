//! Error types for the MCP OAuth client

use std::io;

use thiserror::Error;

/// Result type alias for the MCP OAuth client
pub type Result<T> = std::result::Result<T, Error>;

/// MCP OAuth client errors
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid OAuth configuration (bad redirect URI, missing client_id, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dynamic client registration failed
    #[error("Client registration failed: {0}")]
    Registration(String),

    /// Authorization flow failed (callback error, state mismatch, timeout)
    #[error("Authorization failed: {0}")]
    AuthFlow(String),

    /// Token endpoint returned a non-success response
    #[error("Token request failed: HTTP {status} - {body}")]
    TokenEndpoint {
        /// HTTP status code returned by the token endpoint
        status: u16,
        /// Response body, verbatim
        body: String,
    },

    /// Token store read/parse/write failure
    #[error("Token store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
