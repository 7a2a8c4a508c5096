//! Error types for credential resolution.

use thiserror::Error;

/// Errors that can occur while loading settings or resolving a credential.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No explicit key, no reusable cached key, and auto-trial is disabled.
    #[error(
        "SENTINEL_API_KEY is not set and auto-trial is disabled (SENTINEL_NO_TRIAL=1)"
    )]
    NoCredentialConfigured,

    /// The token service rejected the mint request or could not be reached.
    #[error("Trial key mint failed: {detail}")]
    TrialMintFailed {
        /// HTTP status returned by the token service, if a response arrived.
        status: Option<u16>,
        /// Diagnostic detail (URL, body or transport error).
        detail: String,
    },

    /// I/O error (cache file operations).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn mint_failed(status: Option<u16>, detail: impl Into<String>) -> Self {
        Self::TrialMintFailed {
            status,
            detail: detail.into(),
        }
    }
}
