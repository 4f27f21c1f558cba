//! Error types for the guild roster service.

use thiserror::Error;

use crate::ratelimit::StoreError;

/// Main error type for guild roster operations.
#[derive(Error, Debug)]
pub enum RosterError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The counter store could not be reached or did not answer in time
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// A counter was incremented but its time-to-live could not be set
    #[error("Failed to set expiry on {key}: {source}")]
    ExpirySetFailed {
        key: String,
        #[source]
        source: StoreError,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for guild roster operations.
pub type Result<T> = std::result::Result<T, RosterError>;
