//! Device login error types.

use request_executor::RequestError;
use std::time::Duration;
use thiserror::Error;
use token_cache::CacheError;

/// Device login error type.
#[derive(Error, Debug)]
pub enum DeviceAuthError {
    /// The user declined the request
    #[error("Login was denied")]
    Denied,

    /// The server issued a token the runtime cannot present
    #[error("Server issued unsupported token type: {0}")]
    UnsupportedTokenType(String),

    /// The server ended the flow with an error code
    #[error("Login failed: {code}")]
    Failed {
        code: String,
        description: Option<String>,
    },

    /// The device code outlived its declared lifetime
    #[error("Device code expired after {0:?}")]
    Expired(Duration),

    /// The caller cancelled the login
    #[error("Login cancelled")]
    Cancelled,

    /// Polling or code request failed below the protocol level
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The approved credential could not be stored
    #[error("Failed to store credential: {0}")]
    Cache(#[from] CacheError),

    /// Operation not valid in the current login state
    #[error("Invalid login state transition: {0}")]
    InvalidStateTransition(String),
}

/// Result type for device login.
pub type DeviceAuthResult<T> = Result<T, DeviceAuthError>;
