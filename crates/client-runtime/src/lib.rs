//! Composition root for the Tollgate client.
//!
//! [`ClientRuntime`] owns the configuration, the token cache and the sidecar
//! supervisor, and hands out request executors that are ready to use and
//! device login flows bound to the configured login server.

mod runtime;

pub use runtime::{AuthStatus, ClientRuntime, PendingLogin};

use device_auth::DeviceAuthError;
use request_executor::RequestError;
use runtime_config_and_utils::CoreError;
use sidecar_supervisor::SidecarError;
use thiserror::Error;
use token_cache::CacheError;

/// Error type for the client runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration or path problem
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Token cache I/O failure
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The local sidecar could not be made ready
    #[error(transparent)]
    Sidecar(#[from] SidecarError),

    /// An API request failed
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Device login failed
    #[error(transparent)]
    DeviceAuth(#[from] DeviceAuthError),
}

impl RuntimeError {
    /// The underlying request error, wherever it surfaced.
    pub fn request_error(&self) -> Option<&RequestError> {
        match self {
            RuntimeError::Request(e) => Some(e),
            RuntimeError::DeviceAuth(DeviceAuthError::Request(e)) => Some(e),
            _ => None,
        }
    }
}

/// Result type for the client runtime.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
