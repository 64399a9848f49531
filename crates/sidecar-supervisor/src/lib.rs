//! Lazy, single-flight supervision of the local helper process.
//!
//! [`SidecarSupervisor::ensure_ready`] guarantees that at most one helper
//! child is running per supervisor and that concurrent callers share one
//! spawn. The helper gets its listen port through `PORT` and signals
//! readiness by writing its first byte to stdout. Once tracked, the child is
//! registered with the injected [`LifecycleHooks`] so that termination of
//! the owning process reaches it too.

mod config;
mod hooks;
mod logs;
mod supervisor;

pub use config::{derive_port, SidecarConfig};
#[cfg(unix)]
pub use hooks::SignalForwardingHooks;
pub use hooks::{default_hooks, LifecycleHooks, NoopHooks, ShutdownRegistration};
pub use supervisor::SidecarSupervisor;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error type for sidecar supervision.
///
/// Cloneable so that every caller waiting on one spawn receives the same error.
#[derive(Error, Debug, Clone)]
pub enum SidecarError {
    /// The helper executable could not be started
    #[error("Failed to spawn sidecar {binary}: {source}")]
    SpawnFailed {
        binary: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The helper exited before writing anything
    #[error("Sidecar exited before becoming ready ({status})")]
    ExitedBeforeReady { status: String },

    /// The helper wrote nothing within the configured window
    #[error("Sidecar not ready after {0:?}")]
    ReadinessTimeout(Duration),

    /// The helper's stdout was not captured
    #[error("Sidecar stdout unavailable")]
    NoStdout,

    /// Reading the readiness byte failed
    #[error("Sidecar readiness read failed: {0}")]
    Io(Arc<std::io::Error>),

    /// The published endpoint could not be formed
    #[error("Invalid sidecar endpoint: {0}")]
    InvalidEndpoint(String),

    /// The initialization task panicked or was cancelled
    #[error("Sidecar initialization task failed: {0}")]
    Join(String),
}

/// Result type for sidecar supervision.
pub type SidecarResult<T> = Result<T, SidecarError>;
