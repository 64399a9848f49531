//! Jittered exponential delays with per-step and total ceilings, plus the
//! cancellation signal shared by every suspending operation in the runtime.

mod backoff;
mod cancel;

pub use backoff::{Backoff, BackoffConfig, WaitOutcome};
pub use cancel::{CancelSignal, CancelSource};

use std::time::Duration;
use thiserror::Error;

/// Error type for backoff waits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    /// The total delay budget is used up
    #[error("retry budget exhausted after {attempts} attempts ({total:?} waited)")]
    Exhausted { attempts: u32, total: Duration },
}

/// Result type for backoff waits.
pub type BackoffResult<T> = Result<T, BackoffError>;
