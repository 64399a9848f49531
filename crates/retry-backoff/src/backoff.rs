//! Jittered exponential backoff.

use crate::{BackoffError, BackoffResult, CancelSignal};
use rand::Rng;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

const DEFAULT_MAX_DELAY_PER_ATTEMPT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_TOTAL_DELAY: Duration = Duration::from_secs(5 * 60);
/// Delay unit multiplied by the squared attempt count.
const STEP_MS: f64 = 10.0;

/// Ceilings for a [`Backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub max_delay_per_attempt: Duration,
    pub max_total_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_delay_per_attempt: DEFAULT_MAX_DELAY_PER_ATTEMPT,
            max_total_delay: DEFAULT_MAX_TOTAL_DELAY,
        }
    }
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full delay elapsed.
    Elapsed(Duration),
    /// The wait was released early by a cancellation.
    Cancelled,
}

#[derive(Debug, Default)]
struct BackoffState {
    attempt_count: u32,
    cumulative_delay_ms: u64,
    source: Option<CancelSignal>,
}

#[derive(Debug)]
struct Shared {
    config: BackoffConfig,
    state: Mutex<BackoffState>,
    /// Bumped on every `cancel()` to release pending waits.
    cancel_epoch: watch::Sender<u64>,
}

/// Delay generator: `ceil(attempt² × 10ms × uniform(0.5, 1.5))`, clamped to the
/// per-attempt ceiling and the remaining total budget.
///
/// Clones share state, so one task may `cancel()` while another waits.
#[derive(Debug, Clone)]
pub struct Backoff {
    shared: Arc<Shared>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let (cancel_epoch, _rx) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(BackoffState::default()),
                cancel_epoch,
            }),
        }
    }

    /// Attach a caller-supplied cancellation signal.
    pub fn with_cancel_signal(self, signal: CancelSignal) -> Self {
        self.lock_state().source = Some(signal);
        self
    }

    pub fn config(&self) -> BackoffConfig {
        self.shared.config
    }

    pub fn attempt_count(&self) -> u32 {
        self.lock_state().attempt_count
    }

    pub fn cumulative_delay(&self) -> Duration {
        Duration::from_millis(self.lock_state().cumulative_delay_ms)
    }

    /// Wait out the next delay.
    ///
    /// Fails once the total budget is spent. Returns `Cancelled` immediately if
    /// the attached signal already fired, or early if it fires (or `cancel()`
    /// is called) mid-wait.
    pub async fn wait(&self) -> BackoffResult<WaitOutcome> {
        let epoch = self.shared.cancel_epoch.subscribe();

        let (delay, source) = {
            let mut state = self.lock_state();

            if state.source.as_ref().is_some_and(CancelSignal::is_cancelled) {
                drop(state);
                self.cancel();
                return Ok(WaitOutcome::Cancelled);
            }

            let config = self.shared.config;
            let remaining_ms =
                duration_ms(config.max_total_delay).saturating_sub(state.cumulative_delay_ms);
            if remaining_ms == 0 {
                return Err(BackoffError::Exhausted {
                    attempts: state.attempt_count,
                    total: Duration::from_millis(state.cumulative_delay_ms),
                });
            }

            let jitter = rand::thread_rng().gen_range(0.5..1.5);
            let delay_ms = jittered_delay_ms(state.attempt_count, jitter)
                .min(duration_ms(config.max_delay_per_attempt))
                .min(remaining_ms);

            state.attempt_count = state.attempt_count.saturating_add(1);
            state.cumulative_delay_ms = state.cumulative_delay_ms.saturating_add(delay_ms);

            debug!(
                attempt = state.attempt_count,
                delay_ms,
                cumulative_ms = state.cumulative_delay_ms,
                "backoff wait"
            );

            (Duration::from_millis(delay_ms), state.source.clone())
        };

        Ok(self.sleep_releasable(delay, source, epoch).await)
    }

    /// Wait out a delay chosen by the caller, such as a server-dictated
    /// polling interval.
    ///
    /// Growth and the total budget are untouched, but the wait is released
    /// exactly like [`wait`](Self::wait): by `cancel()` or by the attached
    /// signal.
    pub async fn wait_for(&self, delay: Duration) -> WaitOutcome {
        let epoch = self.shared.cancel_epoch.subscribe();
        let source = {
            let state = self.lock_state();
            if state.source.as_ref().is_some_and(CancelSignal::is_cancelled) {
                drop(state);
                self.cancel();
                return WaitOutcome::Cancelled;
            }
            state.source.clone()
        };

        debug!(delay_ms = duration_ms(delay), "fixed wait");
        self.sleep_releasable(delay, source, epoch).await
    }

    async fn sleep_releasable(
        &self,
        delay: Duration,
        source: Option<CancelSignal>,
        mut epoch: watch::Receiver<u64>,
    ) -> WaitOutcome {
        let external = async {
            match &source {
                Some(signal) => signal.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => WaitOutcome::Elapsed(delay),
            _ = epoch.changed() => WaitOutcome::Cancelled,
            _ = external => {
                self.cancel();
                WaitOutcome::Cancelled
            }
        }
    }

    /// Release any pending wait, reset growth, and detach the cancellation
    /// signal. Idempotent.
    pub fn cancel(&self) {
        {
            let mut state = self.lock_state();
            state.attempt_count = 0;
            state.cumulative_delay_ms = 0;
            state.source = None;
        }
        self.shared
            .cancel_epoch
            .send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    fn lock_state(&self) -> MutexGuard<'_, BackoffState> {
        // State stays consistent even if a holder panicked: every write is a
        // plain field assignment.
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn jittered_delay_ms(attempt_count: u32, jitter: f64) -> u64 {
    let attempts = f64::from(attempt_count);
    (attempts * attempts * STEP_MS * jitter).ceil() as u64
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
