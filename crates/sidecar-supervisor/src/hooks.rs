//! Shutdown propagation from the owning process to its sidecar.

use std::sync::Arc;

/// Registers "terminate this child when I terminate" with whatever manages
/// the owning process's lifecycle.
pub trait LifecycleHooks: Send + Sync {
    /// Arrange for `pid` to receive SIGTERM when the owning process is
    /// terminated. Dropping the returned registration detaches the handler.
    fn register_shutdown(&self, pid: u32) -> ShutdownRegistration;
}

/// Detaches a shutdown handler when dropped.
#[must_use = "dropping the registration detaches the handler immediately"]
pub struct ShutdownRegistration {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl ShutdownRegistration {
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    pub fn noop() -> Self {
        Self { detach: None }
    }
}

impl Drop for ShutdownRegistration {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for ShutdownRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownRegistration")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// Hooks for environments without process signals, and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl LifecycleHooks for NoopHooks {
    fn register_shutdown(&self, _pid: u32) -> ShutdownRegistration {
        ShutdownRegistration::noop()
    }
}

/// Signal-forwarding hooks on unix, no-op elsewhere.
#[cfg(unix)]
pub fn default_hooks() -> Arc<dyn LifecycleHooks> {
    Arc::new(SignalForwardingHooks::default())
}

#[cfg(not(unix))]
pub fn default_hooks() -> Arc<dyn LifecycleHooks> {
    Arc::new(NoopHooks)
}

#[cfg(unix)]
pub use unix::SignalForwardingHooks;

#[cfg(unix)]
mod unix {
    use super::{LifecycleHooks, ShutdownRegistration};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::{info, warn};

    #[derive(Debug, Default)]
    struct Registry {
        pids: Mutex<HashSet<u32>>,
        listening: AtomicBool,
    }

    impl Registry {
        fn pids(&self) -> std::sync::MutexGuard<'_, HashSet<u32>> {
            self.pids
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
        }
    }

    /// Listens for SIGINT/SIGTERM once, forwards SIGTERM to every registered
    /// child, then exits the process with `128 + signo`.
    #[derive(Debug, Clone, Default)]
    pub struct SignalForwardingHooks {
        registry: Arc<Registry>,
    }

    impl SignalForwardingHooks {
        /// Children currently registered.
        pub fn registered_pids(&self) -> Vec<u32> {
            let mut pids: Vec<u32> = self.registry.pids().iter().copied().collect();
            pids.sort_unstable();
            pids
        }

        fn ensure_listener(&self) {
            if self.registry.listening.swap(true, Ordering::SeqCst) {
                return;
            }
            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                warn!("no async runtime; sidecar will not receive forwarded signals");
                self.registry.listening.store(false, Ordering::SeqCst);
                return;
            };

            let registry = self.registry.clone();
            handle.spawn(async move {
                let Some(signo) = wait_for_termination().await else {
                    return;
                };
                let pids: Vec<u32> = registry.pids().iter().copied().collect();
                for pid in &pids {
                    forward_sigterm(*pid);
                }
                info!(signo, children = pids.len(), "termination signal forwarded to sidecars");
                std::process::exit(128 + signo);
            });
        }
    }

    impl LifecycleHooks for SignalForwardingHooks {
        fn register_shutdown(&self, pid: u32) -> ShutdownRegistration {
            self.registry.pids().insert(pid);
            self.ensure_listener();

            let registry = self.registry.clone();
            ShutdownRegistration::new(move || {
                registry.pids().remove(&pid);
            })
        }
    }

    async fn wait_for_termination() -> Option<i32> {
        let (mut terminate, mut interrupt) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(terminate), Ok(interrupt)) => (terminate, interrupt),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "failed to install signal handlers");
                    return None;
                }
            };

        tokio::select! {
            _ = terminate.recv() => Some(libc::SIGTERM),
            _ = interrupt.recv() => Some(libc::SIGINT),
        }
    }

    /// Best-effort SIGTERM to `pid`.
    pub(crate) fn forward_sigterm(pid: u32) {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return;
        };
        // SAFETY: kill has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            warn!(
                pid,
                error = %std::io::Error::last_os_error(),
                "failed to signal sidecar"
            );
        }
    }
}

#[cfg(unix)]
pub(crate) use unix::forward_sigterm;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn registration_detaches_on_drop() {
        let detached = Arc::new(AtomicUsize::new(0));
        let counter = detached.clone();
        let registration = ShutdownRegistration::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(detached.load(Ordering::SeqCst), 0);
        drop(registration);
        assert_eq!(detached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn noop_hooks_register_nothing() {
        let registration = NoopHooks.register_shutdown(42);
        assert!(format!("{:?}", registration).contains("attached: false"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn forwarding_hooks_track_registered_children() {
        let hooks = SignalForwardingHooks::default();

        let first = hooks.register_shutdown(1001);
        let second = hooks.register_shutdown(1002);
        assert_eq!(hooks.registered_pids(), vec![1001, 1002]);

        drop(first);
        assert_eq!(hooks.registered_pids(), vec![1002]);

        drop(second);
        assert!(hooks.registered_pids().is_empty());
    }
}
