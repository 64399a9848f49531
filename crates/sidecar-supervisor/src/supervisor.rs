//! Single-flight sidecar spawning and child tracking.

use crate::config::SidecarConfig;
use crate::hooks::{LifecycleHooks, ShutdownRegistration};
use crate::logs;
use crate::{SidecarError, SidecarResult};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

type InitFuture = Shared<BoxFuture<'static, SidecarResult<Url>>>;

/// Lazily starts the helper process and keeps at most one child alive.
///
/// Cloning shares the same state. Dropping the last clone terminates the
/// tracked child.
#[derive(Clone)]
pub struct SidecarSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: SidecarConfig,
    hooks: Arc<dyn LifecycleHooks>,
    state: Mutex<SupervisorState>,
}

#[derive(Default)]
struct SupervisorState {
    running: Option<RunningChild>,
    in_flight: Option<InitFuture>,
    generation: u64,
}

struct RunningChild {
    pid: u32,
    endpoint: Url,
    generation: u64,
    stop_tx: Option<oneshot::Sender<()>>,
    watcher: JoinHandle<()>,
}

/// A child that has signalled readiness but is not yet published.
struct ReadyChild {
    child: Child,
    pid: u32,
    endpoint: Url,
}

impl SidecarSupervisor {
    pub fn new(config: SidecarConfig, hooks: Arc<dyn LifecycleHooks>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                hooks,
                state: Mutex::new(SupervisorState::default()),
            }),
        }
    }

    pub fn config(&self) -> &SidecarConfig {
        &self.inner.config
    }

    /// Endpoint the executor should talk to, starting the helper if needed.
    ///
    /// Concurrent callers share one spawn and all receive the same result.
    /// A failed attempt is not retried; the next call starts over.
    pub async fn ensure_ready(&self) -> SidecarResult<Url> {
        if let Some(endpoint) = &self.inner.config.external_endpoint {
            return Ok(endpoint.clone());
        }

        let init = {
            let mut state = self.inner.lock();
            if let Some(running) = &state.running {
                return Ok(running.endpoint.clone());
            }
            match &state.in_flight {
                Some(init) => init.clone(),
                None => {
                    state.generation += 1;
                    let init = start_init(self.inner.clone(), state.generation);
                    state.in_flight = Some(init.clone());
                    init
                }
            }
        };

        init.await
    }

    /// Pid of the tracked child, if one is alive.
    pub fn current_pid(&self) -> Option<u32> {
        self.inner.lock().running.as_ref().map(|running| running.pid)
    }

    /// Published local endpoint, if a child is alive.
    pub fn endpoint(&self) -> Option<Url> {
        self.inner
            .lock()
            .running
            .as_ref()
            .map(|running| running.endpoint.clone())
    }

    /// Terminate the tracked child (SIGTERM, grace period, then kill) and
    /// clear state. No-op when nothing is running.
    ///
    /// A start already in progress is awaited first, so a child that becomes
    /// ready during shutdown is stopped rather than left published.
    pub async fn shutdown(&self) {
        let in_flight = self.inner.lock().in_flight.clone();
        if let Some(init) = in_flight {
            if let Err(err) = init.await {
                debug!(error = %err, "Pending sidecar start failed during shutdown");
            }
        }

        let running = self.inner.lock().running.take();
        let Some(mut running) = running else {
            return;
        };

        info!(pid = running.pid, "Stopping sidecar");
        if let Some(stop_tx) = running.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Err(err) = running.watcher.await {
            warn!(pid = running.pid, error = %err, "Sidecar watcher task failed");
        }
    }
}

impl std::fmt::Debug for SidecarSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarSupervisor")
            .field("binary", &self.inner.config.binary)
            .field("port", &self.inner.config.port)
            .field("pid", &self.current_pid())
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SupervisorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn clear_in_flight(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.in_flight = None;
        }
    }

    /// Publish a ready child and hand it to an exit watcher.
    fn publish(self: &Arc<Self>, ready: ReadyChild, generation: u64) -> Url {
        let ReadyChild {
            child,
            pid,
            endpoint,
        } = ready;
        let registration = self.hooks.register_shutdown(pid);
        let (stop_tx, stop_rx) = oneshot::channel();

        // Held across the spawn so the watcher cannot clear state before it
        // is published.
        let mut state = self.lock();
        let watcher = tokio::spawn(watch_child(
            Arc::downgrade(self),
            child,
            pid,
            generation,
            registration,
            stop_rx,
            self.config.shutdown_grace,
        ));
        state.running = Some(RunningChild {
            pid,
            endpoint: endpoint.clone(),
            generation,
            stop_tx: Some(stop_tx),
            watcher,
        });
        state.in_flight = None;
        endpoint
    }
}

fn start_init(inner: Arc<Inner>, generation: u64) -> InitFuture {
    let task_inner = inner.clone();
    let handle = tokio::spawn(async move {
        match spawn_until_ready(&task_inner.config).await {
            Ok(ready) => {
                info!(pid = ready.pid, endpoint = %ready.endpoint, "Sidecar ready");
                Ok(task_inner.publish(ready, generation))
            }
            Err(err) => {
                warn!(error = %err, "Sidecar initialization failed");
                task_inner.clear_in_flight(generation);
                Err(err)
            }
        }
    });

    async move {
        match handle.await {
            Ok(result) => result,
            Err(err) => {
                inner.clear_in_flight(generation);
                Err(SidecarError::Join(err.to_string()))
            }
        }
    }
    .boxed()
    .shared()
}

async fn spawn_until_ready(config: &SidecarConfig) -> SidecarResult<ReadyChild> {
    let endpoint = Url::parse(&format!("http://127.0.0.1:{}", config.port))
        .map_err(|err| SidecarError::InvalidEndpoint(err.to_string()))?;

    let mut command = Command::new(&config.binary);
    command
        .args(&config.args)
        .envs(config.env.iter().map(|(key, value)| (key, value)))
        .env("PORT", config.port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(binary = %config.binary.display(), port = config.port, "Spawning sidecar");
    let mut child = command.spawn().map_err(|err| SidecarError::SpawnFailed {
        binary: config.binary.display().to_string(),
        source: Arc::new(err),
    })?;
    let pid = child.id().unwrap_or_default();

    if let Some(stderr) = child.stderr.take() {
        logs::spawn_reader(stderr, pid, "stderr");
    }
    let Some(stdout) = child.stdout.take() else {
        let _ = child.kill().await;
        return Err(SidecarError::NoStdout);
    };
    let mut stdout = BufReader::new(stdout);

    let readiness = match config.ready_timeout {
        Some(limit) => {
            let outcome =
                tokio::time::timeout(limit, await_first_byte(&mut child, &mut stdout)).await;
            match outcome {
                Ok(readiness) => readiness,
                Err(_) => {
                    warn!(pid, timeout_ms = limit.as_millis() as u64, "Sidecar readiness timed out");
                    let _ = child.kill().await;
                    return Err(SidecarError::ReadinessTimeout(limit));
                }
            }
        }
        None => await_first_byte(&mut child, &mut stdout).await,
    };

    match readiness {
        Readiness::Ready => {
            logs::spawn_buffered_reader(stdout, pid, "stdout");
            Ok(ReadyChild {
                child,
                pid,
                endpoint,
            })
        }
        Readiness::Exited(status) => Err(SidecarError::ExitedBeforeReady { status }),
        Readiness::Failed(err) => {
            let _ = child.kill().await;
            Err(SidecarError::Io(Arc::new(err)))
        }
    }
}

enum Readiness {
    Ready,
    Exited(String),
    Failed(std::io::Error),
}

/// First stdout byte, or the exit status if stdout closes first. Both the
/// read and the wait after EOF fall under the caller's readiness deadline.
async fn await_first_byte(child: &mut Child, stdout: &mut BufReader<ChildStdout>) -> Readiness {
    let mut first = [0u8; 1];
    match stdout.read(&mut first).await {
        Ok(0) => match child.wait().await {
            Ok(status) => Readiness::Exited(status.to_string()),
            Err(err) => Readiness::Exited(err.to_string()),
        },
        Ok(_) => Readiness::Ready,
        Err(err) => Readiness::Failed(err),
    }
}

/// Owns the child until it exits or is told to stop, then clears the
/// published state if it still belongs to this child.
async fn watch_child(
    inner: Weak<Inner>,
    mut child: Child,
    pid: u32,
    generation: u64,
    registration: ShutdownRegistration,
    stop_rx: oneshot::Receiver<()>,
    grace: Duration,
) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => info!(pid, %status, "Sidecar exited"),
            Err(err) => warn!(pid, error = %err, "Failed waiting on sidecar"),
        },
        // Fires on explicit shutdown and when the supervisor is dropped.
        _ = stop_rx => terminate(&mut child, pid, grace).await,
    }

    drop(registration);
    if let Some(inner) = inner.upgrade() {
        let mut state = inner.lock();
        if state
            .running
            .as_ref()
            .is_some_and(|running| running.generation == generation)
        {
            state.running = None;
        }
    }
}

async fn terminate(child: &mut Child, pid: u32, grace: Duration) {
    #[cfg(unix)]
    crate::hooks::forward_sigterm(pid);
    #[cfg(not(unix))]
    let _ = child.start_kill();

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => info!(pid, %status, "Sidecar stopped"),
        Ok(Err(err)) => warn!(pid, error = %err, "Failed waiting on sidecar"),
        Err(_) => {
            warn!(pid, grace_ms = grace.as_millis() as u64, "Sidecar ignored SIGTERM; killing");
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoopHooks;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn sh(script: &str) -> SidecarConfig {
        SidecarConfig::new("/bin/sh").with_args(["-c", script])
    }

    fn supervisor(config: SidecarConfig) -> SidecarSupervisor {
        SidecarSupervisor::new(config, Arc::new(NoopHooks))
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("condition not reached in time");
    }

    fn count_lines(path: &Path) -> usize {
        std::fs::read_to_string(path)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[derive(Default)]
    struct RecordingHooks {
        live: Mutex<HashSet<u32>>,
        registered: AtomicUsize,
    }

    impl LifecycleHooks for Arc<RecordingHooks> {
        fn register_shutdown(&self, pid: u32) -> ShutdownRegistration {
            self.live.lock().unwrap().insert(pid);
            self.registered.fetch_add(1, Ordering::SeqCst);
            let hooks = self.clone();
            ShutdownRegistration::new(move || {
                hooks.live.lock().unwrap().remove(&pid);
            })
        }
    }

    #[tokio::test]
    async fn external_endpoint_spawns_nothing() {
        let endpoint = Url::parse("https://api.example").unwrap();
        let supervisor = supervisor(
            SidecarConfig::new("/definitely/not/here").with_external_endpoint(Some(endpoint.clone())),
        );

        assert_eq!(supervisor.ensure_ready().await.unwrap(), endpoint);
        assert!(supervisor.current_pid().is_none());
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_child() {
        let dir = TempDir::new().unwrap();
        let spawns = dir.path().join("spawns");
        let script = format!(
            "echo spawn >> '{}'; sleep 0.2; echo ready; exec sleep 30",
            spawns.display()
        );
        let supervisor = supervisor(sh(&script).with_port(18_123));

        let (a, b) = tokio::join!(supervisor.ensure_ready(), supervisor.ensure_ready());
        let a = a.unwrap();
        assert_eq!(a, b.unwrap());
        assert_eq!(a.as_str(), "http://127.0.0.1:18123/");
        assert_eq!(count_lines(&spawns), 1);

        // Already tracked: no new spawn.
        assert_eq!(supervisor.ensure_ready().await.unwrap(), a);
        assert_eq!(count_lines(&spawns), 1);
        assert!(supervisor.current_pid().is_some());

        supervisor.shutdown().await;
        assert!(supervisor.current_pid().is_none());
        assert!(supervisor.endpoint().is_none());
    }

    #[tokio::test]
    async fn port_and_environment_reach_the_child() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("env");
        let script = format!(
            "echo \"$PORT $TOLLGATE_LIVE\" > '{}'; echo ready; exec sleep 30",
            out.display()
        );
        let supervisor = supervisor(
            sh(&script)
                .with_port(14_321)
                .with_env([("TOLLGATE_LIVE", "1")]),
        );

        supervisor.ensure_ready().await.unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "14321 1");
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn spawn_failure_reaches_every_waiter_and_next_call_retries() {
        let supervisor = supervisor(SidecarConfig::new("/definitely/not/a/sidecar"));

        let (a, b) = tokio::join!(supervisor.ensure_ready(), supervisor.ensure_ready());
        assert!(matches!(a, Err(SidecarError::SpawnFailed { .. })));
        assert!(matches!(b, Err(SidecarError::SpawnFailed { .. })));
        assert!(supervisor.inner.lock().in_flight.is_none());

        // A fresh attempt, not a cached failure.
        let generation = supervisor.inner.lock().generation;
        assert!(supervisor.ensure_ready().await.is_err());
        assert_eq!(supervisor.inner.lock().generation, generation + 1);
    }

    #[tokio::test]
    async fn exit_before_ready_is_reported() {
        let supervisor = supervisor(sh("exit 3"));

        let err = supervisor.ensure_ready().await.unwrap_err();
        match err {
            SidecarError::ExitedBeforeReady { status } => assert!(status.contains('3')),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(supervisor.current_pid().is_none());
    }

    #[tokio::test]
    async fn silent_child_times_out() {
        let supervisor =
            supervisor(sh("exec sleep 30").with_ready_timeout(Some(Duration::from_millis(200))));

        let err = supervisor.ensure_ready().await.unwrap_err();
        assert!(matches!(err, SidecarError::ReadinessTimeout(d) if d == Duration::from_millis(200)));
        assert!(supervisor.current_pid().is_none());
    }

    #[tokio::test]
    async fn child_closing_stdout_but_staying_alive_times_out() {
        let supervisor = supervisor(
            sh("exec 1>&-; exec sleep 20").with_ready_timeout(Some(Duration::from_millis(200))),
        );

        let result = tokio::time::timeout(Duration::from_secs(3), supervisor.ensure_ready())
            .await
            .expect("readiness deadline should cover the wait after stdout closes");
        assert!(
            matches!(result, Err(SidecarError::ReadinessTimeout(d)) if d == Duration::from_millis(200))
        );
        assert!(supervisor.current_pid().is_none());
        assert!(supervisor.inner.lock().in_flight.is_none());
    }

    #[tokio::test]
    async fn child_exit_clears_state_and_detaches_handler() {
        let dir = TempDir::new().unwrap();
        let spawns = dir.path().join("spawns");
        let script = format!(
            "echo spawn >> '{}'; echo ready; sleep 0.3",
            spawns.display()
        );
        let hooks = Arc::new(RecordingHooks::default());
        let supervisor = SidecarSupervisor::new(sh(&script), Arc::new(hooks.clone()));

        supervisor.ensure_ready().await.unwrap();
        let pid = supervisor.current_pid().unwrap();
        assert!(hooks.live.lock().unwrap().contains(&pid));

        wait_for(|| supervisor.current_pid().is_none()).await;
        assert!(supervisor.endpoint().is_none());
        assert!(hooks.live.lock().unwrap().is_empty());

        supervisor.ensure_ready().await.unwrap();
        assert_eq!(count_lines(&spawns), 2);
        assert_eq!(hooks.registered.load(Ordering::SeqCst), 2);
        supervisor.shutdown().await;
        assert!(hooks.live.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn heavy_output_does_not_block_the_child() {
        let dir = TempDir::new().unwrap();
        let done = dir.path().join("done");
        let script = format!(
            "echo ready; i=0; while [ $i -lt 10000 ]; do echo \"line $i\"; echo \"err $i\" >&2; i=$((i+1)); done; touch '{}'; exec sleep 30",
            done.display()
        );
        let supervisor = supervisor(sh(&script));

        supervisor.ensure_ready().await.unwrap();
        wait_for(|| done.exists()).await;
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_kills_a_child_ignoring_sigterm() {
        let supervisor = supervisor(
            sh("trap '' TERM; echo ready; while true; do sleep 1; done")
                .with_shutdown_grace(Duration::from_millis(200)),
        );

        supervisor.ensure_ready().await.unwrap();
        assert!(supervisor.current_pid().is_some());
        tokio::time::timeout(Duration::from_secs(5), supervisor.shutdown())
            .await
            .unwrap();
        assert!(supervisor.current_pid().is_none());
    }

    #[tokio::test]
    async fn shutdown_stops_a_child_that_becomes_ready_meanwhile() {
        let supervisor = supervisor(sh("sleep 0.3; echo ready; exec sleep 30"));

        let starter = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.ensure_ready().await })
        };
        wait_for(|| supervisor.inner.lock().in_flight.is_some()).await;

        supervisor.shutdown().await;
        assert!(supervisor.current_pid().is_none());
        assert!(supervisor.endpoint().is_none());

        // The starter still sees its own result.
        assert!(starter.await.unwrap().is_ok());
        assert!(supervisor.current_pid().is_none());
    }

    #[tokio::test]
    async fn shutdown_without_child_is_a_noop() {
        let supervisor = supervisor(sh("echo ready"));
        supervisor.shutdown().await;
        assert!(supervisor.current_pid().is_none());
    }
}
