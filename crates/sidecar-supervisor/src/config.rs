//! Sidecar launch settings.

use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Lowest port handed to a sidecar.
const PORT_BASE: u32 = 10_000;
/// Number of distinct ports derived from process ids.
const PORT_SPAN: u32 = 10_000;
/// Time a terminated child gets to exit before it is killed.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Deterministic listen port for the sidecar of the process with `pid`.
///
/// Co-located runtimes get different ports as long as their pids differ
/// modulo 10000.
pub fn derive_port(pid: u32) -> u16 {
    let port = PORT_BASE + pid % PORT_SPAN;
    u16::try_from(port).unwrap_or(u16::MAX)
}

#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Helper executable, resolved through `PATH` when not absolute.
    pub binary: PathBuf,
    pub args: Vec<String>,
    /// Extra environment handed to the helper, on top of `PORT`.
    pub env: Vec<(String, String)>,
    /// When set, no helper is spawned and this endpoint is used as is.
    pub external_endpoint: Option<Url>,
    /// Upper bound on the wait for the readiness byte. Unbounded when `None`.
    pub ready_timeout: Option<Duration>,
    pub port: u16,
    pub shutdown_grace: Duration,
}

impl SidecarConfig {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            env: Vec::new(),
            external_endpoint: None,
            ready_timeout: None,
            port: derive_port(std::process::id()),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env<I, K, V>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(env.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_external_endpoint(mut self, endpoint: Option<Url>) -> Self {
        self.external_endpoint = endpoint;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}
