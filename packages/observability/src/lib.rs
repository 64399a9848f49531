//! # Observability
//!
//! Centralized logging for the Tollgate client runtime.
//!
//! Crates in the workspace are **log producers** only. The binary that owns
//! the process calls `observability::init()` once at startup; everything else
//! uses plain `tracing` macros and never knows where the lines end up.
//!
//! ## Dev Mode
//!
//! With the `dev` feature (default) every service appends structured JSONL to
//! one central file, `~/.tollgate/logs/dev.jsonl`:
//!
//! - `tail -f ~/.tollgate/logs/dev.jsonl | jq` for pretty JSON
//! - `lnav ~/.tollgate/logs/dev.jsonl` for interactive exploration
//!
//! Field values whose names look like credentials (`authorization`,
//! `access_token`, ...) are replaced before a line is written.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "tollgate-cli".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     });
//!     tracing::info!("ready");
//! }
//! ```

#[cfg(feature = "dev")]
mod dev;

mod filter;
mod json_layer;

pub use json_layer::{is_sensitive_key, REDACTED};

use std::path::PathBuf;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "tollgate-cli", "sidecar").
    /// Included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Extra per-target directives (e.g. "request_executor=debug") layered
    /// on top of the base filter, including one taken from `RUST_LOG`.
    pub directives: Vec<String>,

    /// Optional custom log file path.
    /// Defaults to `~/.tollgate/logs/dev.jsonl` in dev mode.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr for immediate feedback.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            directives: Vec::new(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize the observability layer with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize the observability layer with custom configuration.
pub fn init_with_config(config: LogConfig) {
    #[cfg(feature = "dev")]
    {
        dev::init_dev_subscriber(&config);
    }

    #[cfg(not(feature = "dev"))]
    {
        use tracing_subscriber::util::SubscriberInitExt;
        tracing_subscriber::fmt()
            .with_env_filter(filter::env_filter(&config))
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
