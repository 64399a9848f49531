//! Configuration management for the client runtime.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default web origin that issues device login codes and tokens.
pub const DEFAULT_WEB_ORIGIN: &str = match option_env!("TOLLGATE_DEFAULT_WEB_ORIGIN") {
    Some(origin) => origin,
    None => "https://tollgate.dev",
};

/// Default helper executable looked up on `PATH`.
pub const DEFAULT_SIDECAR_BINARY: &str = "tollgate-sidecar";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Main runtime configuration.
///
/// Read once at construction; the core crates receive plain values from it
/// and never consult the environment themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// External API endpoint. When unset, requests go to a local sidecar.
    #[serde(default)]
    pub api_origin: Option<String>,
    /// Origin of the login server; also keys cached credentials.
    #[serde(default = "default_web_origin")]
    pub web_origin: String,
    /// Live mode instead of test mode.
    #[serde(default)]
    pub live_mode: bool,
    /// Log every request and response (credentials redacted).
    #[serde(default)]
    pub debug: bool,
    /// Helper executable spawned when no external endpoint is configured.
    #[serde(default = "default_sidecar_binary")]
    pub sidecar_binary: String,
    /// Upper bound on waiting for the helper's readiness byte.
    #[serde(default)]
    pub sidecar_ready_timeout_ms: Option<u64>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_web_origin() -> String {
    DEFAULT_WEB_ORIGIN.to_string()
}

fn default_sidecar_binary() -> String {
    DEFAULT_SIDECAR_BINARY.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_origin: None,
            web_origin: default_web_origin(),
            live_mode: false,
            debug: false,
            sidecar_binary: default_sidecar_binary(),
            sidecar_ready_timeout_ms: None,
        }
    }
}

impl Config {
    /// Load configuration from the config file when present, then apply
    /// environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `TOLLGATE_*` overrides from a variable lookup.
    ///
    /// Empty values are ignored. Unparsable numbers keep the previous value.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).and_then(non_empty);

        if let Some(level) = get("TOLLGATE_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(origin) = get("TOLLGATE_API_ORIGIN") {
            self.api_origin = Some(origin);
        }
        if let Some(origin) = get("TOLLGATE_WEB_ORIGIN") {
            self.web_origin = origin;
        }
        if let Some(live) = get("TOLLGATE_LIVE") {
            self.live_mode = parse_flag(&live);
        }
        if let Some(debug) = get("TOLLGATE_DEBUG") {
            self.debug = parse_flag(&debug);
        }
        if let Some(binary) = get("TOLLGATE_SIDECAR_BIN") {
            self.sidecar_binary = binary;
        }
        if let Some(timeout) = get("TOLLGATE_SIDECAR_READY_TIMEOUT_MS") {
            match timeout.parse::<u64>() {
                Ok(ms) => self.sidecar_ready_timeout_ms = Some(ms),
                Err(_) => tracing::warn!(
                    value = %timeout,
                    "ignoring invalid TOLLGATE_SIDECAR_READY_TIMEOUT_MS"
                ),
            }
        }
    }

    /// Get the external API origin as a parsed URL, if configured.
    pub fn api_origin(&self) -> CoreResult<Option<Url>> {
        self.api_origin
            .as_deref()
            .map(parse_origin)
            .transpose()
    }

    /// Get the web origin as a parsed URL.
    pub fn web_origin(&self) -> CoreResult<Url> {
        parse_origin(&self.web_origin)
    }

    /// Readiness window for the sidecar, if bounded.
    pub fn sidecar_ready_timeout(&self) -> Option<Duration> {
        self.sidecar_ready_timeout_ms.map(Duration::from_millis)
    }

    /// Environment handed to the sidecar so it serves the same mode.
    pub fn sidecar_env(&self) -> Vec<(String, String)> {
        vec![
            ("TOLLGATE_WEB_ORIGIN".to_string(), self.web_origin.clone()),
            ("TOLLGATE_LIVE".to_string(), flag_value(self.live_mode)),
            ("TOLLGATE_DEBUG".to_string(), flag_value(self.debug)),
        ]
    }
}

fn parse_origin(raw: &str) -> CoreResult<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(CoreError::Config(format!(
            "unsupported scheme '{other}' in origin {raw}"
        ))),
    }
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn flag_value(flag: bool) -> String {
    if flag { "1" } else { "0" }.to_string()
}
