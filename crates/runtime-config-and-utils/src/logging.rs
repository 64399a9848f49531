//! Logging initialization for Tollgate binaries.
//!
//! Thin wrapper over the observability package: structured JSONL goes to
//! `<base dir>/logs/dev.jsonl`, with a compact copy on stderr.

use crate::{Config, Paths};

/// Target raised to debug when request tracing is on.
const REQUEST_TRACE_DIRECTIVE: &str = "request_executor=debug";

/// Initialize the logging system for the CLI.
///
/// `level_override` (from `--log-level`) wins over `config.log_level`;
/// `RUST_LOG` wins over both. Lines go to the JSONL file under `paths`.
///
/// ```ignore
/// let config = Config::load(&paths)?;
/// init_logging(&config, &paths, None);
/// tracing::info!("runtime started");
/// ```
pub fn init_logging(config: &Config, paths: &Paths, level_override: Option<&str>) {
    observability::init_with_config(log_config("tollgate-cli", config, paths, level_override));
}

/// Resolve the observability settings for `service_name`.
pub fn log_config(
    service_name: &str,
    config: &Config,
    paths: &Paths,
    level_override: Option<&str>,
) -> observability::LogConfig {
    let level = level_override.unwrap_or(&config.log_level);
    let mut directives = Vec::new();
    if config.debug {
        directives.push(REQUEST_TRACE_DIRECTIVE.to_string());
    }

    observability::LogConfig {
        service_name: service_name.into(),
        default_level: parse_level(level).to_string().to_ascii_lowercase(),
        directives,
        log_path: Some(paths.dev_log_file()),
        also_stderr: true,
    }
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
