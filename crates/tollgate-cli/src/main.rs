//! Tollgate CLI - device login and authenticated API calls.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use client_runtime::ClientRuntime;
use runtime_config_and_utils::{init_logging, Config, Paths};
use std::path::PathBuf;
use tracing::debug;

/// Tollgate CLI - log in with a device code and call the API.
#[derive(Parser)]
#[command(name = "tollgate")]
#[command(about = "Tollgate CLI for device login and API requests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Credential context (e.g. an organization slug)
    #[arg(short, long, default_value = "default", global = true, env = "TOLLGATE_CONTEXT")]
    context: String,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (config, tokens, logs). Defaults to ~/.tollgate
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with a device code
    Login,

    /// Forget the cached credential
    Logout,

    /// Show authentication status
    Status,

    /// Send a GET request to the API
    Get {
        /// Request path, e.g. /v1/me
        path: String,
    },

    /// Send a POST request to the API
    Post {
        /// Request path, e.g. /v1/charges
        path: String,
        /// JSON request body
        #[arg(long)]
        json: Option<String>,
    },
}

fn load_settings(base_dir: Option<PathBuf>) -> anyhow::Result<(Config, Paths)> {
    let paths = match base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;
    Ok((config, paths))
}

fn build_runtime(config: Config, paths: &Paths) -> anyhow::Result<ClientRuntime> {
    debug!(
        base_dir = %paths.base_dir().display(),
        debug = config.debug,
        "configuration loaded"
    );

    Ok(ClientRuntime::new(
        config,
        paths,
        sidecar_supervisor::default_hooks(),
    )?)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (config, paths) = match load_settings(cli.base_dir) {
        Ok(settings) => settings,
        Err(e) => {
            output::print_error(&e.to_string(), &cli.format);
            std::process::exit(1);
        }
    };

    init_logging(&config, &paths, cli.log_level.as_deref());

    let runtime = match build_runtime(config, &paths) {
        Ok(runtime) => runtime,
        Err(e) => {
            output::print_error(&e.to_string(), &cli.format);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Login => commands::login(&runtime, &cli.context, &cli.format).await,
        Commands::Logout => commands::logout(&runtime, &cli.context, &cli.format),
        Commands::Status => commands::status(&runtime, &cli.context, &cli.format),
        Commands::Get { path } => commands::get(&runtime, &cli.context, &path).await,
        Commands::Post { path, json } => {
            commands::post(&runtime, &cli.context, &path, json.as_deref()).await
        }
    };

    runtime.shutdown().await;

    if let Err(e) = result {
        output::print_failure(&e, &cli.format);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_is_unset_unless_given() {
        let cli = Cli::try_parse_from(["tollgate", "status"]).unwrap();
        assert!(cli.log_level.is_none());

        let cli = Cli::try_parse_from(["tollgate", "status", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn settings_come_from_the_given_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{ "log_level": "info", "debug": true }"#,
        )
        .unwrap();

        let (config, paths) = load_settings(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(paths.dev_log_file(), dir.path().join("logs/dev.jsonl"));

        let log = runtime_config_and_utils::log_config("tollgate-cli", &config, &paths, None);
        assert_eq!(log.log_path, Some(dir.path().join("logs/dev.jsonl")));
        assert!(log.directives.iter().any(|d| d.starts_with("request_executor=")));
    }
}
