//! Configuration, filesystem layout, and logging setup shared by the Tollgate crates.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, DEFAULT_LOG_LEVEL, DEFAULT_SIDECAR_BINARY, DEFAULT_WEB_ORIGIN};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, log_config, parse_level};
pub use paths::Paths;
