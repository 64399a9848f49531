//! Level filter shared by every output layer.

use crate::LogConfig;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` when set, else the configured default level, plus the
/// configured per-target directives. Unparsable directives are skipped.
pub(crate) fn env_filter(config: &LogConfig) -> EnvFilter {
    let base = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));
    with_directives(base, &config.directives)
}

fn with_directives(mut filter: EnvFilter, directives: &[String]) -> EnvFilter {
    for raw in directives {
        match raw.parse::<Directive>() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("warning: ignoring log directive {:?}: {}", raw, e),
        }
    }
    filter
}
