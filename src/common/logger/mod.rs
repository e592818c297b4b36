use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub mod formatter;

pub use formatter::*;

use crate::configs::Config;

/// Builds the filter directive string from the logging section.
///
/// The HTTP stack below us is noisy at debug level, so hyper and rustls are
/// pinned to `warn` unless the user filters say otherwise.
fn filter_directives(config: &Config) -> String {
    let logging = config.logging.as_ref();
    let level = logging.and_then(|l| l.level.as_deref()).unwrap_or("info");
    let filters = logging.and_then(|l| l.filters.as_deref()).unwrap_or("");

    if filters.is_empty() {
        format!("{},hyper=warn,hyper_util=warn,rustls=warn", level)
    } else {
        format!("{},hyper=warn,hyper_util=warn,rustls=warn,{}", level, filters)
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over the config file.
pub fn init(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let use_ansi = config
        .logging
        .as_ref()
        .and_then(|l| l.ansi)
        .unwrap_or(true);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .event_format(CustomFormatter::new(use_ansi))
        .with_ansi(use_ansi);

    // A second init (tests, embedding hosts) is not an error.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init();
}
