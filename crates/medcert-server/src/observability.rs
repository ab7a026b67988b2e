//! Log output for the server binary.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Connection-level chatter from the HTTP stack stays quiet unless asked for.
const QUIET_TARGETS: &str = "hyper_util=warn,reqwest=warn";

/// `RUST_LOG` wins when it is set and parses; otherwise `level` from config.
pub fn log_filter(level: &str, rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .map(str::trim)
        .filter(|directives| !directives.is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(format!("{level},{QUIET_TARGETS}")))
}

pub fn init_tracing(level: &str) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let _ = tracing_subscriber::registry()
        .with(log_filter(level, rust_log.as_deref()))
        .with(fmt::layer().with_target(true))
        .try_init();
}
