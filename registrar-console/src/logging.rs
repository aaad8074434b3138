#![forbid(unsafe_code)]

use crate::config::LoggingConfig;
use anyhow::{anyhow, Result};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `cfg.level`. Output goes to stderr, as JSON unless
/// `cfg.format` is `plain`.
pub fn init_tracing(cfg: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));

    let installed = if cfg.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    };
    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
