//! Entry point for the postlink tool.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Install the `tracing` subscriber at the requested level.
//! 3. Run the selected pass.
//!
//! Error handling is done via `anyhow`: any error is printed with its context
//! chain and the process exits non-zero, which the build treats as a failure.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use postlink::config::Config;

fn main() -> Result<()> {
    let config = Config::parse();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("invalid log level '{}'", config.log_level))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let pass = config.command.pass();
    tracing::debug!("running {}", pass.name());
    pass.execute()
        .with_context(|| format!("{} failed", pass.name()))
}
