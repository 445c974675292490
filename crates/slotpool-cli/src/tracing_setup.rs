//! Tracing setup for the slotpool binary.
//!
//! Usage:
//!   slotpool --debug ...              # Debug logging to console
//!   RUST_LOG=slotpool=debug slotpool  # Fine-grained log control
//!
//! Lines are prefixed with a local `[%Y-%m-%d %H:%M:%S]` timestamp.

use std::fmt;
use std::io::IsTerminal;

use anyhow::{Result, anyhow};
use chrono::Local;
use slotpool::audit::TIMESTAMP_FORMAT;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

/// Tracing configuration options
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Enable debug logging (sets RUST_LOG=debug if not already set)
    pub debug: bool,
}

/// Local wall-clock timestamp in brackets.
#[derive(Debug, Clone, Copy)]
struct LocalTimestamp;

impl FormatTime for LocalTimestamp {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "[{}]", Local::now().format(TIMESTAMP_FORMAT))
    }
}

/// Initialize console tracing.
pub fn init_tracing(config: &TracingConfig) -> Result<()> {
    let filter = if config.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(LocalTimestamp)
        .with_target(config.debug)
        .with_thread_names(config.debug)
        .with_ansi(std::io::stdout().is_terminal())
        .compact()
        .try_init()
        .map_err(|err| anyhow!(err))
}
