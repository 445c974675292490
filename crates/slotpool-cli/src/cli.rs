//! Command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use slotpool::PoolConfig;

#[derive(Parser, Debug)]
#[command(
    name = "slotpool",
    author,
    version,
    about = "Drive a fixed-size MySQL connection pool with a fleet of worker threads",
    long_about = "Starts a round-robin pool of lazily connected MySQL slots and a set of \
                  worker threads that each run one query per interval against it. Every \
                  dispatch appends an audit line. Press enter to stop."
)]
pub struct Cli {
    /// JSON file with pool settings; flags given on the command line win
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of pooled connections [default: 4]
    #[arg(long)]
    pub size: Option<usize>,

    /// MySQL host
    #[arg(long, env = "SLOTPOOL_HOST")]
    pub host: Option<String>,

    /// MySQL user
    #[arg(long, env = "SLOTPOOL_USER")]
    pub user: Option<String>,

    /// MySQL password
    #[arg(long, env = "SLOTPOOL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Default database
    #[arg(long, env = "SLOTPOOL_DATABASE")]
    pub database: Option<String>,

    /// MySQL port [default: 3306]
    #[arg(long)]
    pub port: Option<u16>,

    /// Bound on establishing one connection, in seconds [default: 10]
    #[arg(long, value_name = "SECS")]
    pub connect_timeout_secs: Option<u64>,

    /// Read/write timeout for queries, in seconds
    #[arg(long, value_name = "SECS")]
    pub read_timeout_secs: Option<u64>,

    /// Number of worker threads
    #[arg(long, default_value_t = 20)]
    pub workers: usize,

    /// Delay between starting two workers, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 500)]
    pub stagger_ms: u64,

    /// Pause between two queries of one worker, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    pub interval_ms: u64,

    /// Query each worker runs
    #[arg(long, default_value = "SELECT * from mytable;")]
    pub query: String,

    /// File the audit lines are appended to
    #[arg(long, value_name = "FILE", default_value = "/var/log/file.csv")]
    pub audit_path: PathBuf,

    /// Number written in the last audit column
    #[arg(long, default_value = "2000")]
    pub audit_value: String,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Pool settings: defaults, then the config file, then flags.
    pub fn pool_config(&self) -> Result<PoolConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => PoolConfig::default(),
        };

        if let Some(size) = self.size {
            config.size = size;
        }
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(user) = &self.user {
            config.user.clone_from(user);
        }
        if let Some(password) = &self.password {
            config.password.clone_from(password);
        }
        if let Some(database) = &self.database {
            config.database.clone_from(database);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.connect_timeout_secs {
            config.connect_timeout_secs = secs;
        }
        if self.read_timeout_secs.is_some() {
            config.read_timeout_secs = self.read_timeout_secs;
        }

        Ok(config)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
