//! slotpool - drive a fixed-size MySQL connection pool
//!
//! Builds the pool, starts the worker threads with a staggered start so the
//! slots do not all connect at once, then waits for one line on stdin.
//!
//! Exit codes: 1 when the pool cannot be built or a worker cannot be
//! started, 0 after the console read.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use slotpool::{FileAuditSink, Pool};
use tracing::{error, info};

mod cli;
mod tracing_setup;
mod worker;

use cli::Cli;
use tracing_setup::TracingConfig;
use worker::WorkerSettings;

fn run(cli: &Cli) -> Result<()> {
    let config = cli.pool_config()?;
    let audit = FileAuditSink::new(&cli.audit_path);
    let pool = Arc::new(
        Pool::connect_mysql(config, audit).context("Failed to create connection pool")?,
    );

    let settings = Arc::new(WorkerSettings {
        query: cli.query.clone().into_bytes(),
        audit_value: cli.audit_value.clone(),
        interval: cli.interval(),
    });
    let workers = worker::spawn_workers(&pool, &settings, cli.workers, cli.stagger())?;
    info!(workers = workers.len(), "All workers started");

    println!("Press any key to exit...");
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("Failed to read from console")?;

    let stats = pool.stats();
    info!(
        dispatched = stats.dispatched,
        succeeded = stats.succeeded,
        failed = stats.failed,
        "Shutting down"
    );
    pool.close_all();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_setup::init_tracing(&TracingConfig { debug: cli.debug }).ok();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
