//! Worker threads that keep the pool busy.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use slotpool::{AuditRecord, Driver, Pool};
use tracing::{debug, info};

/// What every worker runs.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub query: Vec<u8>,
    pub audit_value: String,
    pub interval: Duration,
}

/// Start `count` workers, pausing `stagger` after each start.
///
/// Workers run until the process exits. Fails on the first thread that
/// cannot be spawned; workers started before it keep running.
pub fn spawn_workers<D>(
    pool: &Arc<Pool<D>>,
    settings: &Arc<WorkerSettings>,
    count: usize,
    stagger: Duration,
) -> Result<Vec<JoinHandle<()>>>
where
    D: Driver + 'static,
{
    let mut handles = Vec::with_capacity(count);
    for n in 0..count {
        let pool = Arc::clone(pool);
        let settings = Arc::clone(settings);
        let handle = thread::Builder::new()
            .name(format!("worker-{n}"))
            .spawn(move || run_worker(n, &pool, &settings))
            .with_context(|| format!("Failed to spawn worker {n}"))?;
        handles.push(handle);
        thread::sleep(stagger);
    }
    Ok(handles)
}

fn run_worker<D: Driver>(n: usize, pool: &Pool<D>, settings: &WorkerSettings) {
    info!("[worker-{}] started", n);
    loop {
        let record = AuditRecord::now(&settings.audit_value).to_string();
        let attempt = pool.dispatch(&settings.query, &record);
        debug!(worker = n, %attempt, "dispatch finished");
        thread::sleep(settings.interval);
    }
}
