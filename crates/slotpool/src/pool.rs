//! The pool and its query executor.
//!
//! Two lock levels, never held together:
//!
//! - the cursor lock, held by [`Pool::next_slot`] while it writes the audit
//!   record and advances the cursor;
//! - one lock per slot, held by [`Pool::execute`] for the whole
//!   connect/ping/query/drain cycle.
//!
//! Failures never leave the executor. Each attempt is logged with the slot
//! id and reported as an [`Attempt`] for callers that want to count them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use slotpool_core::{Error, PoolError, PoolErrorKind, Result};
use tracing::{debug, error, info, warn};

use crate::audit::{AuditSink, audit_write_failed};
use crate::config::PoolConfig;
use crate::driver::{Driver, DriverConnection, MySqlDriver};
use crate::slot::Slot;

/// Outcome of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attempt {
    /// Query ran and its results were drained
    Success,
    /// No handle could be created; the slot stays empty
    InitFailed,
    /// The connection could not be opened; the handle was discarded
    ConnectFailed,
    /// The existing connection failed its liveness probe and was discarded
    PingFailed,
    /// The query or draining its results failed; the handle was discarded
    QueryFailed,
}

impl Attempt {
    pub fn is_success(self) -> bool {
        self == Attempt::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Attempt::Success => "success",
            Attempt::InitFailed => "init failed",
            Attempt::ConnectFailed => "connect failed",
            Attempt::PingFailed => "ping failed",
            Attempt::QueryFailed => "query failed",
        }
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of slots
    pub size: usize,
    /// Calls to `next_slot` so far
    pub dispatched: u64,
    /// Attempts that ended in `Attempt::Success`
    pub succeeded: u64,
    /// Attempts that ended in any failure
    pub failed: u64,
    /// Slots holding a live handle
    pub connected_slots: usize,
}

/// Fixed-size pool of lazily connected slots, dispatched round-robin.
pub struct Pool<D: Driver> {
    slots: Box<[Slot<D::Conn>]>,
    /// Index of the slot handed out last
    cursor: Mutex<usize>,
    config: PoolConfig,
    driver: D,
    audit: Box<dyn AuditSink>,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl Pool<MySqlDriver> {
    /// Build a pool whose slots connect to MySQL with `config`.
    pub fn connect_mysql(config: PoolConfig, audit: impl AuditSink + 'static) -> Result<Self> {
        let driver = MySqlDriver::new(&config);
        Self::new(config, driver, audit)
    }
}

impl<D: Driver> Pool<D> {
    /// Create a pool of `config.size` empty slots.
    ///
    /// No connection is opened here; each slot connects on its first
    /// dispatch.
    pub fn new(config: PoolConfig, driver: D, audit: impl AuditSink + 'static) -> Result<Self> {
        config.validate()?;

        let mut slots = Vec::new();
        slots.try_reserve_exact(config.size).map_err(|e| {
            Error::Pool(PoolError {
                kind: PoolErrorKind::Allocation,
                message: format!("cannot allocate {} slots", config.size),
                source: Some(Box::new(e)),
            })
        })?;
        slots.extend((0..config.size).map(Slot::new));

        info!(
            size = config.size,
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Connection pool created"
        );

        Ok(Self {
            slots: slots.into_boxed_slice(),
            cursor: Mutex::new(0),
            config,
            driver,
            audit: Box::new(audit),
            dispatched: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn slots(&self) -> &[Slot<D::Conn>] {
        &self.slots
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Select the next slot round-robin.
    ///
    /// Under the cursor lock this writes `audit_record` to the audit sink,
    /// then advances the cursor and returns the slot it now points at. The
    /// first call returns slot 1 (slot 0 when the pool has one slot), so the
    /// order is `1, 2, ..., N-1, 0, 1, ...`.
    ///
    /// The record is written before the slot is chosen and does not say
    /// which slot the caller got.
    pub fn next_slot(&self, audit_record: &str) -> &Slot<D::Conn> {
        let mut cursor = self.cursor.lock();

        if let Err(e) = self.audit.record(audit_record).map_err(audit_write_failed) {
            warn!(error = %e, "Audit record dropped");
        }

        *cursor = (*cursor + 1) % self.slots.len();
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        &self.slots[*cursor]
    }

    /// Run `query` on `slot`, connecting or reconnecting as needed.
    ///
    /// Holds the slot's lock for the whole attempt. A handle that fails at
    /// any step is closed and the slot left empty; the next dispatch to the
    /// slot starts over with a fresh handle.
    pub fn execute(&self, slot: &Slot<D::Conn>, query: &[u8]) -> Attempt {
        let id = slot.id();
        let attempt = slot.with_handle(|handle| self.run(id, handle, query));

        let counter = if attempt.is_success() {
            &self.succeeded
        } else {
            &self.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
        attempt
    }

    /// `next_slot` followed by `execute`: one worker iteration.
    pub fn dispatch(&self, query: &[u8], audit_record: &str) -> Attempt {
        let slot = self.next_slot(audit_record);
        self.execute(slot, query)
    }

    // The handle is taken out of the slot and only put back after a fully
    // successful attempt, so every early return leaves the slot empty.
    fn run(&self, id: usize, handle: &mut Option<D::Conn>, query: &[u8]) -> Attempt {
        let mut conn = match handle.take() {
            Some(mut conn) => {
                if let Err(e) = conn.ping() {
                    error!(slot = id, "[{}] ping failed: {}", id, e);
                    conn.close();
                    return Attempt::PingFailed;
                }
                conn
            }
            None => {
                let mut conn = match self.driver.init() {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(slot = id, "[{}] init failed: {}", id, e);
                        return Attempt::InitFailed;
                    }
                };
                if let Err(e) = conn.connect() {
                    error!(slot = id, "[{}] connect failed: {}", id, e);
                    conn.close();
                    return Attempt::ConnectFailed;
                }
                debug!(slot = id, "[{}] connected", id);
                conn
            }
        };

        if let Err(e) = conn.real_query(query) {
            error!(slot = id, "[{}] query failed: {}", id, e);
            conn.close();
            return Attempt::QueryFailed;
        }

        match conn.drain() {
            Ok(rows) => debug!(slot = id, rows, "[{}] results drained", id),
            Err(e) => {
                error!(slot = id, "[{}] draining results failed: {}", id, e);
                conn.close();
                return Attempt::QueryFailed;
            }
        }

        info!(slot = id, "[{}] query success", id);
        *handle = Some(conn);
        Attempt::Success
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.slots.len(),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            connected_slots: self.slots.iter().filter(|s| s.is_connected()).count(),
        }
    }

    /// Close every slot's connection, waiting for in-flight executions.
    /// Returns the number of connections closed.
    pub fn close_all(&self) -> usize {
        let closed = self.slots.iter().filter(|s| s.close_handle()).count();
        info!(closed, "Closed pool connections");
        closed
    }
}

impl<D: Driver> fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("size", &self.slots.len())
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
