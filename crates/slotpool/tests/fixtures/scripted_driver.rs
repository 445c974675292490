//! In-memory driver double whose failures are scripted by the test.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use slotpool::{Driver, DriverConnection};
use slotpool_core::{ConnectionErrorKind, Error, QueryError, QueryErrorKind, Result};

/// Shared script and counters for every handle a [`ScriptedDriver`] creates.
#[derive(Debug, Default)]
pub struct Script {
    /// Number of upcoming `init` calls that fail
    pub fail_init: AtomicUsize,
    /// Number of upcoming `connect` calls that fail
    pub fail_connect: AtomicUsize,
    /// Number of upcoming queries that fail
    pub fail_query: AtomicUsize,
    /// Rows each successful query leaves pending
    pub rows_per_query: AtomicU64,
    /// Time a query keeps the handle busy
    pub query_delay_ms: AtomicU64,

    pub inits: AtomicUsize,
    pub connects: AtomicUsize,
    pub pings: AtomicUsize,
    pub queries: AtomicUsize,
    pub drains: AtomicUsize,
    pub closes: AtomicUsize,

    /// Queries running right now, across all handles
    pub active: AtomicUsize,
    /// Highest value `active` reached
    pub peak_active: AtomicUsize,

    handles: Mutex<Vec<Arc<HandleState>>>,
    queries_seen: Mutex<Vec<Vec<u8>>>,
}

/// Server-side view of one handle.
#[derive(Debug, Default)]
pub struct HandleState {
    pub alive: AtomicBool,
    pub in_use: AtomicUsize,
    /// Set if two callers ever used this handle at once
    pub overlapped: AtomicBool,
    pending_rows: AtomicU64,
}

impl Script {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Handles in creation order.
    pub fn handles(&self) -> Vec<Arc<HandleState>> {
        self.handles.lock().clone()
    }

    /// Drop the server side of the `index`-th handle created.
    pub fn kill_handle(&self, index: usize) {
        self.handles.lock()[index]
            .alive
            .store(false, Ordering::SeqCst);
    }

    pub fn queries_seen(&self) -> Vec<Vec<u8>> {
        self.queries_seen.lock().clone()
    }

    pub fn any_overlap(&self) -> bool {
        self.handles
            .lock()
            .iter()
            .any(|h| h.overlapped.load(Ordering::SeqCst))
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn query_error(kind: QueryErrorKind, message: &str) -> Error {
    Error::Query(QueryError {
        kind,
        sqlstate: None,
        code: None,
        message: message.to_string(),
        source: None,
    })
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedDriver {
    pub script: Arc<Script>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Driver for ScriptedDriver {
    type Conn = ScriptedConnection;

    fn init(&self) -> Result<ScriptedConnection> {
        self.script.inits.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.script.fail_init) {
            return Err(Error::connection(
                ConnectionErrorKind::Init,
                "out of memory creating handle",
            ));
        }

        let state = Arc::new(HandleState::default());
        self.script.handles.lock().push(Arc::clone(&state));
        Ok(ScriptedConnection {
            script: Arc::clone(&self.script),
            state,
        })
    }
}

#[derive(Debug)]
pub struct ScriptedConnection {
    script: Arc<Script>,
    state: Arc<HandleState>,
}

impl DriverConnection for ScriptedConnection {
    fn connect(&mut self) -> Result<()> {
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.script.fail_connect) {
            return Err(Error::connection(
                ConnectionErrorKind::Refused,
                "Can't connect to MySQL server on '127.0.0.1' (111)",
            ));
        }
        self.state.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn ping(&mut self) -> Result<()> {
        self.script.pings.fetch_add(1, Ordering::SeqCst);
        if self.state.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::connection(
                ConnectionErrorKind::Ping,
                "MySQL server has gone away",
            ))
        }
    }

    fn real_query(&mut self, query: &[u8]) -> Result<()> {
        if self.state.in_use.fetch_add(1, Ordering::SeqCst) != 0 {
            self.state.overlapped.store(true, Ordering::SeqCst);
        }
        let active = self.script.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.peak_active.fetch_max(active, Ordering::SeqCst);

        let result = self.run_query(query);

        self.script.active.fetch_sub(1, Ordering::SeqCst);
        self.state.in_use.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn drain(&mut self) -> Result<u64> {
        self.script.drains.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.pending_rows.swap(0, Ordering::SeqCst))
    }

    fn close(self) {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        self.state.alive.store(false, Ordering::SeqCst);
    }
}

impl ScriptedConnection {
    fn run_query(&mut self, query: &[u8]) -> Result<()> {
        self.script.queries.fetch_add(1, Ordering::SeqCst);
        self.script.queries_seen.lock().push(query.to_vec());

        if !self.state.alive.load(Ordering::SeqCst) {
            return Err(Error::connection(
                ConnectionErrorKind::Disconnected,
                "Lost connection to MySQL server during query",
            ));
        }
        if self.state.pending_rows.load(Ordering::SeqCst) != 0 {
            return Err(query_error(
                QueryErrorKind::NotReady,
                "Commands out of sync; you can't run this command now",
            ));
        }
        if take_one(&self.script.fail_query) {
            return Err(query_error(
                QueryErrorKind::Syntax,
                "You have an error in your SQL syntax",
            ));
        }

        let delay = self.script.query_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        self.state
            .pending_rows
            .store(self.script.rows_per_query.load(Ordering::SeqCst), Ordering::SeqCst);
        Ok(())
    }
}
