//! Fixed-size round-robin MySQL connection pool.
//!
//! A [`Pool`] owns a fixed number of [`Slot`]s. Each slot holds at most one
//! connection behind its own lock and connects lazily on its first use.
//! Callers take slots in strict rotation with [`Pool::next_slot`] and run a
//! query with [`Pool::execute`], or do both with [`Pool::dispatch`].
//!
//! Any failure while connecting, probing or querying discards the slot's
//! connection; the next dispatch to that slot reconnects. Failures are
//! logged and never returned to the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use slotpool::{AuditRecord, FileAuditSink, Pool, PoolConfig};
//!
//! let config = PoolConfig::new(4)
//!     .host("127.0.0.1")
//!     .user("app")
//!     .password("secret")
//!     .database("inventory");
//! let pool = Pool::connect_mysql(config, FileAuditSink::new("/var/log/file.csv"))?;
//!
//! let record = AuditRecord::now(2000).to_string();
//! pool.dispatch(b"SELECT * from mytable;", &record);
//! ```

pub mod audit;
pub mod config;
pub mod driver;
pub mod pool;
pub mod slot;

pub use audit::{AuditRecord, AuditSink, FileAuditSink, NullAuditSink};
pub use config::PoolConfig;
pub use driver::{Driver, DriverConnection, MySqlDriver};
pub use pool::{Attempt, Pool, PoolStats};
pub use slot::Slot;

pub use slotpool_core::{Error, Result};
