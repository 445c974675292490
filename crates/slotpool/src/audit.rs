//! Audit trail written once per dispatch.
//!
//! The pool calls [`AuditSink::record`] while it holds the cursor lock, so
//! records arrive one at a time and in dispatch order. Sinks therefore need
//! no locking of their own as long as they are only driven by a pool.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use slotpool_core::{Error, PoolError, PoolErrorKind};

/// Timestamp layout of audit records and log lines.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    /// Append one record. A failure is reported to the caller, which logs it
    /// and carries on.
    fn record(&self, entry: &str) -> io::Result<()>;
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn record(&self, entry: &str) -> io::Result<()> {
        (**self).record(entry)
    }
}

impl<T: AuditSink + ?Sized> AuditSink for Box<T> {
    fn record(&self, entry: &str) -> io::Result<()> {
        (**self).record(entry)
    }
}

/// Wrap a sink failure as a non-fatal `AuditWrite` pool error.
pub(crate) fn audit_write_failed(err: io::Error) -> Error {
    Error::Pool(PoolError {
        kind: PoolErrorKind::AuditWrite,
        message: format!("failed to write audit record: {err}"),
        source: Some(Box::new(err)),
    })
}

/// Appends each record as a line to a file.
///
/// The file is opened in append mode for every record and closed again, so
/// it may be rotated or removed while the pool runs.
#[derive(Debug, Clone)]
pub struct FileAuditSink {
    path: PathBuf,
}

impl FileAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, entry: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        // One write per record keeps concurrent appenders from interleaving.
        file.write_all(format!("{entry}\n").as_bytes())
    }
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _entry: &str) -> io::Result<()> {
        Ok(())
    }
}

/// One audit line: `"<timestamp>", "", "<value>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    timestamp: NaiveDateTime,
    value: String,
}

impl AuditRecord {
    /// A record stamped with the current local time.
    pub fn now(value: impl fmt::Display) -> Self {
        Self::at(Local::now().naive_local(), value)
    }

    pub fn at(timestamp: NaiveDateTime, value: impl fmt::Display) -> Self {
        Self {
            timestamp,
            value: value.to_string(),
        }
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\", \"\", \"{}\"",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.value
        )
    }
}
