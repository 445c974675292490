//! Audit sink that keeps records in memory.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use slotpool::AuditSink;

#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<String>>,
    /// When set, every record fails like an unwritable file
    pub failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let sink = Self::default();
        sink.failing.store(true, Ordering::SeqCst);
        sink
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

impl AuditSink for RecordingSink {
    fn record(&self, entry: &str) -> io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "permission denied: /var/log/file.csv",
            ));
        }
        self.entries.lock().push(entry.to_string());
        Ok(())
    }
}
