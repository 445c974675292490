//! Connection slots.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::driver::DriverConnection;

/// One unit of pool capacity: zero or one connection behind its own lock.
///
/// The handle is only reachable through [`Slot::with_handle`], which holds
/// the lock for the duration of the closure and releases it on every exit
/// path, unwinding included.
pub struct Slot<C> {
    id: usize,
    handle: Mutex<Option<C>>,
    /// Mirror of `handle.is_some()` readable without taking the lock
    connected: AtomicBool,
}

impl<C> Slot<C> {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            handle: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Position of the slot in the pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether the slot held a live handle when last released.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Run `f` with exclusive access to the slot's handle.
    pub(crate) fn with_handle<R>(&self, f: impl FnOnce(&mut Option<C>) -> R) -> R {
        let mut handle = self.handle.lock();
        let result = f(&mut *handle);
        self.connected.store(handle.is_some(), Ordering::Release);
        result
    }
}

impl<C: DriverConnection> Slot<C> {
    /// Close the slot's connection, if any. The next dispatch to this slot
    /// connects from scratch.
    ///
    /// Waits for an in-flight execution on this slot to finish.
    pub fn close_handle(&self) -> bool {
        self.with_handle(|handle| match handle.take() {
            Some(conn) => {
                conn.close();
                true
            }
            None => false,
        })
    }
}

impl<C> std::fmt::Debug for Slot<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}
