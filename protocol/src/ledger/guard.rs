//! Reentrancy guard.
//!
//! One guard per ledger. Entering it from a second thread blocks until the
//! first operation finishes, which serializes every externally-calling
//! operation across the ledger. Entering it again from the thread that
//! already holds it means an external call has reached back into the
//! ledger, and is refused.

use std::cell::Cell;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::error::LedgerError;

#[derive(Debug, Default)]
pub(crate) struct ReentrancyGuard {
    lock: ReentrantMutex<Cell<bool>>,
}

impl ReentrancyGuard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Marks the ledger busy for the lifetime of the returned token.
    pub(crate) fn enter(&self) -> Result<Entered<'_>, LedgerError> {
        let held = self.lock.lock();
        if held.get() {
            return Err(LedgerError::ReentrancyRejected);
        }
        held.set(true);
        Ok(Entered { held })
    }
}

/// Clears the busy flag on drop.
pub(crate) struct Entered<'a> {
    held: ReentrantMutexGuard<'a, Cell<bool>>,
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.held.set(false);
    }
}
