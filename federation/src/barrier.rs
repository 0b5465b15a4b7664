//! Checkpoint write ordering for cooperating sub-processes on one node.
//!
//! When distributed local training runs several sub-workers against one
//! checkpoint path, exactly one elected writer persists the mapping; everyone
//! else blocks on [`FirstWriterBarrier::wait_written`] before reading the
//! same path.

use parking_lot::{Condvar, Mutex};

/// Rendezvous between one writer and any number of readers, per round.
#[derive(Debug, Default)]
pub struct FirstWriterBarrier {
    written: Mutex<Option<usize>>,
    cond: Condvar,
}

impl FirstWriterBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the checkpoint for `round` as written and wakes all waiters.
    /// Only the elected writer calls this.
    pub fn publish(&self, round: usize) {
        let mut written = self.written.lock();
        *written = (*written).max(Some(round));
        self.cond.notify_all();
    }

    /// Blocks until the checkpoint for `round` (or a later one) is visible.
    pub fn wait_written(&self, round: usize) {
        let mut written = self.written.lock();
        while written.is_none_or(|w| w < round) {
            self.cond.wait(&mut written);
        }
    }

    /// Non-blocking query, mostly for logging.
    pub fn latest_written(&self) -> Option<usize> {
        *self.written.lock()
    }
}
