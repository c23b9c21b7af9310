//! Hands apply results back to whoever proposed the entry.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::etcdserverpb::ResponseMessage;

/// Registry of pending proposals keyed by log index.
#[derive(Default)]
pub struct Wait {
    waiters: Mutex<HashMap<u64, oneshot::Sender<ResponseMessage>>>,
}

impl Wait {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in the result of the entry at `index`. A second
    /// registration for the same index replaces the first, whose receiver then
    /// resolves with an error.
    pub fn register(&self, index: u64) -> oneshot::Receiver<ResponseMessage> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(index, tx);
        rx
    }

    /// Delivers `resp` to the waiter for `index`, if any. Returns whether a
    /// waiter was registered.
    pub fn trigger(&self, index: u64, resp: ResponseMessage) -> bool {
        match self.waiters.lock().remove(&index) {
            // The receiver may have been dropped; the result is simply discarded.
            Some(tx) => {
                let _ = tx.send(resp);
                true
            }
            None => false,
        }
    }

    /// Drops the waiter for `index` without a result; its receiver resolves
    /// with an error. Returns whether a waiter was registered.
    pub fn cancel(&self, index: u64) -> bool {
        self.waiters.lock().remove(&index).is_some()
    }

    pub fn is_registered(&self, index: u64) -> bool {
        self.waiters.lock().contains_key(&index)
    }
}
