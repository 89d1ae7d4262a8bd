//! Pending call records
//!
//! A [`PendingCall`] is the one-shot completion token shared between the
//! awaiting caller and the native completion thread. Whichever side settles
//! it first (completion or expiry) wins; the other side is a no-op. The
//! [`PendingTable`] indexes live calls by their call identifier.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::ffi::CallId;

/// Lifecycle of a dispatched call. Both settled phases are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Issued,
    Completed,
    Expired,
}

enum Settlement<T> {
    Issued(oneshot::Sender<T>),
    Completed,
    Expired,
}

/// Completion token for one dispatched call.
pub struct PendingCall<T> {
    id: OnceLock<CallId>,
    deadline: Option<Instant>,
    state: Mutex<Settlement<T>>,
}

impl<T> PendingCall<T> {
    /// Create an issued call and the receiver its result arrives on.
    pub fn issue(deadline: Option<Instant>) -> (Arc<Self>, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let call = Arc::new(Self {
            id: OnceLock::new(),
            deadline,
            state: Mutex::new(Settlement::Issued(tx)),
        });
        (call, rx)
    }

    /// Call identifier, once the dispatch has returned one
    pub fn id(&self) -> Option<CallId> {
        self.id.get().copied()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn phase(&self) -> CallPhase {
        match *self.state.lock() {
            Settlement::Issued(_) => CallPhase::Issued,
            Settlement::Completed => CallPhase::Completed,
            Settlement::Expired => CallPhase::Expired,
        }
    }

    /// `Issued -> Completed`, delivering `value`. Returns false and drops
    /// `value` when the call already settled.
    pub fn complete(&self, value: T) -> bool {
        let tx = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, Settlement::Completed) {
                Settlement::Issued(tx) => tx,
                settled => {
                    *state = settled;
                    return false;
                }
            }
        };
        // The receiver may already be gone if the caller stopped waiting.
        let _ = tx.send(value);
        true
    }

    /// `Issued -> Expired`, dropping the sender. Returns false when the call
    /// already settled.
    pub fn expire(&self) -> bool {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, Settlement::Expired) {
            Settlement::Issued(_) => true,
            settled => {
                *state = settled;
                false
            }
        }
    }

    /// Expire the call and drop its record. Returns whether this won the settle.
    pub fn abandon(self: &Arc<Self>, table: &PendingTable<T>) -> bool {
        if self.expire() {
            table.retire(self);
            true
        } else {
            false
        }
    }
}

/// Live calls keyed by call identifier.
pub struct PendingTable<T> {
    records: Mutex<HashMap<CallId, Arc<PendingCall<T>>>>,
}

impl<T> PendingTable<T> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Bind `id` to `call` and insert it, unless the call already settled.
    ///
    /// Binding and the settled check happen under the table lock, so a
    /// completion racing ahead of the dispatch never leaves a stale record.
    pub fn register(&self, id: CallId, call: &Arc<PendingCall<T>>) -> bool {
        let mut records = self.records.lock();
        let _ = call.id.set(id);

        if call.phase() != CallPhase::Issued {
            return false;
        }

        if records.insert(id, Arc::clone(call)).is_some() {
            tracing::warn!(target: "native_bridge::pending", %id, "call identifier reused while still pending");
        }
        true
    }

    /// Drop the record for a settled call. Idempotent.
    pub fn retire(&self, call: &Arc<PendingCall<T>>) -> bool {
        let Some(id) = call.id() else {
            return false;
        };

        let mut records = self.records.lock();
        match records.get(&id) {
            Some(current) if Arc::ptr_eq(current, call) => records.remove(&id).is_some(),
            _ => false,
        }
    }

    /// Remove by identifier. A second removal returns `None`.
    pub fn remove(&self, id: CallId) -> Option<Arc<PendingCall<T>>> {
        self.records.lock().remove(&id)
    }

    pub fn contains(&self, id: CallId) -> bool {
        self.records.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl<T> Default for PendingTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
