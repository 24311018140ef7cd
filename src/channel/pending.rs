//! Pending correlation table
//!
//! One entry per outstanding correlated request. An entry is removed exactly
//! once: by the dispatcher when the reply arrives, or by the waiting caller
//! when the deadline passes or the call is abandoned.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::context::ContextRef;

use super::config::Operation;
use super::envelope::CorrelationId;
use super::message::BridgeReply;

/// Waiting continuation for one correlated request
#[derive(Debug)]
pub(super) struct PendingCorrelation {
    pub operation: Operation,
    pub context: ContextRef,
    pub issued_at: Instant,
    pub resolve: oneshot::Sender<BridgeReply>,
}

/// Table of outstanding correlations
#[derive(Debug, Default)]
pub(super) struct PendingTable {
    entries: Mutex<HashMap<CorrelationId, PendingCorrelation>>,
}

impl PendingTable {
    pub fn insert(&self, id: CorrelationId, pending: PendingCorrelation) {
        self.entries.lock().insert(id, pending);
    }

    /// Remove an entry; only the first caller for a given id gets it
    pub fn take(&self, id: CorrelationId) -> Option<PendingCorrelation> {
        self.entries.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Removes the caller's entry when the waiting future finishes or is dropped
pub(super) struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: CorrelationId,
}

impl<'a> PendingGuard<'a> {
    pub fn new(table: &'a PendingTable, id: CorrelationId) -> Self {
        Self { table, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.take(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> (PendingCorrelation, oneshot::Receiver<BridgeReply>) {
        let (tx, rx) = oneshot::channel();
        let pending = PendingCorrelation {
            operation: Operation::Stop,
            context: ContextRef::new(1),
            issued_at: Instant::now(),
            resolve: tx,
        };
        (pending, rx)
    }

    #[test]
    fn test_take_is_exactly_once() {
        let table = PendingTable::default();
        let (pending, _rx) = entry();
        table.insert(CorrelationId(1), pending);

        assert!(table.take(CorrelationId(1)).is_some());
        assert!(table.take(CorrelationId(1)).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_guard_removes_on_drop() {
        let table = PendingTable::default();
        let (pending, _rx) = entry();
        table.insert(CorrelationId(5), pending);

        {
            let _guard = PendingGuard::new(&table, CorrelationId(5));
            assert_eq!(table.len(), 1);
        }

        assert_eq!(table.len(), 0);
    }
}
