//! Promise registry: externally completable, single-shot synchronization
//! handles addressable purely by id.
//!
//! Waiting uses the notify-then-recheck pattern: a `Notify` per promise with
//! the waiter enabled before the state re-check, so a completion racing the
//! wait is never lost.

use crate::core::{OplogIndex, PromiseId, WorkerId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Clone)]
enum PromiseState {
    Pending,
    Complete(Vec<u8>),
}

/// Out-of-band completion primitives keyed by (worker, creation log index).
///
/// Promises are owned by the worker that created them but completable by any
/// caller holding the id; the completer and awaiter need not be co-located.
#[derive(Default)]
pub struct PromiseRegistry {
    states: DashMap<PromiseId, PromiseState>,
    notifiers: DashMap<PromiseId, Arc<Notify>>,
}

impl PromiseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a promise created at the given log position.
    ///
    /// Idempotent: re-registration during replay never clobbers a completion
    /// that arrived in the meantime.
    pub fn register(&self, worker_id: &WorkerId, oplog_idx: OplogIndex) -> PromiseId {
        let id = PromiseId::new(worker_id.clone(), oplog_idx);
        self.states
            .entry(id.clone())
            .or_insert(PromiseState::Pending);
        id
    }

    /// Completes the promise with the given payload.
    ///
    /// Returns `true` on the first completion; every later attempt returns
    /// `false` and leaves the original payload untouched. Double completion
    /// is not an error.
    pub fn complete(&self, id: &PromiseId, payload: Vec<u8>) -> bool {
        let won = match self.states.entry(id.clone()) {
            Entry::Occupied(mut occupied) => match occupied.get() {
                PromiseState::Pending => {
                    occupied.insert(PromiseState::Complete(payload));
                    true
                }
                PromiseState::Complete(_) => false,
            },
            // Completion may arrive from an external caller before the
            // creating worker re-registers during replay.
            Entry::Vacant(vacant) => {
                vacant.insert(PromiseState::Complete(payload));
                true
            }
        };

        if won {
            if let Some(notify) = self.notifiers.get(id) {
                notify.notify_waiters();
            }
            debug!(promise = %id, "promise completed");
        } else {
            debug!(promise = %id, "promise already completed");
        }
        won
    }

    /// Non-blocking read of the completion payload.
    pub fn poll(&self, id: &PromiseId) -> Option<Vec<u8>> {
        match self.states.get(id).map(|s| s.clone()) {
            Some(PromiseState::Complete(payload)) => Some(payload),
            _ => None,
        }
    }

    /// Suspends until the promise is completed and returns its payload.
    pub async fn await_completion(&self, id: &PromiseId) -> Vec<u8> {
        loop {
            let notify = self
                .notifiers
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Notify::new()))
                .clone();
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(payload) = self.poll(id) {
                return payload;
            }
            notified.await;
        }
    }

    /// Removes all bookkeeping for the promise. Returns whether it existed.
    pub fn delete(&self, id: &PromiseId) -> bool {
        self.notifiers.remove(id);
        self.states.remove(id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ComponentId;

    fn promise_id() -> PromiseId {
        PromiseId::new(
            WorkerId::new(ComponentId::new(), "w"),
            OplogIndex::from_u64(3),
        )
    }

    #[tokio::test]
    async fn test_first_completion_wins() {
        let registry = PromiseRegistry::new();
        let id = promise_id();
        registry.register(&id.worker_id, id.oplog_idx);

        assert!(registry.complete(&id, b"first".to_vec()));
        assert!(!registry.complete(&id, b"second".to_vec()));
        assert_eq!(registry.poll(&id), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn test_completion_before_registration_survives_replay() {
        let registry = PromiseRegistry::new();
        let id = promise_id();

        // External caller completes before the worker replays its create.
        assert!(registry.complete(&id, b"early".to_vec()));
        registry.register(&id.worker_id, id.oplog_idx);
        assert_eq!(registry.poll(&id), Some(b"early".to_vec()));
    }

    #[tokio::test]
    async fn test_await_wakes_on_completion() {
        let registry = Arc::new(PromiseRegistry::new());
        let id = promise_id();
        registry.register(&id.worker_id, id.oplog_idx);

        let waiter = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            tokio::spawn(async move { registry.await_completion(&id).await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(registry.complete(&id, b"payload".to_vec()));
        assert_eq!(waiter.await.unwrap(), b"payload".to_vec());
    }

    #[tokio::test]
    async fn test_exactly_one_concurrent_completer_wins() {
        let registry = Arc::new(PromiseRegistry::new());
        let id = promise_id();
        registry.register(&id.worker_id, id.oplog_idx);

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                registry.complete(&id, vec![i as u8])
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_bookkeeping() {
        let registry = PromiseRegistry::new();
        let id = promise_id();
        registry.register(&id.worker_id, id.oplog_idx);
        assert!(registry.delete(&id));
        assert!(!registry.delete(&id));
        assert_eq!(registry.poll(&id), None);
    }
}
