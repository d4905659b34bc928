//! In-memory oplog store using DashMap for concurrent access.

use super::entry::OplogEntry;
use super::error::{OplogError, Result};
use super::Oplog;
use crate::core::{OplogIndex, WorkerId};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

/// In-memory oplog store.
///
/// Each worker's log is a plain `Vec<OplogEntry>`; the entry at vector
/// position `i` has oplog index `i + 1`. DashMap shards give concurrent
/// per-worker access without a global lock.
///
/// Appends are immediately durable in the only "replica" this store has, so
/// `commit` resolves as soon as the requested replica count is capped at
/// what is available.
pub struct InMemoryOplog {
    logs: DashMap<WorkerId, Vec<OplogEntry>>,
    available_replicas: u8,
}

impl InMemoryOplog {
    pub fn new() -> Self {
        Self::with_replicas(1)
    }

    /// Creates a store that reports the given replica count to `commit`.
    /// Useful for exercising the durability barrier in tests.
    pub fn with_replicas(available_replicas: u8) -> Self {
        Self {
            logs: DashMap::new(),
            available_replicas,
        }
    }

    /// Replaces matched begin/end atomic-region marker pairs with no-op
    /// entries, preserving every index so replay semantics are unchanged.
    ///
    /// Unmatched begins are left alone: they still carry recovery meaning.
    pub fn compact_atomic_markers(&self, worker_id: &WorkerId) -> Result<usize> {
        let mut log = self
            .logs
            .get_mut(worker_id)
            .ok_or_else(|| OplogError::NoSuchWorker(worker_id.clone()))?;

        let mut matched: Vec<(usize, usize)> = Vec::new();
        let mut open: Vec<(OplogIndex, usize)> = Vec::new();
        for (pos, entry) in log.iter().enumerate() {
            match entry {
                OplogEntry::BeginAtomicRegion { .. } => {
                    open.push((OplogIndex::from_u64(pos as u64 + 1), pos));
                }
                OplogEntry::EndAtomicRegion { begin_index, .. } => {
                    if let Some(open_pos) = open.iter().position(|(idx, _)| idx == begin_index) {
                        let (_, begin_pos) = open.remove(open_pos);
                        matched.push((begin_pos, pos));
                    }
                }
                _ => {}
            }
        }

        let elided = matched.len() * 2;
        for (begin_pos, end_pos) in matched {
            log[begin_pos] = OplogEntry::NoOp {
                timestamp: Utc::now(),
            };
            log[end_pos] = OplogEntry::NoOp {
                timestamp: Utc::now(),
            };
        }

        debug!(worker = %worker_id, elided, "compacted matched atomic region markers");
        Ok(elided)
    }
}

impl Default for InMemoryOplog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Oplog for InMemoryOplog {
    async fn append(&self, worker_id: &WorkerId, entry: OplogEntry) -> Result<OplogIndex> {
        let mut log = self.logs.entry(worker_id.clone()).or_default();
        log.push(entry);
        Ok(OplogIndex::from_u64(log.len() as u64))
    }

    async fn read(
        &self,
        worker_id: &WorkerId,
        from: OplogIndex,
        count: usize,
    ) -> Result<Vec<(OplogIndex, OplogEntry)>> {
        let log = self
            .logs
            .get(worker_id)
            .ok_or_else(|| OplogError::NoSuchWorker(worker_id.clone()))?;

        let start = from.as_u64().max(OplogIndex::INITIAL.as_u64()) as usize - 1;
        Ok(log
            .iter()
            .enumerate()
            .skip(start)
            .take(count)
            .map(|(pos, entry)| (OplogIndex::from_u64(pos as u64 + 1), entry.clone()))
            .collect())
    }

    async fn current_index(&self, worker_id: &WorkerId) -> Result<OplogIndex> {
        Ok(self
            .logs
            .get(worker_id)
            .map(|log| OplogIndex::from_u64(log.len() as u64))
            .unwrap_or(OplogIndex::NONE))
    }

    async fn commit(&self, worker_id: &WorkerId, min_replicas: u8) -> Result<()> {
        // Appends are synchronous here, so the barrier resolves immediately
        // once the requested count is capped at the available replicas.
        let effective = min_replicas.min(self.available_replicas);
        debug!(worker = %worker_id, requested = min_replicas, effective, "commit barrier");
        Ok(())
    }

    async fn workers(&self) -> Result<Vec<WorkerId>> {
        let mut ids: Vec<WorkerId> = self.logs.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, worker_id: &WorkerId) -> Result<()> {
        self.logs.remove(worker_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ComponentId;

    fn worker() -> WorkerId {
        WorkerId::new(ComponentId::new(), "w")
    }

    fn noop() -> OplogEntry {
        OplogEntry::NoOp {
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_assigns_monotonic_indices() {
        let store = InMemoryOplog::new();
        let id = worker();
        assert_eq!(store.append(&id, noop()).await.unwrap(), OplogIndex::INITIAL);
        assert_eq!(
            store.append(&id, noop()).await.unwrap(),
            OplogIndex::from_u64(2)
        );
        assert_eq!(
            store.current_index(&id).await.unwrap(),
            OplogIndex::from_u64(2)
        );
    }

    #[tokio::test]
    async fn test_read_range() {
        let store = InMemoryOplog::new();
        let id = worker();
        for _ in 0..5 {
            store.append(&id, noop()).await.unwrap();
        }
        let page = store.read(&id, OplogIndex::from_u64(2), 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].0, OplogIndex::from_u64(2));
        assert_eq!(page[1].0, OplogIndex::from_u64(3));

        let past_end = store.read(&id, OplogIndex::from_u64(9), 10).await.unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn test_read_unknown_worker_fails() {
        let store = InMemoryOplog::new();
        let err = store.read(&worker(), OplogIndex::INITIAL, 1).await;
        assert!(matches!(err, Err(OplogError::NoSuchWorker(_))));
    }

    #[tokio::test]
    async fn test_commit_caps_at_available_replicas() {
        let store = InMemoryOplog::with_replicas(2);
        let id = worker();
        store.append(&id, noop()).await.unwrap();
        // Requesting more replicas than exist must not block forever.
        store.commit(&id, 5).await.unwrap();
    }

    #[tokio::test]
    async fn test_compaction_elides_matched_markers_only() {
        let store = InMemoryOplog::new();
        let id = worker();
        let now = Utc::now();
        store
            .append(&id, OplogEntry::BeginAtomicRegion { timestamp: now })
            .await
            .unwrap();
        store.append(&id, noop()).await.unwrap();
        store
            .append(
                &id,
                OplogEntry::EndAtomicRegion {
                    timestamp: now,
                    begin_index: OplogIndex::INITIAL,
                },
            )
            .await
            .unwrap();
        store
            .append(&id, OplogEntry::BeginAtomicRegion { timestamp: now })
            .await
            .unwrap();

        let elided = store.compact_atomic_markers(&id).unwrap();
        assert_eq!(elided, 2);

        let entries = store.read_all(&id).await.unwrap();
        // Indices preserved; matched pair replaced by no-ops.
        assert_eq!(entries.len(), 4);
        assert!(matches!(entries[0].1, OplogEntry::NoOp { .. }));
        assert!(matches!(entries[2].1, OplogEntry::NoOp { .. }));
        // The unmatched begin still carries recovery meaning.
        assert!(matches!(entries[3].1, OplogEntry::BeginAtomicRegion { .. }));
    }
}
