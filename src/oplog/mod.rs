//! The append-only operation log.
//!
//! This module hides the store representation behind the [`Oplog`] trait:
//! the engine appends typed entries, recovery reads them back, and the query
//! services page over them. The only implementation shipped here is the
//! in-memory store; the trait is the logical contract a durable backend has
//! to satisfy (the on-disk layout itself is out of scope).

use async_trait::async_trait;

mod entry;
mod error;
pub mod memory;
mod query;
mod replay;

pub use entry::{LogLevel, OplogEntry, UpdateMode, WorkerInvocation};
pub use error::{OplogError, Result};
pub use memory::InMemoryOplog;
pub use query::{OplogCursor, OplogSearchCursor};
pub use replay::ReplayState;

use crate::core::{OplogIndex, WorkerId};

/// Per-worker append-only log of typed entries.
///
/// `append` always succeeds locally; durability is confirmed separately by
/// `commit`. Entries are immutable once appended and totally ordered within
/// one worker.
#[async_trait]
pub trait Oplog: Send + Sync {
    /// Appends an entry to the worker's log and returns its index.
    async fn append(&self, worker_id: &WorkerId, entry: OplogEntry) -> Result<OplogIndex>;

    /// Reads up to `count` entries starting at `from`, in increasing index
    /// order. Returns an empty vector past the end of the log.
    async fn read(
        &self,
        worker_id: &WorkerId,
        from: OplogIndex,
        count: usize,
    ) -> Result<Vec<(OplogIndex, OplogEntry)>>;

    /// Reads the whole log for a worker.
    async fn read_all(&self, worker_id: &WorkerId) -> Result<Vec<(OplogIndex, OplogEntry)>> {
        self.read(worker_id, OplogIndex::INITIAL, usize::MAX).await
    }

    /// Index of the last appended entry, or [`OplogIndex::NONE`] for an
    /// empty log.
    async fn current_index(&self, worker_id: &WorkerId) -> Result<OplogIndex>;

    /// Blocks until the worker's entries are durable on at least
    /// `min(min_replicas, available_replicas)` replicas.
    async fn commit(&self, worker_id: &WorkerId, min_replicas: u8) -> Result<()>;

    /// Lists every worker with an oplog in this store.
    async fn workers(&self) -> Result<Vec<WorkerId>>;

    /// Removes a worker's log entirely.
    async fn delete(&self, worker_id: &WorkerId) -> Result<()>;
}
