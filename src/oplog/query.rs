//! Paginated enumeration over one worker's oplog: unfiltered (`get-oplog`)
//! and expression-filtered (`search-oplog`).

use super::entry::OplogEntry;
use super::{Oplog, Result};
use crate::core::{OplogIndex, WorkerId};
use std::sync::Arc;

/// Unfiltered paginated cursor over a worker's log.
///
/// Chunks come back in increasing index order; `get_next` returns `None`
/// once the log is exhausted. A cursor is finite and restartable only by
/// constructing a fresh one.
pub struct OplogCursor {
    oplog: Arc<dyn Oplog>,
    worker_id: WorkerId,
    next: OplogIndex,
    page_size: usize,
    done: bool,
}

impl OplogCursor {
    pub fn new(oplog: Arc<dyn Oplog>, worker_id: WorkerId, page_size: usize) -> Self {
        Self::starting_at(oplog, worker_id, OplogIndex::INITIAL, page_size)
    }

    /// Cursor whose first chunk begins at `from` instead of the log start.
    pub fn starting_at(
        oplog: Arc<dyn Oplog>,
        worker_id: WorkerId,
        from: OplogIndex,
        page_size: usize,
    ) -> Self {
        Self {
            oplog,
            worker_id,
            next: if from == OplogIndex::NONE {
                OplogIndex::INITIAL
            } else {
                from
            },
            page_size: page_size.max(1),
            done: false,
        }
    }

    /// Returns the next chunk of entries, or `None` when exhausted.
    pub async fn get_next(&mut self) -> Result<Option<Vec<(OplogIndex, OplogEntry)>>> {
        if self.done {
            return Ok(None);
        }
        let chunk = self
            .oplog
            .read(&self.worker_id, self.next, self.page_size)
            .await?;
        match chunk.last() {
            Some((last_idx, _)) => {
                self.next = last_idx.next();
                Ok(Some(chunk))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

/// Expression-filtered paginated cursor over a worker's log.
///
/// The query is a whitespace-separated conjunction of terms; an entry
/// matches when every term occurs (case-insensitively) in its kind name or
/// rendered payload. Chunks may come back smaller than the page size after
/// filtering; empty pages are skipped rather than returned.
pub struct OplogSearchCursor {
    inner: OplogCursor,
    terms: Vec<String>,
}

impl OplogSearchCursor {
    pub fn new(
        oplog: Arc<dyn Oplog>,
        worker_id: WorkerId,
        query: impl AsRef<str>,
        page_size: usize,
    ) -> Self {
        let terms = query
            .as_ref()
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        Self {
            inner: OplogCursor::new(oplog, worker_id, page_size),
            terms,
        }
    }

    /// Returns the next chunk of matching entries, or `None` when exhausted.
    pub async fn get_next(&mut self) -> Result<Option<Vec<(OplogIndex, OplogEntry)>>> {
        loop {
            match self.inner.get_next().await? {
                None => return Ok(None),
                Some(chunk) => {
                    let matching: Vec<(OplogIndex, OplogEntry)> = chunk
                        .into_iter()
                        .filter(|(_, entry)| entry_matches(entry, &self.terms))
                        .collect();
                    if !matching.is_empty() {
                        return Ok(Some(matching));
                    }
                    // Whole page filtered out; keep scanning forward.
                }
            }
        }
    }
}

fn entry_matches(entry: &OplogEntry, terms: &[String]) -> bool {
    if terms.is_empty() {
        return true;
    }
    let rendered = format!(
        "{} {}",
        entry.kind(),
        serde_json::to_string(entry).unwrap_or_default()
    )
    .to_lowercase();
    terms.iter().all(|term| rendered.contains(term))
}
