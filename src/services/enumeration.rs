//! Paged worker enumeration with optional filtering.
//!
//! Two freshness modes: precise reads project metadata from live worker
//! state and the log (and refresh the cache on the way), cached reads serve
//! whatever the cache last saw. The cache is written on worker creation and
//! on precise reads only, so cached results can lag behind status changes.

use super::filter::WorkerAnyFilter;
use super::metadata::WorkerMetadata;
use crate::core::ComponentId;
use crate::executor::engine::Runtime;
use crate::executor::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Opaque position in a component's worker listing.
///
/// Valid as long as the worker set is stable; workers created or deleted
/// between pages may be skipped or seen twice, like any scan cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanCursor {
    pub cursor: u64,
}

impl ScanCursor {
    pub fn start() -> Self {
        Self::default()
    }
}

/// One page of enumeration results plus the cursor for the next page, or
/// `None` when the listing is exhausted.
#[derive(Debug, Clone)]
pub struct WorkerPage {
    pub workers: Vec<WorkerMetadata>,
    pub next: Option<ScanCursor>,
}

impl Runtime {
    /// Lists every worker of a component matching `filter`.
    pub async fn get_workers(
        &self,
        component_id: ComponentId,
        filter: Option<&WorkerAnyFilter>,
        precise: bool,
    ) -> Result<Vec<WorkerMetadata>> {
        let mut out = Vec::new();
        let mut cursor = ScanCursor::start();
        loop {
            let page = self
                .get_workers_paged(component_id, filter, cursor, 100, precise)
                .await?;
            out.extend(page.workers);
            match page.next {
                Some(next) => cursor = next,
                None => return Ok(out),
            }
        }
    }

    /// Scans one page of a component's workers.
    ///
    /// `count` bounds how many workers are scanned, not how many are
    /// returned; a page may carry fewer matches (even zero) while the
    /// cursor still advances.
    pub async fn get_workers_paged(
        &self,
        component_id: ComponentId,
        filter: Option<&WorkerAnyFilter>,
        cursor: ScanCursor,
        count: u64,
        precise: bool,
    ) -> Result<WorkerPage> {
        // Stable scan order: worker name, over the oplog's worker set
        // rather than the in-memory one, since the log is the source of
        // truth for existence.
        let mut ids: Vec<_> = self
            .inner
            .oplog
            .workers()
            .await?
            .into_iter()
            .filter(|id| id.component_id == component_id)
            .collect();
        ids.sort_by(|a, b| a.worker_name.cmp(&b.worker_name));

        let start = cursor.cursor as usize;
        let window: Vec<_> = ids.iter().skip(start).take(count as usize).collect();
        let scanned = window.len();

        let mut workers = Vec::new();
        for id in window {
            let metadata = if precise {
                match self.inner.precise_metadata(id).await {
                    Ok(m) => m,
                    // Present in the log but not live in this runtime;
                    // skip rather than fail the whole page.
                    Err(_) => continue,
                }
            } else {
                match self.inner.metadata_cache.get(id) {
                    Some(m) => m.clone(),
                    None => continue,
                }
            };
            if filter.map_or(true, |f| f.matches(&metadata)) {
                workers.push(metadata);
            }
        }

        let next = if start + scanned < ids.len() {
            Some(ScanCursor {
                cursor: (start + scanned) as u64,
            })
        } else {
            None
        };
        debug!(
            component = %component_id,
            scanned,
            matched = workers.len(),
            precise,
            "worker enumeration page"
        );
        Ok(WorkerPage { workers, next })
    }
}
