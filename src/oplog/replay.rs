//! Replay-state derivation: which entries of a worker's log are live for
//! recovery, and which are voided by jumps or discarded by unmatched atomic
//! regions.
//!
//! Structural corruption (unmatched end markers, jumps landing inside an
//! atomic region) is rejected here, when the state is built, so that replay
//! never silently accepts a malformed log.

use super::entry::OplogEntry;
use super::error::{OplogError, Result};
use crate::core::OplogIndex;

/// The replay view over one worker's oplog.
///
/// Built by a single scan over the raw entries. Iteration yields entries in
/// index order with:
/// - jump-voided spans removed (a `Jump { start, end }` voids `[start, end)`),
/// - the jump entries themselves removed (they are control, not effects),
/// - everything from the first still-open `BeginAtomicRegion` onward removed,
///   so the region is re-executed from its start rather than partially
///   resumed.
#[derive(Debug)]
pub struct ReplayState {
    entries: Vec<(OplogIndex, OplogEntry)>,
    atomic_restart_point: Option<OplogIndex>,
    unterminated_remote_write: Option<OplogIndex>,
}

impl ReplayState {
    pub fn new(raw: Vec<(OplogIndex, OplogEntry)>) -> Result<Self> {
        // Pass 1: collect voided spans from every jump.
        let mut voided: Vec<(u64, u64)> = Vec::new();
        for (idx, entry) in &raw {
            if let OplogEntry::Jump { start, end, .. } = entry {
                if start >= end || end.as_u64() > idx.as_u64() {
                    return Err(OplogError::InvalidJumpRegion {
                        index: *idx,
                        start: *start,
                        end: *end,
                    });
                }
                voided.push((start.as_u64(), end.as_u64()));
            }
        }

        let is_voided =
            |idx: OplogIndex| voided.iter().any(|(s, e)| idx.as_u64() >= *s && idx.as_u64() < *e);

        // Pass 2: match begin/end markers over the post-void view and
        // validate jump targets against atomic regions.
        let mut open_atomic: Vec<OplogIndex> = Vec::new();
        let mut regions: Vec<(OplogIndex, Option<OplogIndex>)> = Vec::new();
        let mut open_remote: Vec<OplogIndex> = Vec::new();

        for (idx, entry) in &raw {
            if is_voided(*idx) {
                continue;
            }
            match entry {
                OplogEntry::BeginAtomicRegion { .. } => {
                    open_atomic.push(*idx);
                    regions.push((*idx, None));
                }
                OplogEntry::EndAtomicRegion { begin_index, .. } => {
                    match open_atomic.iter().position(|b| b == begin_index) {
                        Some(pos) => {
                            open_atomic.remove(pos);
                            if let Some(region) =
                                regions.iter_mut().find(|(b, _)| b == begin_index)
                            {
                                region.1 = Some(*idx);
                            }
                        }
                        None => {
                            return Err(OplogError::UnmatchedEndMarker {
                                index: *idx,
                                begin: *begin_index,
                            })
                        }
                    }
                }
                OplogEntry::BeginRemoteWrite { .. } => {
                    open_remote.push(*idx);
                }
                OplogEntry::EndRemoteWrite { begin_index, .. } => {
                    match open_remote.iter().position(|b| b == begin_index) {
                        Some(pos) => {
                            open_remote.remove(pos);
                        }
                        None => {
                            return Err(OplogError::UnmatchedEndMarker {
                                index: *idx,
                                begin: *begin_index,
                            })
                        }
                    }
                }
                OplogEntry::Jump { start, .. } => {
                    // A jump may void whole regions, but must not land in
                    // the middle of one.
                    let target = start.as_u64();
                    for (begin, end) in &regions {
                        let ends_before_target =
                            matches!(end, Some(e) if e.as_u64() < target);
                        if begin.as_u64() < target && !ends_before_target {
                            return Err(OplogError::JumpIntoAtomicRegion {
                                index: *idx,
                                target: *start,
                                begin: *begin,
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        // The outermost still-open atomic region defines the restart cut:
        // everything from its begin onward is discarded and re-executed.
        let atomic_restart_point = open_atomic.iter().min().copied();
        let unterminated_remote_write = open_remote.iter().min().copied();

        let entries = raw
            .into_iter()
            .filter(|(idx, entry)| {
                !is_voided(*idx)
                    && !matches!(entry, OplogEntry::Jump { .. })
                    && atomic_restart_point.map_or(true, |cut| *idx < cut)
            })
            .collect();

        Ok(Self {
            entries,
            atomic_restart_point,
            unterminated_remote_write,
        })
    }

    /// Entries live for replay, in increasing index order.
    pub fn entries(&self) -> &[(OplogIndex, OplogEntry)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<(OplogIndex, OplogEntry)> {
        self.entries
    }

    /// Begin index of the discarded (still-open) atomic region, if any.
    pub fn atomic_restart_point(&self) -> Option<OplogIndex> {
        self.atomic_restart_point
    }

    /// Begin index of an unterminated remote-write bracket, if any.
    ///
    /// Under strict idempotence this makes the worker unrecoverable: the
    /// engine cannot prove whether the bracketed write was applied.
    pub fn unterminated_remote_write(&self) -> Option<OplogIndex> {
        self.unterminated_remote_write
    }
}
