use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Caller-supplied identifier for a file. This index never allocates these.
pub type FileId = i64;

/// Stable identifier for a stored perceptual-hash value.
pub type HashId = i64;

/// A file found by a similarity search, with the smallest Hamming distance
/// observed across all query values and all of the file's hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub file_id: FileId,
    pub distance: u32,
}

/// A candidate duplicate pair produced by the background scan, forwarded to
/// the external duplicate-relationship consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PotentialPair {
    pub file_id: FileId,
    pub candidate_id: FileId,
    pub distance: u32,
}

/// Row counts for the index, mostly useful for status displays and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub hash_count: usize,
    pub tree_node_count: usize,
    pub queued_branch_count: usize,
    pub tracked_file_count: usize,
}

/// Outcome of one `scan_for_potential_duplicates` call. `completed` is false
/// when the budget ran out with files still below the target distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub files_searched: usize,
    pub pairs_found: usize,
    pub completed: bool,
}

/// Time budget and cancellation token for background maintenance calls.
///
/// Maintenance work checks the budget at operation boundaries only (one
/// branch, one file) — a branch regeneration is never interrupted partway.
#[derive(Debug, Clone, Default)]
pub struct Budget {
    deadline: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Budget {
    /// A budget that never expires.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Expire after `limit` of wall-clock time, measured from now.
    pub fn with_deadline(limit: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + limit),
            ..Self::default()
        }
    }

    /// Also stop as soon as `flag` is set by another thread.
    pub fn cancelled_by(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn expired(&self) -> bool {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        if let Some(ref cancel) = self.cancel {
            if cancel.load(Ordering::Relaxed) {
                return true;
            }
        }
        false
    }
}
