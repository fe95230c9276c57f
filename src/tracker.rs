//! Arrival tracker — the single synchronization point of the pipeline.
//!
//! Coalesces duplicate and racing notifications for the same logical file
//! into exactly one commit decision. A logical file is identified by
//! (absolute path, last-modified timestamp): the same path with a different
//! timestamp is a different file (Downloads reused a name).
//!
//! All state lives in one map behind one mutex; the lookup → sweep → register
//! sequence of `try_commit` is a single critical section. No awaits happen
//! while the lock is held.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use tracing::debug;

/// Unit of deduplication: (path, mtime at observation time).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl FileIdentity {
    pub fn new(path: impl Into<PathBuf>, modified: SystemTime) -> Self {
        Self {
            path: path.into(),
            modified,
        }
    }

    /// Read the identity of a file from disk. `None` if it vanished.
    pub fn of(path: &Path) -> Option<Self> {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
        Some(Self::new(path, modified))
    }
}

/// Lifecycle state of a tracked identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// A stability check is in flight for this identity.
    Pending,
    /// A dispatch decision was made (success or failure — no retries).
    Committed,
}

#[derive(Debug, Clone)]
struct TrackedEntry {
    state: EntryState,
    #[allow(dead_code)]
    first_seen: Instant,
    committed_at: Option<Instant>,
}

/// Outcome of a commit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDecision {
    Accepted,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Another notification for this identity is mid-flight.
    InFlight,
    /// This identity was committed within the liveness window.
    Duplicate,
}

/// Seam for existence checks, so the tracker is testable without a real
/// filesystem.
pub trait PathProbe: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
}

/// Default probe backed by the real filesystem.
pub struct FsProbe;

impl PathProbe for FsProbe {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Tracks in-flight and recently committed file identities.
pub struct ArrivalTracker {
    entries: Mutex<HashMap<FileIdentity, TrackedEntry>>,
    liveness_window: Duration,
    probe: Arc<dyn PathProbe>,
}

impl ArrivalTracker {
    pub fn new(liveness_window: Duration) -> Self {
        Self::with_probe(liveness_window, Arc::new(FsProbe))
    }

    pub fn with_probe(liveness_window: Duration, probe: Arc<dyn PathProbe>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            liveness_window,
            probe,
        }
    }

    /// Decide whether this identity is new, and if so register it atomically.
    ///
    /// Under a race where two notification sources present the same identity
    /// nearly simultaneously, only the first caller gets `Accepted`; the
    /// second observes the freshly registered entry and is rejected.
    pub fn try_commit(&self, identity: &FileIdentity) -> CommitDecision {
        let mut entries = self.entries.lock().expect("tracker lock poisoned");

        if let Some(entry) = entries.get(identity) {
            match entry.state {
                EntryState::Pending => return CommitDecision::Rejected(RejectReason::InFlight),
                EntryState::Committed => {
                    let within_window = entry
                        .committed_at
                        .map(|t| t.elapsed() < self.liveness_window)
                        .unwrap_or(false);
                    if within_window {
                        return CommitDecision::Rejected(RejectReason::Duplicate);
                    }
                    // Stale commit past the window: fall through and
                    // re-register below.
                }
            }
        }

        // Sweep: drop entries whose file vanished, and entries for the same
        // path with a different mtime (superseded by this identity).
        let probe = &self.probe;
        entries.retain(|id, _| {
            if id == identity {
                return true;
            }
            if id.path == identity.path && id.modified != identity.modified {
                debug!(path = %id.path.display(), "Superseded older identity for path");
                return false;
            }
            probe.exists(&id.path)
        });

        entries.insert(
            identity.clone(),
            TrackedEntry {
                state: EntryState::Pending,
                first_seen: Instant::now(),
                committed_at: None,
            },
        );
        CommitDecision::Accepted
    }

    /// Promote an identity to Committed. Called the instant a dispatch
    /// decision is made; dispatch success or failure does not matter.
    pub fn mark_committed(&self, identity: &FileIdentity) {
        let mut entries = self.entries.lock().expect("tracker lock poisoned");
        if let Some(entry) = entries.get_mut(identity) {
            entry.state = EntryState::Committed;
            entry.committed_at = Some(Instant::now());
        }
    }

    /// Forget every entry for a path. Used when a candidate fails before the
    /// dispatch decision (file vanished, still locked) so the next rescan
    /// cycle can retry it.
    pub fn release(&self, path: &Path) {
        let mut entries = self.entries.lock().expect("tracker lock poisoned");
        entries.retain(|id, _| id.path != path);
    }

    /// Whether this exact identity is currently tracked (pre-filter for the
    /// periodic rescan; the authoritative check is `try_commit`).
    pub fn contains(&self, identity: &FileIdentity) -> bool {
        self.entries
            .lock()
            .expect("tracker lock poisoned")
            .contains_key(identity)
    }

    /// Garbage-collect entries whose backing file no longer exists.
    /// Returns the number of evicted entries.
    pub fn evict_stale(&self) -> usize {
        let mut entries = self.entries.lock().expect("tracker lock poisoned");
        let before = entries.len();
        let probe = &self.probe;
        entries.retain(|id, _| probe.exists(&id.path));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("tracker lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
