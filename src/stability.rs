//! Stability gate — decides when a file is safe to read.
//!
//! Browsers write downloads incrementally (often under a temporary name) and
//! only rename on completion, so a create/modify notification does not mean
//! the bytes are all there. The gate waits a fixed settle delay, then probes
//! the file with a plain read-open. A failed open means the producer still
//! holds it; the candidate is deferred to the next rescan cycle rather than
//! spin-waited.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct StabilityGate {
    settle_delay: Duration,
}

impl StabilityGate {
    pub fn new(settle_delay: Duration) -> Self {
        Self { settle_delay }
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Sleep out the settle delay. Never called while any lock is held.
    pub async fn wait_settle(&self) {
        tokio::time::sleep(self.settle_delay).await;
    }

    /// Cheap pre-filter for rescan-discovered candidates: a file younger than
    /// the settle delay is likely still being written, so skip the probe.
    pub fn is_settled(&self, modified: SystemTime) -> bool {
        match modified.elapsed() {
            Ok(age) => age >= self.settle_delay,
            // Clock skew (mtime in the future) — treat as not yet settled.
            Err(_) => false,
        }
    }

    /// Probe whether the file can be opened for reading. A locking or
    /// permission error means the producing process has not finished.
    pub fn probe(path: &Path) -> bool {
        match std::fs::OpenOptions::new().read(true).open(path) {
            Ok(_) => true,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Stability probe failed");
                false
            }
        }
    }

    /// Full check for an already-settled candidate: exists and readable.
    pub fn is_stable(&self, path: &Path) -> bool {
        path.exists() && Self::probe(path)
    }
}
