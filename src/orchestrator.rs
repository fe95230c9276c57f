//! Orchestrator — owns the watch lifecycle.
//!
//! Wires the event sources into the pipeline: the native filesystem watcher,
//! the periodic full-directory rescan, and periodic tracker garbage
//! collection. Every accepted candidate is processed on its own task so one
//! slow composer never blocks detection of other files. Shutdown cancels the
//! sources first, then waits a bounded grace period for in-flight dispatches.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::Classifier;
use crate::config::AppConfig;
use crate::error::{Error, WatchError};
use crate::pipeline::AttachPipeline;
use crate::stability::StabilityGate;
use crate::tracker::{ArrivalTracker, FileIdentity};
use crate::watch::{self, Notification};

pub struct Orchestrator {
    config: AppConfig,
    pipeline: Arc<AttachPipeline>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        pipeline: Arc<AttachPipeline>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            pipeline,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until the cancellation token fires. Failing to start the watch at
    /// all is the one fatal error; everything after that is logged and
    /// survived.
    pub async fn run(&self) -> Result<(), Error> {
        let dir = self.config.watch_dir.clone();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                Error::Watch(WatchError::StartFailed {
                    path: dir.clone(),
                    reason: e.to_string(),
                })
            })?;
        }

        let (tx, mut rx) = mpsc::channel::<Notification>(256);

        // Keep the native watcher alive for the whole run.
        let _watcher = watch::spawn_fs_watcher(&dir, tx.clone())?;
        info!(dir = %dir.display(), "Watching for new downloads");

        let rescan = self.spawn_rescan_task(dir.clone(), tx.clone());
        let gc = self.spawn_gc_task();
        drop(tx);

        let mut in_flight: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                notification = rx.recv() => {
                    let Some(Notification { path, kind }) = notification else { break };
                    let pipeline = Arc::clone(&self.pipeline);
                    in_flight.spawn(async move {
                        pipeline.process_candidate(path, kind).await;
                    });
                }
                // Reap finished dispatch tasks as they complete.
                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = result {
                        // A panicked task is fatal to that file only.
                        warn!(error = %e, "Candidate task failed");
                    }
                }
            }
        }

        info!("Shutting down — waiting for in-flight dispatches");
        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(result) = in_flight.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Candidate task failed during shutdown");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = in_flight.len(),
                "Shutdown grace elapsed with dispatches still in flight"
            );
            in_flight.shutdown().await;
        }

        let _ = tokio::join!(rescan, gc);
        info!("Watch loop stopped");
        Ok(())
    }

    /// Periodic full-directory rescan — the safety net for missed or
    /// coalesced filesystem notifications.
    fn spawn_rescan_task(
        &self,
        dir: PathBuf,
        tx: mpsc::Sender<Notification>,
    ) -> tokio::task::JoinHandle<()> {
        let pipeline = Arc::clone(&self.pipeline);
        let cancel = self.cancel.clone();
        let interval = self.config.rescan_interval;

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tick.tick() => {}
                }

                let found = watch::discover(&dir, |path| {
                    rescan_candidate(
                        path,
                        pipeline.classifier(),
                        pipeline.gate(),
                        pipeline.tracker().as_ref(),
                    )
                });

                for notification in found {
                    debug!(path = %notification.path.display(), "Rescan found unprocessed file");
                    if tx.send(notification).await.is_err() {
                        return;
                    }
                }
            }
        })
    }

    /// Periodic garbage collection of tracker entries whose backing file no
    /// longer exists.
    fn spawn_gc_task(&self) -> tokio::task::JoinHandle<()> {
        let pipeline = Arc::clone(&self.pipeline);
        let cancel = self.cancel.clone();
        let interval = self.config.gc_interval;

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tick.tick() => {}
                }
                let evicted = pipeline.tracker().evict_stale();
                if evicted > 0 {
                    debug!(evicted, remaining = pipeline.tracker().len(), "Tracker GC");
                }
            }
        })
    }
}

/// Filter for rescan-discovered paths. The naming criterion runs first so
/// unrelated files in the watch directory are never stat'd, probed, or fed
/// to the pipeline on every cycle; then the age pre-filter, the dedup
/// pre-filter, and finally the read probe.
fn rescan_candidate(
    path: &Path,
    classifier: &Classifier,
    gate: &StabilityGate,
    tracker: &ArrivalTracker,
) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if !classifier.matches_criteria(name) {
        return false;
    }
    let Some(identity) = FileIdentity::of(path) else {
        return false;
    };
    if !gate.is_settled(identity.modified) {
        return false;
    }
    if tracker.contains(&identity) {
        return false;
    }
    StabilityGate::probe(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn write_file(path: &Path) {
        std::fs::File::create(path).unwrap().write_all(b"x").unwrap();
    }

    fn parts() -> (Classifier, StabilityGate, ArrivalTracker) {
        (
            Classifier::new(),
            StabilityGate::new(Duration::ZERO),
            ArrivalTracker::new(Duration::from_secs(10)),
        )
    }

    #[test]
    fn rescan_skips_non_matching_names_before_probing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("holiday-photos.zip");
        write_file(&path);

        let (classifier, gate, tracker) = parts();
        assert!(!rescan_candidate(&path, &classifier, &gate, &tracker));
    }

    #[test]
    fn rescan_accepts_settled_matching_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Orderbekräftelse-2024.pdf");
        write_file(&path);

        let (classifier, gate, tracker) = parts();
        assert!(rescan_candidate(&path, &classifier, &gate, &tracker));
    }

    #[test]
    fn rescan_skips_already_tracked_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Faktura_1234567.pdf");
        write_file(&path);

        let (classifier, gate, tracker) = parts();
        let identity = FileIdentity::of(&path).unwrap();
        assert_eq!(
            tracker.try_commit(&identity),
            crate::tracker::CommitDecision::Accepted
        );
        assert!(!rescan_candidate(&path, &classifier, &gate, &tracker));
    }

    #[test]
    fn rescan_skips_file_younger_than_settle_delay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Orderbekräftelse.pdf");
        write_file(&path);

        let classifier = Classifier::new();
        let gate = StabilityGate::new(Duration::from_secs(60));
        let tracker = ArrivalTracker::new(Duration::from_secs(10));
        assert!(!rescan_candidate(&path, &classifier, &gate, &tracker));
    }
}
