//! Attach pipeline — the one path every trigger surface flows through.
//!
//! Order is fixed: stability gate → arrival tracker commit → classifier →
//! materializer → dispatch. Rejections at any stage are log-only no-ops for
//! watch-discovered candidates; externally requested attaches get a
//! structured failure back instead. Either way nothing raises past this
//! module.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classify::Classifier;
use crate::config::AppConfig;
use crate::dispatch::{Dispatcher, MailComposer};
use crate::materialize::Materializer;
use crate::stability::StabilityGate;
use crate::tracker::{ArrivalTracker, CommitDecision, FileIdentity};
use crate::watch::NotificationKind;

/// Final result of one attach attempt, in the shape every inbound trigger
/// surface reports back: `{success, message}`.
#[derive(Debug, Clone, Serialize)]
pub struct AttachOutcome {
    pub success: bool,
    pub message: String,
}

impl AttachOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

pub struct AttachPipeline {
    classifier: Classifier,
    tracker: Arc<ArrivalTracker>,
    gate: StabilityGate,
    materializer: Materializer,
    dispatcher: Dispatcher,
    delete_original: bool,
}

impl AttachPipeline {
    pub fn new(config: &AppConfig, composer: Arc<dyn MailComposer>) -> Self {
        Self {
            classifier: Classifier::new(),
            tracker: Arc::new(ArrivalTracker::new(config.liveness_window)),
            gate: StabilityGate::new(config.settle_delay),
            materializer: Materializer::new(&config.output_dir),
            dispatcher: Dispatcher::new(composer, config.dispatch_timeout, config.dispatch_retry),
            delete_original: config.delete_original,
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn tracker(&self) -> &Arc<ArrivalTracker> {
        &self.tracker
    }

    pub fn gate(&self) -> &StabilityGate {
        &self.gate
    }

    /// Process a watch-discovered candidate. All rejections are silent
    /// (logged) no-ops; this never returns an error to the watch loop.
    pub async fn process_candidate(&self, path: PathBuf, kind: NotificationKind) {
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            return;
        };

        if !self.classifier.matches_criteria(&name) {
            debug!(file = %name, "Does not match naming criterion");
            return;
        }

        // Rescan candidates were already age-filtered and probed once.
        if kind != NotificationKind::Rescan {
            self.gate.wait_settle().await;
        }

        let Some(identity) = FileIdentity::of(&path) else {
            debug!(file = %name, "File vanished before processing");
            return;
        };

        match self.tracker.try_commit(&identity) {
            CommitDecision::Accepted => {}
            CommitDecision::Rejected(reason) => {
                debug!(file = %name, ?reason, ?kind, "Notification coalesced");
                return;
            }
        }

        if !self.gate.is_stable(&path) {
            debug!(file = %name, "File not yet stable, deferring to next rescan");
            self.tracker.release(&path);
            return;
        }

        info!(file = %name, ?kind, "Processing new arrival");
        let outcome = self.finish(&path, &identity, self.delete_original).await;
        if outcome.success {
            info!(file = %name, "Processed: {}", outcome.message);
        } else {
            warn!(file = %name, "Dispatch failed: {}", outcome.message);
        }
    }

    /// Process an explicit external attach request. Bypasses the naming
    /// criterion but still runs the stability gate and the tracker, and
    /// always answers with a structured outcome.
    pub async fn process_request(&self, path: PathBuf) -> AttachOutcome {
        if !path.exists() {
            return AttachOutcome::failure(format!("File not found: {}", path.display()));
        }

        let Some(identity) = FileIdentity::of(&path) else {
            return AttachOutcome::failure(format!("File not found: {}", path.display()));
        };

        if !self.gate.is_settled(identity.modified) {
            self.gate.wait_settle().await;
        }

        match self.tracker.try_commit(&identity) {
            CommitDecision::Accepted => {}
            CommitDecision::Rejected(reason) => {
                debug!(path = %path.display(), ?reason, "Request rejected as duplicate");
                return AttachOutcome::failure("File was already attached");
            }
        }

        if !self.gate.is_stable(&path) {
            self.tracker.release(&path);
            return AttachOutcome::failure("File is still being written, try again shortly");
        }

        // External requests never delete the caller's file.
        self.finish(&path, &identity, false).await
    }

    /// Shared tail: classify → materialize → commit → dispatch.
    ///
    /// The identity is promoted to Committed before the composer runs: a
    /// failed dispatch is not retried within this process lifetime, since the
    /// automation step may have opened a draft despite reporting failure.
    async fn finish(
        &self,
        source: &Path,
        identity: &FileIdentity,
        delete_original: bool,
    ) -> AttachOutcome {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let category = self.classifier.classify(name);

        let materialized = match self.materializer.materialize(source, category) {
            Ok(m) => m,
            Err(e) => {
                self.tracker.release(source);
                return AttachOutcome::failure(e.to_string());
            }
        };
        if materialized.is_degraded() {
            warn!(file = %name, "Materializer degraded to original path");
        }

        if delete_original && !materialized.is_degraded() {
            match std::fs::remove_file(source) {
                Ok(()) => info!(file = %name, "Deleted original from watch directory"),
                Err(e) => warn!(file = %name, error = %e, "Could not delete original"),
            }
        }

        self.tracker.mark_committed(identity);
        let dispatched = self.dispatcher.dispatch(materialized.path()).await;
        AttachOutcome {
            success: dispatched.success,
            message: dispatched.message,
        }
    }
}
