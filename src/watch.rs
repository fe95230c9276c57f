//! Event source adapter — normalizes all discovery triggers into one stream.
//!
//! Three independent origins feed the pipeline:
//! 1. Native filesystem notifications (create / modify / rename-into), which
//!    cover browsers that download to a temporary name and rename on
//!    completion.
//! 2. A periodic full-directory rescan — the safety net for coalesced or
//!    dropped OS events (see [`discover`], driven by the orchestrator).
//! 3. Explicit external attach requests, which skip discovery entirely and
//!    enter through the pipeline's request path.

use std::path::{Path, PathBuf};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::WatchError;

/// How a candidate path came to our attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Created,
    Modified,
    Renamed,
    /// Discovered by the periodic rescan; already age-filtered and probed.
    Rescan,
}

/// One normalized notification consumed by the pipeline.
#[derive(Debug, Clone)]
pub struct Notification {
    pub path: PathBuf,
    pub kind: NotificationKind,
}

/// Names that never become candidates: directories, hidden files, and
/// in-progress download markers.
const IN_PROGRESS_SUFFIXES: &[&str] = &[".tmp", ".crdownload", ".part", ".download"];

pub fn is_candidate(path: &Path) -> bool {
    if path.is_dir() {
        return false;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') {
        return false;
    }
    let lower = name.to_lowercase();
    !IN_PROGRESS_SUFFIXES
        .iter()
        .any(|suffix| lower.ends_with(suffix))
}

/// Map a raw backend event onto our notification kind. Events we do not care
/// about (deletes, metadata-only changes, access) map to `None`.
pub fn map_event_kind(kind: &EventKind) -> Option<NotificationKind> {
    match kind {
        EventKind::Create(_) => Some(NotificationKind::Created),
        EventKind::Modify(ModifyKind::Name(_)) => Some(NotificationKind::Renamed),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(NotificationKind::Modified),
        _ => None,
    }
}

/// Start a non-recursive native watch on `dir`, forwarding candidate paths
/// into `tx`. The returned watcher must be kept alive for the watch to
/// continue; dropping it stops the native notifications.
pub fn spawn_fs_watcher(
    dir: &Path,
    tx: mpsc::Sender<Notification>,
) -> Result<RecommendedWatcher, WatchError> {
    let mut watcher =
        notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Watch backend error");
                    return;
                }
            };
            let Some(kind) = map_event_kind(&event.kind) else {
                return;
            };
            for path in event.paths {
                if !is_candidate(&path) {
                    continue;
                }
                // Rename events carry both sides; the vanished source is
                // filtered out by the stability check downstream.
                debug!(path = %path.display(), ?kind, "Filesystem notification");
                if tx.blocking_send(Notification { path, kind }).is_err() {
                    return;
                }
            }
        })?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| WatchError::StartFailed {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(watcher)
}

/// One rescan pass: list the directory and return candidate paths that pass
/// the name filter and `keep`. The caller supplies `keep` with the criterion,
/// age, tracking, and probe checks so this stays a plain listing.
pub fn discover<F>(dir: &Path, keep: F) -> Vec<Notification>
where
    F: Fn(&Path) -> bool,
{
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Rescan cannot list directory");
            return Vec::new();
        }
    };

    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| is_candidate(path))
        .filter(|path| keep(path))
        .map(|path| Notification {
            path,
            kind: NotificationKind::Rescan,
        })
        .collect()
}
