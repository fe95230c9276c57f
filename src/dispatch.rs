//! Mail-composer dispatch — platform automation behind one trait.
//!
//! The downstream action is "open a new outgoing message with this file
//! attached" in the platform mail client. Each platform gets one
//! [`MailComposer`] implementation, selected once at startup; the core never
//! branches on the OS.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::DispatchError;

/// Result of a dispatch attempt, reported back to trigger surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub message: String,
}

/// Bounded retry policy for composer-reported failures.
///
/// Timeouts are never retried: the automation call may have had its side
/// effect (a draft window opening) even though the response was lost, and a
/// retry would double-send.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// No retries — single attempt. Used by tests.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

/// Platform mail automation: open a compose window with `path` attached.
#[async_trait]
pub trait MailComposer: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the success message on success. Implementations do their own
    /// subprocess plumbing; timeout and retry are handled by [`Dispatcher`].
    async fn attach(&self, path: &Path) -> Result<String, DispatchError>;
}

/// Select the composer for the current platform. Called once at startup.
pub fn platform_composer() -> Result<Arc<dyn MailComposer>, DispatchError> {
    match std::env::consts::OS {
        "macos" => Ok(Arc::new(OsaScriptComposer)),
        "windows" => Ok(Arc::new(OutlookComComposer)),
        other => Err(DispatchError::UnsupportedPlatform(other.to_string())),
    }
}

// ── Dispatcher: timeout + retry around a composer ────────────────────────

pub struct Dispatcher {
    composer: Arc<dyn MailComposer>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(composer: Arc<dyn MailComposer>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            composer,
            timeout,
            retry,
        }
    }

    /// Run the composer with a bounded timeout and the retry policy.
    /// Never returns an error: the outcome carries success or failure.
    pub async fn dispatch(&self, path: &Path) -> DispatchOutcome {
        let name = self.composer.name().to_string();
        let mut last_failure = String::new();

        for attempt in 1..=self.retry.max_attempts.max(1) {
            match tokio::time::timeout(self.timeout, self.composer.attach(path)).await {
                Ok(Ok(message)) => {
                    info!(composer = %name, path = %path.display(), "Dispatch succeeded");
                    return DispatchOutcome {
                        success: true,
                        message,
                    };
                }
                Ok(Err(e)) => {
                    warn!(
                        composer = %name,
                        attempt,
                        error = %e,
                        "Composer attempt failed"
                    );
                    last_failure = e.to_string();
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.backoff).await;
                    }
                }
                Err(_) => {
                    // Failure-to-respond counts as failure, not hang — and
                    // is not retried (the draft may already be open).
                    warn!(composer = %name, timeout = ?self.timeout, "Dispatch timed out");
                    return DispatchOutcome {
                        success: false,
                        message: format!(
                            "Composer {name} timed out after {:?}",
                            self.timeout
                        ),
                    };
                }
            }
        }

        DispatchOutcome {
            success: false,
            message: last_failure,
        }
    }
}

// ── macOS: AppleScript via osascript ─────────────────────────────────────

pub struct OsaScriptComposer;

impl OsaScriptComposer {
    fn script(path: &Path) -> String {
        let escaped = path
            .display()
            .to_string()
            .replace('\\', "\\\\")
            .replace('"', "\\\"");
        format!(
            r#"tell application "Microsoft Outlook"
    activate
    set newMessage to make new outgoing message
    tell newMessage
        make new attachment with properties {{file:POSIX file "{escaped}"}}
    end tell
    open newMessage
end tell"#
        )
    }
}

#[async_trait]
impl MailComposer for OsaScriptComposer {
    fn name(&self) -> &str {
        "outlook-applescript"
    }

    async fn attach(&self, path: &Path) -> Result<String, DispatchError> {
        if !path.exists() {
            return Err(DispatchError::FileMissing(path.to_path_buf()));
        }

        // kill_on_drop: a timed-out dispatch drops this future, and the
        // child must not outlive it.
        let output = tokio::process::Command::new("osascript")
            .arg("-e")
            .arg(Self::script(path))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DispatchError::Spawn {
                name: self.name().into(),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            Ok("Outlook opened successfully".into())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(DispatchError::Failed {
                name: self.name().into(),
                reason: format!("AppleScript error: {}", stderr.trim()),
            })
        }
    }
}

// ── Windows: Outlook COM automation via PowerShell ───────────────────────

pub struct OutlookComComposer;

impl OutlookComComposer {
    fn script(path: &Path) -> String {
        // Single quotes in PowerShell literals are escaped by doubling.
        let escaped = path.display().to_string().replace('\'', "''");
        format!(
            "$outlook = New-Object -ComObject Outlook.Application; \
             $mail = $outlook.CreateItem(0); \
             $mail.Attachments.Add('{escaped}') | Out-Null; \
             $mail.Display()"
        )
    }
}

#[async_trait]
impl MailComposer for OutlookComComposer {
    fn name(&self) -> &str {
        "outlook-com"
    }

    async fn attach(&self, path: &Path) -> Result<String, DispatchError> {
        if !path.exists() {
            return Err(DispatchError::FileMissing(path.to_path_buf()));
        }

        let output = tokio::process::Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command"])
            .arg(Self::script(path))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DispatchError::Spawn {
                name: self.name().into(),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            Ok("Outlook opened successfully".into())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(DispatchError::Failed {
                name: self.name().into(),
                reason: format!("COM automation error: {}", stderr.trim()),
            })
        }
    }
}

// ── Test composer ─────────────────────────────────────────────────────────

/// Records every attach call; configurable to fail or hang. Lives here (not
/// in tests/) so both unit and integration tests share it.
#[derive(Default)]
pub struct RecordingComposer {
    pub calls: std::sync::Mutex<Vec<PathBuf>>,
    pub fail_with: Option<String>,
    pub hang: Option<Duration>,
}

impl RecordingComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn hanging(delay: Duration) -> Self {
        Self {
            hang: Some(delay),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl MailComposer for RecordingComposer {
    fn name(&self) -> &str {
        "recording"
    }

    async fn attach(&self, path: &Path) -> Result<String, DispatchError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(path.to_path_buf());
        if let Some(delay) = self.hang {
            tokio::time::sleep(delay).await;
        }
        if let Some(ref reason) = self.fail_with {
            return Err(DispatchError::Failed {
                name: self.name().into(),
                reason: reason.clone(),
            });
        }
        Ok("composer recorded".into())
    }
}
