//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::dispatch::RetryPolicy;

/// Service configuration.
///
/// All timing values are empirically-tuned heuristics exposed as
/// configuration so tests can run with near-zero delays.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory watched for newly downloaded files.
    pub watch_dir: PathBuf,
    /// Directory that receives uniquely-named copies.
    pub output_dir: PathBuf,
    /// Directory for the rolling log file.
    pub log_dir: PathBuf,
    /// Port for the local HTTP trigger surface (loopback only).
    pub http_port: u16,
    /// Wait before first attempting to read a newly discovered file.
    pub settle_delay: Duration,
    /// Window after a commit during which duplicate notifications for the
    /// same identity are rejected outright.
    pub liveness_window: Duration,
    /// Cadence of the full-directory rescan (safety net for missed events).
    pub rescan_interval: Duration,
    /// Cadence of tracker garbage collection.
    pub gc_interval: Duration,
    /// Upper bound on a single mail-composer invocation.
    pub dispatch_timeout: Duration,
    /// Retry policy for composer-reported failures.
    pub dispatch_retry: RetryPolicy,
    /// Delete the original download after a successful copy (watch pipeline
    /// only; failure to delete never blocks dispatch).
    pub delete_original: bool,
    /// How long shutdown waits for in-flight dispatches before giving up.
    pub shutdown_grace: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            output_dir: default_output_dir(),
            log_dir: default_log_dir(),
            http_port: 8765,
            settle_delay: Duration::from_secs(2),
            liveness_window: Duration::from_secs(10),
            rescan_interval: Duration::from_secs(2),
            gc_interval: Duration::from_secs(30),
            dispatch_timeout: Duration::from_secs(10),
            dispatch_retry: RetryPolicy::default(),
            delete_original: true,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl AppConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            watch_dir: env_path("AUTO_ATTACH_WATCH_DIR").unwrap_or(defaults.watch_dir),
            output_dir: env_path("AUTO_ATTACH_OUTPUT_DIR").unwrap_or(defaults.output_dir),
            log_dir: env_path("AUTO_ATTACH_LOG_DIR").unwrap_or(defaults.log_dir),
            http_port: env_parse("AUTO_ATTACH_HTTP_PORT").unwrap_or(defaults.http_port),
            settle_delay: env_secs("AUTO_ATTACH_SETTLE_SECS")
                .unwrap_or(defaults.settle_delay),
            liveness_window: env_secs("AUTO_ATTACH_LIVENESS_SECS")
                .unwrap_or(defaults.liveness_window),
            rescan_interval: env_secs("AUTO_ATTACH_RESCAN_SECS")
                .unwrap_or(defaults.rescan_interval),
            gc_interval: env_secs("AUTO_ATTACH_GC_SECS").unwrap_or(defaults.gc_interval),
            dispatch_timeout: env_secs("AUTO_ATTACH_DISPATCH_TIMEOUT_SECS")
                .unwrap_or(defaults.dispatch_timeout),
            dispatch_retry: RetryPolicy {
                max_attempts: env_parse("AUTO_ATTACH_DISPATCH_ATTEMPTS")
                    .unwrap_or(defaults.dispatch_retry.max_attempts),
                backoff: defaults.dispatch_retry.backoff,
            },
            delete_original: env_parse("AUTO_ATTACH_DELETE_ORIGINAL")
                .unwrap_or(defaults.delete_original),
            shutdown_grace: env_secs("AUTO_ATTACH_SHUTDOWN_GRACE_SECS")
                .unwrap_or(defaults.shutdown_grace),
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

fn default_watch_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_output_dir() -> PathBuf {
    dirs::desktop_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Desktop")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("businessnxtdocs")
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("auto-attach")
}
