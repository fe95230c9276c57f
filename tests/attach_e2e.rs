//! End-to-end tests for the attach pipeline.
//!
//! The watch test runs a real orchestrator over a temp directory and relies
//! on both the native watcher and the rescan safety net; the HTTP test boots
//! the Axum surface on a random port and exercises the real request/response
//! contract. The mail composer is a recording stub throughout.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use auto_attach::config::AppConfig;
use auto_attach::dispatch::{MailComposer, RecordingComposer, RetryPolicy};
use auto_attach::orchestrator::Orchestrator;
use auto_attach::pipeline::AttachPipeline;
use auto_attach::server::attach_routes;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(20);

fn test_config(watch_dir: &Path, output_dir: &Path) -> AppConfig {
    AppConfig {
        watch_dir: watch_dir.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        settle_delay: Duration::from_millis(100),
        liveness_window: Duration::from_secs(10),
        rescan_interval: Duration::from_millis(200),
        gc_interval: Duration::from_millis(500),
        dispatch_timeout: Duration::from_secs(2),
        dispatch_retry: RetryPolicy::once(),
        delete_original: true,
        shutdown_grace: Duration::from_secs(2),
        ..AppConfig::default()
    }
}

fn write_file(path: &Path, content: &[u8]) {
    let mut f = std::fs::File::create(path).unwrap();
    f.write_all(content).unwrap();
    f.sync_all().unwrap();
}

/// Poll until `predicate` holds or the deadline passes.
async fn wait_until<F: Fn() -> bool>(deadline: Duration, predicate: F) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    predicate()
}

// ── Watch pipeline ────────────────────────────────────────────────────

#[tokio::test]
async fn watched_download_is_dispatched_exactly_once() {
    timeout(TEST_TIMEOUT, async {
        let watch_dir = tempfile::tempdir().unwrap();
        let output_dir = tempfile::tempdir().unwrap();
        let composer = Arc::new(RecordingComposer::new());
        let config = test_config(watch_dir.path(), output_dir.path());

        let pipeline = Arc::new(AttachPipeline::new(
            &config,
            Arc::clone(&composer) as Arc<dyn MailComposer>,
        ));
        let cancel = CancellationToken::new();
        let orchestrator = Orchestrator::new(config, Arc::clone(&pipeline), cancel.clone());
        let run = tokio::spawn(async move { orchestrator.run().await });

        // Let the watcher attach before the file appears.
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Create event, then a modify shortly after — the classic noisy
        // arrival. The modify lands inside the settle window, so both
        // notifications observe the same final mtime and collapse to one
        // identity. The rescan will also rediscover the same file.
        let download = watch_dir.path().join("Orderbekräftelse-2024.pdf");
        write_file(&download, b"pdf content");
        tokio::time::sleep(Duration::from_millis(30)).await;
        if download.exists() {
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&download)
                .unwrap();
            f.write_all(b" more").unwrap();
        }

        let dispatched = {
            let composer = Arc::clone(&composer);
            wait_until(Duration::from_secs(5), move || composer.call_count() >= 1).await
        };
        assert!(dispatched, "expected a dispatch within the deadline");

        // Give duplicates (modify event, rescan rediscovery) time to race.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(composer.call_count(), 1, "dispatched more than once");

        // Exactly one materialized copy, named after the category.
        let copies: Vec<_> = std::fs::read_dir(output_dir.path())
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(copies.len(), 1);
        let copy_name = copies[0].file_name().to_string_lossy().into_owned();
        assert!(copy_name.starts_with("Orderbekräftelse-"));
        assert!(copy_name.ends_with(".pdf"));

        // The composer was handed the copy, not the original.
        assert_eq!(composer.calls()[0], copies[0].path());

        // The original was removed from the watch directory.
        assert!(!download.exists());

        cancel.cancel();
        run.await.unwrap().unwrap();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn non_matching_download_is_ignored() {
    timeout(TEST_TIMEOUT, async {
        let watch_dir = tempfile::tempdir().unwrap();
        let output_dir = tempfile::tempdir().unwrap();
        let composer = Arc::new(RecordingComposer::new());
        let config = test_config(watch_dir.path(), output_dir.path());

        let pipeline = Arc::new(AttachPipeline::new(
            &config,
            Arc::clone(&composer) as Arc<dyn MailComposer>,
        ));
        let cancel = CancellationToken::new();
        let orchestrator = Orchestrator::new(config, pipeline, cancel.clone());
        let run = tokio::spawn(async move { orchestrator.run().await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        write_file(&watch_dir.path().join("holiday-photos.zip"), b"zip");

        // Enough time for settle + several rescan cycles.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(composer.call_count(), 0);

        cancel.cancel();
        run.await.unwrap().unwrap();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn redownloaded_file_with_same_name_is_dispatched_again() {
    timeout(TEST_TIMEOUT, async {
        let watch_dir = tempfile::tempdir().unwrap();
        let output_dir = tempfile::tempdir().unwrap();
        let composer = Arc::new(RecordingComposer::new());
        let config = test_config(watch_dir.path(), output_dir.path());

        let pipeline = Arc::new(AttachPipeline::new(
            &config,
            Arc::clone(&composer) as Arc<dyn MailComposer>,
        ));
        let cancel = CancellationToken::new();
        let orchestrator = Orchestrator::new(config, pipeline, cancel.clone());
        let run = tokio::spawn(async move { orchestrator.run().await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        let download = watch_dir.path().join("Inköpsorder.pdf");
        write_file(&download, b"first");

        let first = {
            let composer = Arc::clone(&composer);
            wait_until(Duration::from_secs(5), move || composer.call_count() == 1).await
        };
        assert!(first, "first download never dispatched");
        // delete_original already removed the first file; download again
        // under the same name with a new mtime.
        write_file(&download, b"second download");

        let second = {
            let composer = Arc::clone(&composer);
            wait_until(Duration::from_secs(5), move || composer.call_count() == 2).await
        };
        assert!(second, "re-downloaded file never dispatched");

        cancel.cancel();
        run.await.unwrap().unwrap();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unwatchable_directory_is_a_prompt_startup_error() {
    timeout(TEST_TIMEOUT, async {
        let dir = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        // The watch directory sits under a regular file, so it can never be
        // created and the watch cannot start.
        let blocker = dir.path().join("blocker");
        write_file(&blocker, b"");
        let watch_dir = blocker.join("downloads");

        let composer = Arc::new(RecordingComposer::new());
        let config = test_config(&watch_dir, output.path());
        let pipeline = Arc::new(AttachPipeline::new(
            &config,
            Arc::clone(&composer) as Arc<dyn MailComposer>,
        ));
        let orchestrator = Orchestrator::new(config, pipeline, CancellationToken::new());

        // Fails right away with a diagnostic, rather than idling watcher-less.
        let err = orchestrator.run().await.unwrap_err();
        assert!(err.to_string().contains("Cannot watch"));
    })
    .await
    .expect("test timed out");
}

// ── HTTP trigger surface ──────────────────────────────────────────────

async fn start_http(
    config: &AppConfig,
    composer: Arc<RecordingComposer>,
) -> (u16, CancellationToken) {
    let pipeline = Arc::new(AttachPipeline::new(
        config,
        composer as Arc<dyn MailComposer>,
    ));
    let cancel = CancellationToken::new();
    let app = attach_routes(pipeline, cancel.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (port, cancel)
}

#[tokio::test]
async fn http_attach_success_and_duplicate() {
    timeout(TEST_TIMEOUT, async {
        let dir = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let composer = Arc::new(RecordingComposer::new());
        let config = test_config(dir.path(), output.path());
        let (port, _cancel) = start_http(&config, Arc::clone(&composer)).await;

        let file = dir.path().join("Faktura_1234567.pdf");
        write_file(&file, b"invoice");
        // Make sure the file's age clears the settle pre-filter quickly.
        tokio::time::sleep(Duration::from_millis(150)).await;

        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{port}/attach");

        let body: serde_json::Value = client
            .post(&url)
            .json(&serde_json::json!({ "filePath": file.to_str().unwrap() }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(composer.call_count(), 1);

        // Same identity again: rejected, still one dispatch.
        let body: serde_json::Value = client
            .post(&url)
            .json(&serde_json::json!({ "filePath": file.to_str().unwrap() }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(composer.call_count(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn http_attach_missing_path_fields() {
    timeout(TEST_TIMEOUT, async {
        let dir = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let composer = Arc::new(RecordingComposer::new());
        let config = test_config(dir.path(), output.path());
        let (port, _cancel) = start_http(&config, Arc::clone(&composer)).await;

        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{port}/attach");

        // No filePath at all.
        let body: serde_json::Value = client
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], false);

        // Path that does not exist.
        let body: serde_json::Value = client
            .post(&url)
            .json(&serde_json::json!({ "filePath": "/no/such/file.pdf" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], false);
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .contains("File not found")
        );
        assert_eq!(composer.call_count(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn http_attach_malformed_json_is_structured_failure() {
    timeout(TEST_TIMEOUT, async {
        let dir = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let composer = Arc::new(RecordingComposer::new());
        let config = test_config(dir.path(), output.path());
        let (port, _cancel) = start_http(&config, Arc::clone(&composer)).await;

        let client = reqwest::Client::new();
        let body: serde_json::Value = client
            .post(format!("http://127.0.0.1:{port}/attach"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], false);
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .contains("Invalid request")
        );
        assert_eq!(composer.call_count(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn http_health_endpoint() {
    timeout(TEST_TIMEOUT, async {
        let dir = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let composer = Arc::new(RecordingComposer::new());
        let config = test_config(dir.path(), output.path());
        let (port, _cancel) = start_http(&config, composer).await;

        let body: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}
