use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use auto_attach::config::AppConfig;
use auto_attach::dispatch;
use auto_attach::native_host;
use auto_attach::orchestrator::Orchestrator;
use auto_attach::pipeline::AttachPipeline;
use auto_attach::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = std::env::args().nth(1).unwrap_or_else(|| "start".into());
    let config = AppConfig::from_env();

    match command.as_str() {
        "start" => run_start(config).await,
        "native-host" => run_native_host(config).await,
        "ping" => run_ping(config).await,
        "stop" => run_stop(config).await,
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!("Usage: auto-attach [start|native-host|ping|stop]");
            std::process::exit(2);
        }
    }
}

/// Initialize tracing to stderr and a rolling log file. The returned guard
/// must be kept alive so the file writer keeps flushing.
fn init_tracing(config: &AppConfig) -> tracing_appender::non_blocking::WorkerGuard {
    // The rolling appender needs the directory to exist up front.
    let _ = std::fs::create_dir_all(&config.log_dir);
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "auto-attach.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false),
        )
        .init();

    guard
}

/// Watch mode: filesystem watcher + rescan + GC + local HTTP surface.
async fn run_start(config: AppConfig) -> anyhow::Result<()> {
    let _guard = init_tracing(&config);

    eprintln!("auto-attach v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Watching:  {}", config.watch_dir.display());
    eprintln!("   Copies to: {}", config.output_dir.display());
    eprintln!("   Endpoint:  http://127.0.0.1:{}/attach", config.http_port);

    let composer = dispatch::platform_composer().map_err(|e| {
        eprintln!("Error: {e}");
        e
    })?;

    let pipeline = Arc::new(AttachPipeline::new(&config, composer));
    let cancel = CancellationToken::new();

    // HTTP trigger surface, same pipeline as the watcher.
    let router = server::attach_routes(Arc::clone(&pipeline), cancel.clone());
    let http = tokio::spawn(server::serve(config.http_port, router, cancel.clone()));

    let orchestrator = Orchestrator::new(config, pipeline, cancel.clone());
    let mut watch_loop = tokio::spawn(async move { orchestrator.run().await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received, shutting down");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
        // The watch loop only exits on its own if startup failed (the one
        // fatal case). Surface the error now instead of idling watcher-less.
        result = &mut watch_loop => {
            cancel.cancel();
            let http_result = http.await;
            result??;
            http_result??;
            return Ok(());
        }
    }

    let (watch_result, http_result) = tokio::join!(watch_loop, http);
    watch_result??;
    http_result??;
    Ok(())
}

/// Native messaging mode: framed stdio loop for the browser extension.
/// stdout carries only protocol frames; logs go to stderr and the file.
async fn run_native_host(config: AppConfig) -> anyhow::Result<()> {
    let _guard = init_tracing(&config);

    let composer = dispatch::platform_composer()?;
    let pipeline = Arc::new(AttachPipeline::new(&config, composer));
    native_host::run(pipeline).await?;
    Ok(())
}

/// Health-check a running instance.
async fn run_ping(config: AppConfig) -> anyhow::Result<()> {
    let url = format!("http://127.0.0.1:{}/health", config.http_port);
    match reqwest::get(&url).await {
        Ok(response) if response.status().is_success() => {
            println!("ok");
            Ok(())
        }
        Ok(response) => {
            eprintln!("unhealthy: HTTP {}", response.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("not running: {e}");
            std::process::exit(1);
        }
    }
}

/// Ask a running instance to shut down.
async fn run_stop(config: AppConfig) -> anyhow::Result<()> {
    let url = format!("http://127.0.0.1:{}/stop", config.http_port);
    let client = reqwest::Client::new();
    match client.post(&url).send().await {
        Ok(response) if response.status().is_success() => {
            println!("stopped");
            Ok(())
        }
        Ok(response) => {
            eprintln!("stop failed: HTTP {}", response.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("not running: {e}");
            std::process::exit(1);
        }
    }
}
