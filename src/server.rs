//! HTTP trigger surface for the browser extension.
//!
//! A small loopback server: `POST /attach {"filePath": ...}` runs the path
//! through the shared pipeline and answers `{success, message}`; `GET
//! /health` is the ping surface; `POST /stop` asks a running instance to
//! shut down. CORS is wide open because the caller is a browser extension
//! origin on the same machine.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    extract::rejection::JsonRejection,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::error::{Error, TriggerError};
use crate::pipeline::{AttachOutcome, AttachPipeline};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AttachPipeline>,
    pub cancel: CancellationToken,
}

/// Build the Axum router for the attach surface.
pub fn attach_routes(pipeline: Arc<AttachPipeline>, cancel: CancellationToken) -> Router {
    let state = AppState { pipeline, cancel };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/attach", post(attach))
        .route("/health", get(health))
        .route("/stop", post(stop))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the cancellation token fires.
pub async fn serve(port: u16, router: Router, cancel: CancellationToken) -> Result<(), Error> {
    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        Error::Trigger(TriggerError::BindFailed {
            addr: addr.clone(),
            reason: e.to_string(),
        })
    })?;
    info!(addr = %addr, "Attach endpoint listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| Error::Trigger(TriggerError::Io(e)))?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct AttachRequest {
    #[serde(rename = "filePath")]
    file_path: Option<String>,
}

async fn attach(
    State(state): State<AppState>,
    payload: Result<Json<AttachRequest>, JsonRejection>,
) -> impl IntoResponse {
    // A malformed body still gets the {success, message} shape back.
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return Json(AttachOutcome::failure(format!(
                "Invalid request: {}",
                rejection.body_text()
            )));
        }
    };

    let Some(file_path) = request.file_path.filter(|p| !p.is_empty()) else {
        return Json(AttachOutcome::failure(
            TriggerError::MissingFilePath.to_string(),
        ));
    };

    info!(path = %file_path, "Attach request received");
    let outcome = state.pipeline.process_request(PathBuf::from(file_path)).await;
    Json(outcome)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "auto-attach"
    }))
}

async fn stop(State(state): State<AppState>) -> impl IntoResponse {
    info!("Stop requested over HTTP");
    state.cancel.cancel();
    Json(serde_json::json!({
        "success": true,
        "message": "shutting down"
    }))
}
