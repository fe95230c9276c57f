//! Native messaging host — framed stdio trigger surface.
//!
//! Speaks the browser native-messaging protocol: each message is a 4-byte
//! little-endian length header followed by a UTF-8 JSON body, symmetric in
//! both directions. Actions: `attach` (run the path through the pipeline)
//! and `ping` (health check). The host always responds, even on malformed
//! input; stdout carries only protocol frames, so logging goes to stderr and
//! the log file.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::{Result, TriggerError};
use crate::pipeline::{AttachOutcome, AttachPipeline};

#[derive(Debug, Deserialize)]
struct HostRequest {
    action: Option<String>,
    #[serde(rename = "filePath")]
    file_path: Option<String>,
}

/// Largest frame body accepted. Browsers cap messages to a native host at
/// 64 MB; anything past that is a corrupt or hostile header, and trusting
/// it would mean a multi-gigabyte allocation.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Read one length-prefixed frame. `None` on clean EOF or a zero-length
/// header (the browser's way of closing the channel). A length beyond
/// [`MAX_FRAME_LEN`] is an `InvalidData` error.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(header) as usize;
    if len == 0 {
        return Ok(None);
    }
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Frame length {len} exceeds the {MAX_FRAME_LEN}-byte limit"),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Write one length-prefixed JSON frame.
pub async fn write_frame<W>(writer: &mut W, value: &serde_json::Value) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value)?;
    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Handle one decoded request. Never fails; malformed input becomes a
/// structured failure response.
pub async fn handle_message(pipeline: &AttachPipeline, body: &[u8]) -> serde_json::Value {
    let request: HostRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            return outcome_json(AttachOutcome::failure(format!("Invalid JSON: {e}")));
        }
    };

    match request.action.as_deref() {
        Some("ping") => json!({ "success": true, "message": "pong" }),
        Some("attach") => {
            let Some(file_path) = request.file_path.filter(|p| !p.is_empty()) else {
                return outcome_json(AttachOutcome::failure(
                    TriggerError::MissingFilePath.to_string(),
                ));
            };
            info!(path = %file_path, "Attach request over native messaging");
            let outcome = pipeline.process_request(PathBuf::from(file_path)).await;
            outcome_json(outcome)
        }
        other => outcome_json(AttachOutcome::failure(format!(
            "Unknown action: {}",
            other.unwrap_or("<none>")
        ))),
    }
}

fn outcome_json(outcome: AttachOutcome) -> serde_json::Value {
    json!({ "success": outcome.success, "message": outcome.message })
}

/// Main loop: read framed requests from stdin, respond on stdout, exit on
/// EOF.
pub async fn run(pipeline: Arc<AttachPipeline>) -> Result<()> {
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();

    info!("Native messaging host started");
    loop {
        let body = match read_frame(&mut stdin).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                debug!("Channel closed, exiting");
                return Ok(());
            }
            // An oversized header cannot be resynced past; answer once and
            // close the channel.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                let response = outcome_json(AttachOutcome::failure(e.to_string()));
                write_frame(&mut stdout, &response)
                    .await
                    .map_err(TriggerError::Io)?;
                return Ok(());
            }
            Err(e) => return Err(TriggerError::Io(e).into()),
        };
        let response = handle_message(&pipeline, &body).await;
        write_frame(&mut stdout, &response)
            .await
            .map_err(TriggerError::Io)?;
    }
}
