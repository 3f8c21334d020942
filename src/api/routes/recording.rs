//! Recording control endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::orchestrator::StatusHandle;
use crate::session::SourceMode;

/// Commands the API forwards to the service loop.
#[derive(Debug)]
pub enum ApiCommand {
    Start(SourceMode),
    Stop,
}

#[derive(Clone)]
pub struct RecordingState {
    pub tx: mpsc::Sender<ApiCommand>,
    pub status: StatusHandle,
}

#[derive(Debug, Deserialize, Default)]
pub struct StartRequest {
    pub mode: Option<SourceMode>,
}

pub fn router(state: RecordingState) -> Router {
    Router::new()
        .route("/start", post(start_recording))
        .route("/stop", post(stop_recording))
        .route("/status", get(recorder_status))
        .with_state(state)
}

async fn start_recording(
    State(state): State<RecordingState>,
    body: Option<Json<StartRequest>>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let mode = body
        .and_then(|Json(req)| req.mode)
        .unwrap_or(SourceMode::Both);

    state
        .tx
        .send(ApiCommand::Start(mode))
        .await
        .map_err(|_| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "service loop is gone".to_string(),
            )
        })?;

    Ok(Json(json!({ "requested": "start", "mode": mode.as_str() })))
}

async fn stop_recording(
    State(state): State<RecordingState>,
) -> Result<Json<Value>, (StatusCode, String)> {
    state.tx.send(ApiCommand::Stop).await.map_err(|_| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "service loop is gone".to_string(),
        )
    })?;

    Ok(Json(json!({ "requested": "stop" })))
}

async fn recorder_status(State(state): State<RecordingState>) -> Json<Value> {
    let status = state.status.get().await;
    Json(json!({
        "phase": status.phase.as_str(),
        "session_id": status.session_id,
        "mode": status.mode.map(|m| m.as_str()),
        "duration_seconds": status.duration_seconds(),
        "last_error": status.last_error,
    }))
}
