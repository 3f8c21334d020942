//! Stored session endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::session::{RecordingSession, SessionStore};

#[derive(Debug, Serialize)]
struct SessionSummary {
    id: String,
    started_at: String,
    duration_secs: f64,
    mode: &'static str,
    segment_count: usize,
    speaker_count: usize,
    preview: String,
}

impl From<&RecordingSession> for SessionSummary {
    fn from(session: &RecordingSession) -> Self {
        Self {
            id: session.id.clone(),
            started_at: session.started_at.to_rfc3339(),
            duration_secs: session.duration_secs(),
            mode: session.mode.as_str(),
            segment_count: session.segments.len(),
            speaker_count: session.speakers.len(),
            preview: session.preview(),
        }
    }
}

pub fn router(store: Arc<dyn SessionStore>) -> Router {
    Router::new()
        .route("/", get(list_sessions))
        .route("/:id", get(get_session))
        .with_state(store)
}

async fn list_sessions(
    State(store): State<Arc<dyn SessionStore>>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let sessions = tokio::task::spawn_blocking(move || store.load_sessions())
        .await
        .map_err(internal)?
        .map_err(internal)?;

    let summaries: Vec<SessionSummary> = sessions.iter().map(SessionSummary::from).collect();
    Ok(Json(serde_json::json!({ "sessions": summaries })))
}

async fn get_session(
    State(store): State<Arc<dyn SessionStore>>,
    Path(id): Path<String>,
) -> Result<Json<RecordingSession>, (StatusCode, String)> {
    let session = tokio::task::spawn_blocking(move || store.get_session(&id))
        .await
        .map_err(internal)?
        .map_err(internal)?;

    match session {
        Some(session) => Ok(Json(session)),
        None => Err((StatusCode::NOT_FOUND, "session not found".to_string())),
    }
}

fn internal(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
