//! REST control API for scribed.
//!
//! Localhost-only endpoints for recording control and stored sessions. The
//! handlers talk to the orchestrator through a command channel and the
//! shared status handle; they never touch the pipeline directly.

pub mod routes;

use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;

use crate::config::Config;
use crate::orchestrator::StatusHandle;
use crate::session::SessionStore;

pub use routes::recording::{ApiCommand, RecordingState};

pub struct ApiServer {
    port: u16,
    recording_state: RecordingState,
    store: Arc<dyn SessionStore>,
}

impl ApiServer {
    pub fn new(
        tx: tokio::sync::mpsc::Sender<ApiCommand>,
        status: StatusHandle,
        store: Arc<dyn SessionStore>,
        config: &Config,
    ) -> Self {
        Self {
            port: config.api.port,
            recording_state: RecordingState { tx, status },
            store,
        }
    }

    pub async fn start(self) -> Result<()> {
        let app = Router::new()
            .route("/", get(status))
            .route("/version", get(version))
            .merge(routes::recording::router(self.recording_state))
            .nest("/sessions", routes::sessions::router(self.store))
            .layer(ServiceBuilder::new());

        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  GET  /              - Service info");
        info!("  GET  /version       - Version info");
        info!("  POST /start         - Start recording (body: {{\"mode\": \"both\"}})");
        info!("  POST /stop          - Stop recording and persist the session");
        info!("  GET  /status        - Recorder status");
        info!("  GET  /sessions      - List stored sessions");
        info!("  GET  /sessions/:id  - Full session with transcript");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "scribed",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "scribed"
    }))
}
