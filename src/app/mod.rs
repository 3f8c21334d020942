//! Service wiring.
//!
//! Builds the orchestrator and its collaborators with explicit dependency
//! injection, starts the control API, and runs the command loop. One
//! orchestrator per process; nothing lives in a global.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::api::{ApiCommand, ApiServer};
use crate::audio::{AudioSource, MicAudioSource, SystemAudioSource};
use crate::backend;
use crate::config::Config;
use crate::orchestrator::{
    EventBus, OrchestratorConfig, RecorderPhase, RecordingOrchestrator, SessionEvent, StatusHandle,
};
use crate::session::{SessionStore, SourceMode, SqliteSessionStore};
use crate::speaker::{EmbeddingExtractor, PyannoteEmbedder, SpeakerIdentifier};
use crate::transcript::BracketAnnotationFilter;

pub async fn run_service() -> Result<()> {
    info!("Starting scribed service");

    let config = Config::load()?;

    let backend = backend::build_backend(&config)?;
    let store = Arc::new(SqliteSessionStore::open_default()?);

    let profiles = match store.load_profiles() {
        Ok(profiles) => {
            info!("Loaded {} voice profiles", profiles.len());
            profiles
        }
        Err(e) => {
            warn!("Could not load voice profiles: {}", e);
            Vec::new()
        }
    };

    let identifier = Arc::new(SpeakerIdentifier::new(
        (&config.speaker).into(),
        profiles,
        build_embedder(&config),
    ));

    let status = StatusHandle::default();
    let events = EventBus::default();

    let orchestrator = Arc::new(RecordingOrchestrator::new(
        OrchestratorConfig::from_config(&config),
        backend,
        backend::stream_params(&config),
        store.clone() as Arc<dyn SessionStore>,
        identifier,
        Arc::new(BracketAnnotationFilter::default()),
        status.clone(),
        events.clone(),
    ));

    let (tx, mut rx) = mpsc::channel::<ApiCommand>(10);
    let api_server = ApiServer::new(tx, status.clone(), store.clone(), &config);
    tokio::spawn(async move {
        if let Err(e) = api_server.start().await {
            error!("API server failed: {}", e);
        }
    });

    spawn_event_watcher(events.clone(), status.clone(), orchestrator.clone());

    info!("scribed is ready!");
    info!(
        "Start a recording: curl -X POST http://127.0.0.1:{}/start",
        config.api.port
    );

    while let Some(command) = rx.recv().await {
        match command {
            ApiCommand::Start(mode) => {
                let sources = match build_sources(mode, &config) {
                    Ok(sources) => sources,
                    Err(e) => {
                        error!("Failed to prepare audio sources: {}", e);
                        continue;
                    }
                };
                match orchestrator.start(mode, sources).await {
                    Ok(session_id) => info!("Recording {} running", session_id),
                    Err(e) => error!("Failed to start recording: {}", e),
                }
            }
            ApiCommand::Stop => match orchestrator.stop().await {
                Ok(session) => info!(
                    "Recording {} saved ({} segments, {} speakers)",
                    session.id,
                    session.segments.len(),
                    session.speakers.len()
                ),
                Err(e) => error!("Failed to stop recording: {}", e),
            },
        }
    }

    Ok(())
}

/// Log transcript activity and force teardown on terminal pipeline errors
/// so partial transcripts are persisted instead of stranded.
fn spawn_event_watcher(
    events: EventBus,
    status: StatusHandle,
    orchestrator: Arc<RecordingOrchestrator>,
) {
    tokio::spawn(async move {
        let mut rx = events.subscribe();
        loop {
            match rx.recv().await {
                Ok(SessionEvent::Transcript {
                    source,
                    text,
                    is_final,
                }) => {
                    if is_final {
                        info!("[{}] {}", source.as_str(), text);
                    }
                }
                Ok(SessionEvent::SpeakerIdentified { speaker_id, name }) => {
                    info!("Speaker {} identified as {}", speaker_id, name);
                }
                Ok(SessionEvent::Error { message, terminal }) => {
                    if terminal {
                        error!("Terminal pipeline error: {}", message);
                        if status.get().await.phase == RecorderPhase::Recording {
                            if let Err(e) = orchestrator.stop().await {
                                error!("Emergency stop failed: {}", e);
                            }
                        }
                    } else {
                        warn!("Pipeline error: {}", message);
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event watcher lagged, skipped {} events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Embedding extractor from the configured pyannote model, when present
/// and loadable; identification falls back to legacy features otherwise.
pub fn build_embedder(config: &Config) -> Option<Arc<dyn EmbeddingExtractor>> {
    let path = config.whisper.embedding_model_path.as_ref()?;
    match PyannoteEmbedder::new(Path::new(path)) {
        Ok(embedder) => Some(Arc::new(embedder)),
        Err(e) => {
            warn!("Embedding model unavailable, using feature fallback: {}", e);
            None
        }
    }
}

/// Build capture sources for a mode, each mirroring to a WAV file under the
/// recordings dir.
pub fn build_sources(mode: SourceMode, config: &Config) -> Result<Vec<Box<dyn AudioSource>>> {
    let dir = match &config.session.recordings_dir {
        Some(dir) => PathBuf::from(dir),
        None => crate::global::recordings_dir()?,
    };
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");

    let mut sources: Vec<Box<dyn AudioSource>> = Vec::new();
    for tag in mode.tags() {
        let wav_path = dir.join(format!("{}-{}.wav", stamp, tag.as_str()));
        let source: Box<dyn AudioSource> = match tag {
            crate::audio::SourceTag::Microphone => {
                Box::new(MicAudioSource::new(Some(wav_path)))
            }
            crate::audio::SourceTag::System => Box::new(SystemAudioSource::new(Some(wav_path))),
            crate::audio::SourceTag::Unknown => continue,
        };
        sources.push(source);
    }

    Ok(sources)
}
