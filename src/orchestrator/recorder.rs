//! The recording orchestrator.
//!
//! Owns the session lifecycle: opens one backend connection per audio
//! source, pumps gated audio frames in, routes transcript events through a
//! per-source assembler into the shared session, and sequences the two-step
//! grace window on stop. All collaborators are injected; one orchestrator
//! exists per process.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioFrame, AudioSource, SourceTag, VoiceActivityGate};
use crate::backend::{
    BackendCommand, BackendKind, BackendSupervisor, StreamParams, TranscriptEvent,
    TranscriptionBackend,
};
use crate::config::Config;
use crate::error::PipelineError;
use crate::session::{RecordingSession, SessionStore, SourceMode};
use crate::speaker::SpeakerIdentifier;
use crate::transcript::{AnnotationFilter, SegmentAssembler};

use super::events::{EventBus, SessionEvent};
use super::state::{RecorderPhase, StatusHandle};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Extra capture time after a stop request.
    pub capture_grace: Duration,
    /// How long to wait for trailing final results after capture stops.
    pub final_grace: Duration,
    pub keepalive_interval: Duration,
    pub autosave_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub vad_enabled: bool,
    pub vad_threshold: f32,
}

impl OrchestratorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            capture_grace: Duration::from_millis(config.audio.capture_grace_ms),
            final_grace: Duration::from_millis(config.audio.final_grace_ms),
            keepalive_interval: Duration::from_secs(config.backend.keepalive_interval_secs),
            autosave_interval: Duration::from_secs(config.session.autosave_interval_secs.max(1)),
            max_reconnect_attempts: config.backend.max_reconnect_attempts,
            reconnect_delay: Duration::from_millis(config.backend.reconnect_delay_ms),
            vad_enabled: config.audio.vad_enabled,
            vad_threshold: config.audio.vad_threshold,
        }
    }
}

struct SourcePipeline {
    tag: SourceTag,
    source: Box<dyn AudioSource>,
    commands: mpsc::Sender<BackendCommand>,
    audio_path: Option<PathBuf>,
    pump: JoinHandle<()>,
    events_task: JoinHandle<()>,
}

struct ActiveRecording {
    session: Arc<tokio::sync::Mutex<RecordingSession>>,
    accepting: Arc<AtomicBool>,
    pipelines: Vec<SourcePipeline>,
    timers: CancellationToken,
    autosave: JoinHandle<()>,
}

pub struct RecordingOrchestrator {
    config: OrchestratorConfig,
    backend: Arc<dyn TranscriptionBackend>,
    params: StreamParams,
    store: Arc<dyn SessionStore>,
    identifier: Arc<SpeakerIdentifier>,
    filter: Arc<dyn AnnotationFilter>,
    status: StatusHandle,
    events: EventBus,
    active: tokio::sync::Mutex<Option<ActiveRecording>>,
}

impl RecordingOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        backend: Arc<dyn TranscriptionBackend>,
        params: StreamParams,
        store: Arc<dyn SessionStore>,
        identifier: Arc<SpeakerIdentifier>,
        filter: Arc<dyn AnnotationFilter>,
        status: StatusHandle,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            backend,
            params,
            store,
            identifier,
            filter,
            status,
            events,
            active: tokio::sync::Mutex::new(None),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn status(&self) -> &StatusHandle {
        &self.status
    }

    /// Start recording from the given sources. Sources must match `mode`;
    /// in dual mode a failing source degrades the session to the surviving
    /// one instead of aborting.
    pub async fn start(
        &self,
        mode: SourceMode,
        sources: Vec<Box<dyn AudioSource>>,
    ) -> Result<String, PipelineError> {
        let mut active_guard = self.active.lock().await;
        self.status.transition(RecorderPhase::Starting).await?;

        if let Err(e) = self.backend.validate() {
            self.status.fail(e.to_string()).await;
            self.events.emit(SessionEvent::Error {
                message: e.to_string(),
                terminal: true,
            });
            return Err(e);
        }

        self.identifier.reset_session();

        let session = RecordingSession::new(mode);
        let session_id = session.id.clone();
        let session = Arc::new(tokio::sync::Mutex::new(session));
        let accepting = Arc::new(AtomicBool::new(true));
        let started = Instant::now();

        let mut pipelines: Vec<SourcePipeline> = Vec::new();

        for mut source in sources {
            let tag = source.tag();

            // One backend connection per source, opened before capture so
            // no audio is dropped while the connection handshakes.
            let supervisor = BackendSupervisor::new(
                self.backend.clone(),
                self.params.clone(),
                self.config.max_reconnect_attempts,
                self.config.reconnect_delay,
                self.config.keepalive_interval,
            );
            let stream = match supervisor.open().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to open backend connection for {}: {}", tag.as_str(), e);
                    teardown_pipelines(&mut pipelines).await;
                    self.status.fail(e.to_string()).await;
                    self.events.emit(SessionEvent::Error {
                        message: e.to_string(),
                        terminal: true,
                    });
                    return Err(e);
                }
            };

            let frames = match source.start() {
                Ok(frames) => frames,
                Err(e) => {
                    // A dead device degrades dual mode to single source.
                    warn!("Failed to start {} capture: {}", tag.as_str(), e);
                    self.events.emit(SessionEvent::Error {
                        message: e.to_string(),
                        terminal: false,
                    });
                    let _ = stream.commands.send(BackendCommand::Close).await;
                    continue;
                }
            };

            let audio_path = source.audio_path();
            let vad = self
                .config
                .vad_enabled
                .then(|| VoiceActivityGate::new(self.config.vad_threshold));

            // Voice-activity end flushes the local accumulate buffer early;
            // the cloud backend endpoints on its own.
            let flush_on_silence = self.backend.kind() == BackendKind::Local;
            let pump = spawn_pump(
                tag,
                frames,
                stream.commands.clone(),
                self.identifier.clone(),
                vad,
                flush_on_silence,
            );
            let events_task = spawn_event_pump(
                tag,
                stream.events,
                accepting.clone(),
                session.clone(),
                self.identifier.clone(),
                self.filter.clone(),
                self.events.clone(),
                started,
            );

            pipelines.push(SourcePipeline {
                tag,
                source,
                commands: stream.commands,
                audio_path,
                pump,
                events_task,
            });
        }

        if pipelines.is_empty() {
            let e = PipelineError::Capture("no audio source could be started".to_string());
            self.status.fail(e.to_string()).await;
            self.events.emit(SessionEvent::Error {
                message: e.to_string(),
                terminal: true,
            });
            return Err(e);
        }

        let timers = CancellationToken::new();
        let autosave = spawn_autosave(
            self.config.autosave_interval,
            session.clone(),
            self.store.clone(),
            self.events.clone(),
            timers.clone(),
        );

        *active_guard = Some(ActiveRecording {
            session,
            accepting,
            pipelines,
            timers,
            autosave,
        });

        self.status
            .begin_recording(session_id.clone(), mode)
            .await?;
        self.events.emit(SessionEvent::Started {
            session_id: session_id.clone(),
            mode,
        });
        info!("Recording {} started ({})", session_id, mode.as_str());

        Ok(session_id)
    }

    /// Stop recording through the two grace windows and persist the
    /// session. Late finals inside the grace window land in the
    /// transcript; anything after teardown is discarded.
    pub async fn stop(&self) -> Result<RecordingSession, PipelineError> {
        let mut active_guard = self.active.lock().await;
        self.status.transition(RecorderPhase::Stopping).await?;

        let Some(mut active) = active_guard.take() else {
            self.status.finish().await;
            return Err(PipelineError::InvalidTransition {
                from: "stopping",
                to: "idle",
            });
        };

        info!("Stopping recording, capture grace {:?}", self.config.capture_grace);

        // Timers stop immediately; in-flight finals do not.
        active.timers.cancel();

        // (a) Keep capturing briefly so trailing words are not truncated.
        tokio::time::sleep(self.config.capture_grace).await;

        // (b) Stop the sources; frame channels close and pumps drain out.
        for pipeline in &mut active.pipelines {
            pipeline.source.stop();
        }

        // (c) Force the local backend to process any sub-minimum remainder.
        if self.backend.kind() == BackendKind::Local {
            for pipeline in &active.pipelines {
                let _ = pipeline.commands.send(BackendCommand::Flush).await;
            }
        }

        // (d) Second grace window: event pumps are still accepting, so
        // finals that were in flight land in the transcript.
        tokio::time::sleep(self.config.final_grace).await;

        // (e) Teardown. From here on, events are discarded.
        active.accepting.store(false, Ordering::SeqCst);
        let _ = tokio::time::timeout(Duration::from_secs(1), active.autosave).await;

        let mut mic_audio_path = None;
        let mut system_audio_path = None;

        for pipeline in active.pipelines.drain(..) {
            let _ = pipeline.commands.send(BackendCommand::Close).await;
            match pipeline.tag {
                SourceTag::Microphone => {
                    mic_audio_path = pipeline.audio_path.map(|p| p.display().to_string());
                }
                SourceTag::System => {
                    system_audio_path = pipeline.audio_path.map(|p| p.display().to_string());
                }
                SourceTag::Unknown => {}
            }

            if tokio::time::timeout(Duration::from_secs(2), pipeline.pump)
                .await
                .is_err()
            {
                warn!("Frame pump for {} did not drain in time", pipeline.tag.as_str());
            }
            if tokio::time::timeout(Duration::from_secs(5), pipeline.events_task)
                .await
                .is_err()
            {
                warn!("Event pump for {} did not close in time", pipeline.tag.as_str());
            }
        }

        let final_session = {
            let mut session = active.session.lock().await;
            session.finalize(mic_audio_path, system_audio_path);
            session.clone()
        };

        // Persistence failure must not lose the transcript; the caller
        // still gets the session back.
        let store = self.store.clone();
        let snapshot = final_session.clone();
        let saved = tokio::task::spawn_blocking(move || store.save_session(&snapshot)).await;
        match saved {
            Ok(Ok(())) => {
                self.events.emit(SessionEvent::SessionSaved {
                    session_id: final_session.id.clone(),
                });
            }
            Ok(Err(e)) => {
                error!("Failed to persist session {}: {}", final_session.id, e);
                self.events.emit(SessionEvent::Error {
                    message: format!("session save failed: {}", e),
                    terminal: false,
                });
            }
            Err(e) => error!("Session save task failed: {}", e),
        }

        self.status.finish().await;
        self.events.emit(SessionEvent::Stopped {
            session_id: final_session.id.clone(),
        });
        info!(
            "Recording {} stopped ({} segments)",
            final_session.id,
            final_session.segments.len()
        );

        Ok(final_session)
    }
}

async fn teardown_pipelines(pipelines: &mut Vec<SourcePipeline>) {
    for mut pipeline in pipelines.drain(..) {
        pipeline.source.stop();
        let _ = pipeline.commands.send(BackendCommand::Close).await;
        pipeline.pump.abort();
        pipeline.events_task.abort();
    }
}

/// Forward captured frames to the backend, gated by voice activity. The
/// send is on its own task, so the capture callback never waits on the
/// network.
fn spawn_pump(
    tag: SourceTag,
    mut frames: mpsc::Receiver<AudioFrame>,
    commands: mpsc::Sender<BackendCommand>,
    identifier: Arc<SpeakerIdentifier>,
    vad: Option<VoiceActivityGate>,
    flush_on_silence: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut was_speech = false;

        while let Some(frame) = frames.recv().await {
            identifier.observe_audio(tag, &frame.samples);

            let is_speech = vad
                .as_ref()
                .map_or(true, |gate| gate.is_speech(&frame.samples));
            if !is_speech {
                // A speech-to-silence edge is the utterance boundary.
                if was_speech && flush_on_silence {
                    let _ = commands.send(BackendCommand::Flush).await;
                }
                was_speech = false;
                continue;
            }
            was_speech = true;

            if commands
                .send(BackendCommand::Audio(frame.samples))
                .await
                .is_err()
            {
                break;
            }
        }
        debug!("Frame pump for {} drained", tag.as_str());
    })
}

/// Route backend events through the per-source assembler into the session.
#[allow(clippy::too_many_arguments)]
fn spawn_event_pump(
    tag: SourceTag,
    mut events: mpsc::Receiver<TranscriptEvent>,
    accepting: Arc<AtomicBool>,
    session: Arc<tokio::sync::Mutex<RecordingSession>>,
    identifier: Arc<SpeakerIdentifier>,
    filter: Arc<dyn AnnotationFilter>,
    bus: EventBus,
    started: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut assembler = SegmentAssembler::new(filter);

        while let Some(event) = events.recv().await {
            if !accepting.load(Ordering::SeqCst) {
                // Past teardown; drain and drop.
                continue;
            }

            match &event {
                TranscriptEvent::Error { message, terminal } => {
                    bus.emit(SessionEvent::Error {
                        message: message.clone(),
                        terminal: *terminal,
                    });
                    continue;
                }
                TranscriptEvent::Closed => continue,
                _ => {}
            }

            let elapsed = started.elapsed().as_secs_f64();
            let update = assembler.handle(tag, &event, elapsed);

            if let Some(text) = update.live_text {
                bus.emit(SessionEvent::Transcript {
                    source: tag,
                    text,
                    is_final: update.is_final,
                });
            }

            let Some(segment) = update.segment else {
                continue;
            };
            let speaker_id = segment.speaker_id;

            {
                let mut session = session.lock().await;
                if let Some(id) = speaker_id {
                    session.ensure_speaker(id);
                }
                session.push_segment(segment.clone());
            }
            bus.emit(SessionEvent::SegmentAdded { segment });

            // Identification runs off the event path; it is compute-bound.
            if let Some(id) = speaker_id {
                let identifier = identifier.clone();
                let session = session.clone();
                let bus = bus.clone();
                tokio::spawn(async move {
                    let matched =
                        tokio::task::spawn_blocking(move || identifier.identify(tag, id))
                            .await
                            .ok()
                            .flatten();
                    if let Some(matched) = matched {
                        {
                            let mut session = session.lock().await;
                            let speaker = session.ensure_speaker(id);
                            speaker.name = Some(matched.name.clone());
                            if matched.embedding.is_some() {
                                speaker.embedding = matched.embedding.clone();
                            }
                        }
                        bus.emit(SessionEvent::SpeakerIdentified {
                            speaker_id: id,
                            name: matched.name,
                        });
                    }
                });
            }
        }
        debug!("Event pump for {} closed", tag.as_str());
    })
}

/// Periodic snapshot persistence. Failures are logged, never escalated,
/// and the capture path is never blocked.
fn spawn_autosave(
    interval: Duration,
    session: Arc<tokio::sync::Mutex<RecordingSession>>,
    store: Arc<dyn SessionStore>,
    bus: EventBus,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = session.lock().await.clone();
            let session_id = snapshot.id.clone();
            let store = store.clone();
            match tokio::task::spawn_blocking(move || store.save_session(&snapshot)).await {
                Ok(Ok(())) => {
                    debug!("Auto-saved session {}", session_id);
                    bus.emit(SessionEvent::SessionSaved { session_id });
                }
                Ok(Err(e)) => warn!("Auto-save failed for {}: {}", session_id, e),
                Err(e) => warn!("Auto-save task error: {}", e),
            }
        }
    })
}
