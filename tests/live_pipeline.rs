//! End-to-end pipeline tests with a scripted backend and scripted audio
//! sources: VAD gating, dual-source speaker ranges, and the stop grace
//! window.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use scribed::audio::{AudioFrame, AudioSource, SourceTag, SAMPLE_RATE};
use scribed::backend::{
    BackendCommand, BackendKind, BackendStream, FileTranscript, StreamParams, TranscriptEvent,
    TranscriptionBackend,
};
use scribed::error::PipelineError;
use scribed::orchestrator::{
    EventBus, OrchestratorConfig, RecordingOrchestrator, SessionEvent, StatusHandle,
};
use scribed::session::{SessionStore, SourceMode, SqliteSessionStore, SYSTEM_SPEAKER_BASE};
use scribed::speaker::{IdentifierConfig, SpeakerIdentifier};
use scribed::transcript::BracketAnnotationFilter;

/// One opened mock connection: the test can count received audio commands
/// and inject transcript events.
struct MockConnection {
    audio_commands: Arc<AtomicUsize>,
    event_tx: mpsc::Sender<TranscriptEvent>,
}

/// Backend whose connections are driven by the test.
#[derive(Default)]
struct MockBackend {
    connections: Mutex<Vec<MockConnection>>,
}

impl MockBackend {
    fn connection_audio_count(&self, index: usize) -> usize {
        self.connections.lock().unwrap()[index]
            .audio_commands
            .load(Ordering::SeqCst)
    }

    async fn inject(&self, index: usize, event: TranscriptEvent) {
        let tx = self.connections.lock().unwrap()[index].event_tx.clone();
        // After teardown the receiving side is gone; that is fine for the
        // "too late" injections.
        let _ = tx.send(event).await;
    }

    fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

#[async_trait]
impl TranscriptionBackend for MockBackend {
    fn name(&self) -> &'static str {
        "Mock"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    fn validate(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn open_stream(&self, _params: &StreamParams) -> Result<BackendStream, PipelineError> {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<BackendCommand>(256);
        let (event_tx, event_rx) = mpsc::channel::<TranscriptEvent>(256);

        let audio_commands = Arc::new(AtomicUsize::new(0));
        let counter = audio_commands.clone();
        let closer = event_tx.clone();

        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    BackendCommand::Audio(_) => {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    BackendCommand::Close => {
                        let _ = closer.send(TranscriptEvent::Closed).await;
                        break;
                    }
                    BackendCommand::KeepAlive | BackendCommand::Flush => {}
                }
            }
        });

        self.connections.lock().unwrap().push(MockConnection {
            audio_commands,
            event_tx,
        });

        Ok(BackendStream {
            commands: cmd_tx,
            events: event_rx,
        })
    }

    async fn transcribe_file(
        &self,
        _path: &Path,
        _language: Option<&str>,
    ) -> Result<FileTranscript, PipelineError> {
        Ok(FileTranscript::default())
    }
}

/// Source that delivers a fixed set of frames, then stays open (silent)
/// until stopped.
struct ScriptedSource {
    tag: SourceTag,
    frames: Vec<Vec<f32>>,
    holder: Option<mpsc::Sender<AudioFrame>>,
    active: bool,
}

impl ScriptedSource {
    fn new(tag: SourceTag, frames: Vec<Vec<f32>>) -> Self {
        Self {
            tag,
            frames,
            holder: None,
            active: false,
        }
    }

    fn silent(tag: SourceTag, secs: f32) -> Self {
        Self::new(tag, frames_of(vec![0.0; (secs * SAMPLE_RATE as f32) as usize]))
    }

    fn speech(tag: SourceTag, secs: f32) -> Self {
        let n = (secs * SAMPLE_RATE as f32) as usize;
        let signal: Vec<f32> = (0..n)
            .map(|i| {
                (2.0 * std::f32::consts::PI * 200.0 * i as f32 / SAMPLE_RATE as f32).sin() * 0.5
            })
            .collect();
        Self::new(tag, frames_of(signal))
    }
}

fn frames_of(signal: Vec<f32>) -> Vec<Vec<f32>> {
    signal.chunks(1600).map(|c| c.to_vec()).collect()
}

impl AudioSource for ScriptedSource {
    fn tag(&self) -> SourceTag {
        self.tag
    }

    fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, PipelineError> {
        let (tx, rx) = mpsc::channel(self.frames.len() + 1);
        let mut elapsed_ms = 0u64;
        for samples in self.frames.drain(..) {
            let frame_ms = samples.len() as u64 * 1000 / SAMPLE_RATE as u64;
            tx.try_send(AudioFrame {
                samples,
                source: self.tag,
                elapsed_ms,
            })
            .expect("channel sized for all frames");
            elapsed_ms += frame_ms;
        }
        // Keep the channel open until stop so the pump stays alive.
        self.holder = Some(tx);
        self.active = true;
        Ok(rx)
    }

    fn stop(&mut self) {
        self.holder = None;
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn audio_path(&self) -> Option<std::path::PathBuf> {
        None
    }
}

fn test_params() -> StreamParams {
    StreamParams {
        sample_rate: SAMPLE_RATE,
        language: "en".to_string(),
        diarize: true,
        interim_results: true,
        utterance_end_ms: 1000,
        endpointing_ms: 300,
        keywords: Vec::new(),
    }
}

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        capture_grace: Duration::from_millis(100),
        final_grace: Duration::from_millis(400),
        keepalive_interval: Duration::from_secs(60),
        autosave_interval: Duration::from_secs(60),
        max_reconnect_attempts: 3,
        reconnect_delay: Duration::from_millis(50),
        vad_enabled: true,
        vad_threshold: 0.01,
    }
}

fn identifier() -> Arc<SpeakerIdentifier> {
    Arc::new(SpeakerIdentifier::new(
        IdentifierConfig {
            embedding_distance_threshold: 0.45,
            feature_similarity_threshold: 0.95,
            min_buffer_secs: 1.0,
            match_window_secs: 3.0,
            buffer_secs: 5.0,
            cooldown: Duration::ZERO,
            min_peak_amplitude: 0.01,
            max_training_secs: 10.0,
        },
        Vec::new(),
        None,
    ))
}

struct Harness {
    backend: Arc<MockBackend>,
    orchestrator: RecordingOrchestrator,
    events: EventBus,
    _tmp: tempfile::TempDir,
}

fn harness() -> Harness {
    let backend = Arc::new(MockBackend::default());
    let tmp = tempfile::tempdir().unwrap();
    let store: Arc<dyn SessionStore> =
        Arc::new(SqliteSessionStore::new(tmp.path().join("test.db")));
    let events = EventBus::default();

    let orchestrator = RecordingOrchestrator::new(
        test_config(),
        backend.clone(),
        test_params(),
        store,
        identifier(),
        Arc::new(BracketAnnotationFilter::default()),
        StatusHandle::default(),
        events.clone(),
    );

    Harness {
        backend,
        orchestrator,
        events,
        _tmp: tmp,
    }
}

fn final_results(text: &str, speaker: Option<u32>) -> TranscriptEvent {
    TranscriptEvent::Results {
        text: text.to_string(),
        is_final: true,
        speech_final: true,
        confidence: 0.95,
        words: Vec::new(),
        speaker,
        detected_language: None,
    }
}

#[tokio::test]
async fn silent_mic_is_vad_gated_while_system_speech_flows() {
    let h = harness();

    let sources: Vec<Box<dyn AudioSource>> = vec![
        Box::new(ScriptedSource::silent(SourceTag::Microphone, 2.0)),
        Box::new(ScriptedSource::speech(SourceTag::System, 2.0)),
    ];

    h.orchestrator.start(SourceMode::Both, sources).await.unwrap();
    assert_eq!(h.backend.connection_count(), 2);

    // Let the pumps drain the scripted frames.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(
        h.backend.connection_audio_count(0),
        0,
        "silent mic audio must be gated"
    );
    assert!(
        h.backend.connection_audio_count(1) > 0,
        "system speech must reach the backend"
    );

    // The speech-bearing path produces a transcript event.
    let mut rx = h.events.subscribe();
    h.backend
        .inject(1, final_results("hello from the call", Some(0)))
        .await;

    let event = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(SessionEvent::Transcript { source, .. }) = rx.recv().await {
                break source;
            }
        }
    })
    .await
    .expect("transcript event expected");
    assert_eq!(event, SourceTag::System);

    let session = h.orchestrator.stop().await.unwrap();
    assert_eq!(session.segments.len(), 1);
}

#[tokio::test]
async fn dual_source_speaker_ids_never_collide() {
    let h = harness();

    let sources: Vec<Box<dyn AudioSource>> = vec![
        Box::new(ScriptedSource::speech(SourceTag::Microphone, 1.0)),
        Box::new(ScriptedSource::speech(SourceTag::System, 1.0)),
    ];
    h.orchestrator.start(SourceMode::Both, sources).await.unwrap();

    h.backend.inject(0, final_results("me talking", Some(0))).await;
    h.backend.inject(0, final_results("still me", Some(1))).await;
    h.backend.inject(1, final_results("them talking", Some(0))).await;
    h.backend.inject(1, final_results("someone else", Some(3))).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let session = h.orchestrator.stop().await.unwrap();
    assert_eq!(session.segments.len(), 4);

    for segment in &session.segments {
        let id = segment.speaker_id.unwrap();
        match segment.source {
            SourceTag::Microphone => assert!(id < SYSTEM_SPEAKER_BASE),
            SourceTag::System => assert!(id >= SYSTEM_SPEAKER_BASE),
            SourceTag::Unknown => panic!("unexpected source"),
        }
    }

    // Speakers were created lazily for each distinct ID.
    assert_eq!(session.speakers.len(), 4);
}

#[tokio::test]
async fn final_inside_grace_window_is_kept_after_is_dropped() {
    let h = harness();

    let sources: Vec<Box<dyn AudioSource>> =
        vec![Box::new(ScriptedSource::speech(SourceTag::Microphone, 1.0))];
    h.orchestrator
        .start(SourceMode::Microphone, sources)
        .await
        .unwrap();

    h.backend
        .inject(0, final_results("spoken before stop", Some(0)))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Stop takes capture_grace (100ms) + final_grace (400ms); inject a
    // trailing final while the grace window is open.
    let backend = h.backend.clone();
    let injector = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        backend
            .inject(0, final_results("trailing words", Some(0)))
            .await;
    });

    let session = h.orchestrator.stop().await.unwrap();
    injector.await.unwrap();

    let texts: Vec<&str> = session.segments.iter().map(|s| s.text.as_str()).collect();
    assert!(texts.contains(&"spoken before stop"));
    assert!(
        texts.contains(&"trailing words"),
        "final within the grace window must be incorporated, got {:?}",
        texts
    );

    // Anything after teardown is discarded.
    let mut rx = h.events.subscribe();
    h.backend.inject(0, final_results("too late", Some(0))).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut saw_segment = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, SessionEvent::SegmentAdded { .. }) {
            saw_segment = true;
        }
    }
    assert!(!saw_segment, "events after teardown must be dropped");
}

#[tokio::test]
async fn stop_without_recording_is_an_invalid_transition() {
    let h = harness();
    assert!(h.orchestrator.stop().await.is_err());
}

#[tokio::test]
async fn annotations_never_become_segments_live() {
    let h = harness();

    let sources: Vec<Box<dyn AudioSource>> =
        vec![Box::new(ScriptedSource::speech(SourceTag::Microphone, 1.0))];
    h.orchestrator
        .start(SourceMode::Microphone, sources)
        .await
        .unwrap();

    h.backend.inject(0, final_results("(music)", None)).await;
    h.backend.inject(0, final_results("[Applause]", None)).await;
    h.backend.inject(0, final_results("*laughs*", None)).await;
    h.backend.inject(0, final_results("actual speech", None)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let session = h.orchestrator.stop().await.unwrap();
    assert_eq!(session.segments.len(), 1);
    assert_eq!(session.segments[0].text, "actual speech");
}
