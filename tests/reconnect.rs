//! Reconnection behavior of the backend supervisor: bounded attempts,
//! counter reset on success, terminal error on budget exhaustion.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use scribed::backend::{
    BackendCommand, BackendKind, BackendStream, BackendSupervisor, FileTranscript, StreamParams,
    TranscriptEvent, TranscriptionBackend,
};
use scribed::error::PipelineError;

/// Backend whose connections the test can sever, and which can be switched
/// into a permanently-failing mode.
#[derive(Default)]
struct FlakyBackend {
    opens: AtomicUsize,
    failing: AtomicBool,
    /// Event senders of live connections; dropping one severs it.
    connections: Mutex<Vec<mpsc::Sender<TranscriptEvent>>>,
}

impl FlakyBackend {
    fn sever_latest(&self) {
        self.connections.lock().unwrap().pop();
    }
}

#[async_trait]
impl TranscriptionBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "Flaky"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    fn validate(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn open_stream(&self, _params: &StreamParams) -> Result<BackendStream, PipelineError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PipelineError::BackendConnection("refused".to_string()));
        }

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<BackendCommand>(64);
        let (event_tx, event_rx) = mpsc::channel::<TranscriptEvent>(64);

        // Drain commands; a Close ends the connection task.
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                if matches!(cmd, BackendCommand::Close) {
                    break;
                }
            }
        });

        self.connections.lock().unwrap().push(event_tx);
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

fn params() -> StreamParams {
    StreamParams {
        sample_rate: 16_000,
        language: "en".to_string(),
        diarize: false,
        interim_results: true,
        utterance_end_ms: 1000,
        endpointing_ms: 300,
        keywords: Vec::new(),
    }
}

fn supervisor(backend: Arc<FlakyBackend>, max_attempts: u32) -> BackendSupervisor {
    BackendSupervisor::new(
        backend,
        params(),
        max_attempts,
        Duration::from_millis(20),
        Duration::from_secs(60),
    )
}

async fn next_event(
    events: &mut mpsc::Receiver<TranscriptEvent>,
    within: Duration,
) -> Option<TranscriptEvent> {
    tokio::time::timeout(within, events.recv()).await.ok()?
}

#[tokio::test]
async fn disconnect_triggers_reconnect_and_resets_counter() {
    let backend = Arc::new(FlakyBackend::default());
    let mut stream = supervisor(backend.clone(), 3).open().await.unwrap();
    assert_eq!(backend.opens.load(Ordering::SeqCst), 1);

    // Sever the connection; the supervisor should reconnect silently.
    backend.sever_latest();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.opens.load(Ordering::SeqCst), 2);

    // The stream stays usable and no terminal error surfaced.
    stream
        .commands
        .send(BackendCommand::Audio(vec![0.0; 160]))
        .await
        .unwrap();
    assert!(
        next_event(&mut stream.events, Duration::from_millis(100))
            .await
            .is_none(),
        "no events expected after a clean reconnect"
    );

    // Sever again: the counter was reset, so this also reconnects.
    backend.sever_latest();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.opens.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn budget_exhaustion_surfaces_terminal_error() {
    let backend = Arc::new(FlakyBackend::default());
    let mut stream = supervisor(backend.clone(), 3).open().await.unwrap();

    backend.failing.store(true, Ordering::SeqCst);
    backend.sever_latest();

    // Expect exactly max_attempts failed reopen attempts, then a terminal
    // error followed by Closed.
    let event = next_event(&mut stream.events, Duration::from_secs(2))
        .await
        .expect("terminal error expected");
    match event {
        TranscriptEvent::Error { terminal, .. } => assert!(terminal),
        other => panic!("unexpected event: {:?}", other),
    }
    match next_event(&mut stream.events, Duration::from_secs(1)).await {
        Some(TranscriptEvent::Closed) | None => {}
        other => panic!("unexpected event: {:?}", other),
    }

    // 1 initial + 3 failed reconnects.
    assert_eq!(backend.opens.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn close_shuts_down_without_reconnecting() {
    let backend = Arc::new(FlakyBackend::default());
    let mut stream = supervisor(backend.clone(), 3).open().await.unwrap();

    stream.commands.send(BackendCommand::Close).await.unwrap();
    // Let the supervisor register the close before the connection drops.
    tokio::time::sleep(Duration::from_millis(50)).await;
    backend.sever_latest();

    match next_event(&mut stream.events, Duration::from_secs(1)).await {
        Some(TranscriptEvent::Closed) | None => {}
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(backend.opens.load(Ordering::SeqCst), 1);
}
