//! Connection supervision: bounded reconnection and idle keepalive.
//!
//! Wraps a backend stream so the orchestrator sees one stable channel pair
//! for the whole recording. An unexpected disconnect triggers up to
//! `max_attempts` reconnects with a fixed delay; any successful reconnect
//! resets the counter. Keepalives fire on a timer only while no audio has
//! been sent within the interval.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::event::{BackendCommand, TranscriptEvent};
use super::{BackendStream, StreamParams, TranscriptionBackend};
use crate::error::PipelineError;

/// Reconnection attempt accounting, kept separate so the budget rules are
/// testable without a connection.
#[derive(Debug)]
pub struct RetryBudget {
    max_attempts: u32,
    attempts: u32,
}

impl RetryBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: 0,
        }
    }

    /// Record a failed attempt. Returns `false` once the budget is spent.
    pub fn record_failure(&mut self) -> bool {
        self.attempts += 1;
        self.attempts <= self.max_attempts
    }

    /// A successful reconnect resets the counter to zero.
    pub fn record_success(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

pub struct BackendSupervisor {
    backend: Arc<dyn TranscriptionBackend>,
    params: StreamParams,
    max_attempts: u32,
    retry_delay: Duration,
    keepalive_interval: Duration,
}

impl BackendSupervisor {
    pub fn new(
        backend: Arc<dyn TranscriptionBackend>,
        params: StreamParams,
        max_attempts: u32,
        retry_delay: Duration,
        keepalive_interval: Duration,
    ) -> Self {
        Self {
            backend,
            params,
            max_attempts,
            retry_delay,
            keepalive_interval,
        }
    }

    /// Open the initial connection and start supervising it. The first
    /// connection failing is surfaced directly; reconnection only covers
    /// drops after a connection was up.
    pub async fn open(&self) -> Result<BackendStream, PipelineError> {
        let inner = self.backend.open_stream(&self.params).await?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<BackendCommand>(256);
        let (event_tx, event_rx) = mpsc::channel::<TranscriptEvent>(256);

        tokio::spawn(supervise(
            self.backend.clone(),
            self.params.clone(),
            inner,
            cmd_rx,
            event_tx,
            RetryBudget::new(self.max_attempts),
            self.retry_delay,
            self.keepalive_interval,
        ));

        Ok(BackendStream {
            commands: cmd_tx,
            events: event_rx,
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn supervise(
    backend: Arc<dyn TranscriptionBackend>,
    params: StreamParams,
    mut inner: BackendStream,
    mut cmd_rx: mpsc::Receiver<BackendCommand>,
    event_tx: mpsc::Sender<TranscriptEvent>,
    mut budget: RetryBudget,
    retry_delay: Duration,
    keepalive_interval: Duration,
) {
    let mut last_audio = Instant::now();
    let mut closing = false;
    let mut commands_open = true;

    let mut keepalive = tokio::time::interval_at(
        Instant::now() + keepalive_interval,
        keepalive_interval,
    );

    'outer: loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if commands_open => {
                let cmd = match cmd {
                    Some(cmd) => cmd,
                    None => {
                        // Caller dropped the handle; treat as a close.
                        commands_open = false;
                        closing = true;
                        let _ = inner.commands.send(BackendCommand::Close).await;
                        continue;
                    }
                };
                if matches!(cmd, BackendCommand::Audio(_)) {
                    last_audio = Instant::now();
                }
                if matches!(cmd, BackendCommand::Close) {
                    closing = true;
                }
                // A dead connection shows up as the event channel closing;
                // the send failure itself needs no handling here.
                let _ = inner.commands.send(cmd).await;
            },
            _ = keepalive.tick() => {
                // Keepalive only while otherwise idle; independent of the
                // reconnection counter.
                if !closing && last_audio.elapsed() >= keepalive_interval {
                    debug!("Sending keepalive to {}", backend.name());
                    let _ = inner.commands.send(BackendCommand::KeepAlive).await;
                }
            },
            event = inner.events.recv() => {
                match event {
                    Some(TranscriptEvent::Closed) | None => {
                        if closing {
                            let _ = event_tx.send(TranscriptEvent::Closed).await;
                            break;
                        }
                        // Unexpected disconnect during recording.
                        loop {
                            if !budget.record_failure() {
                                warn!(
                                    "Reconnection budget exhausted after {} attempts",
                                    budget.attempts() - 1
                                );
                                let _ = event_tx
                                    .send(TranscriptEvent::Error {
                                        message: format!(
                                            "backend connection lost; {} reconnect attempts failed",
                                            budget.attempts() - 1
                                        ),
                                        terminal: true,
                                    })
                                    .await;
                                let _ = event_tx.send(TranscriptEvent::Closed).await;
                                break 'outer;
                            }

                            warn!(
                                "Backend disconnected, reconnect attempt {}",
                                budget.attempts()
                            );
                            tokio::time::sleep(retry_delay).await;

                            match backend.open_stream(&params).await {
                                Ok(stream) => {
                                    info!("Reconnected to {}", backend.name());
                                    inner = stream;
                                    budget.record_success();
                                    continue 'outer;
                                }
                                Err(e) => {
                                    warn!("Reconnect failed: {}", e);
                                }
                            }
                        }
                    }
                    Some(TranscriptEvent::Error { message, terminal }) => {
                        // Inner terminal errors become non-terminal here;
                        // the supervisor owns terminal semantics and a
                        // Closed event will follow to drive reconnection.
                        if terminal {
                            warn!("Backend error: {}", message);
                        }
                        let _ = event_tx
                            .send(TranscriptEvent::Error {
                                message,
                                terminal: false,
                            })
                            .await;
                    }
                    Some(event) => {
                        let _ = event_tx.send(event).await;
                    }
                }
            }
        }
    }
    debug!("Supervisor for {} exited", backend.name());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_allows_exactly_max_attempts() {
        let mut budget = RetryBudget::new(3);
        assert!(budget.record_failure());
        assert!(budget.record_failure());
        assert!(budget.record_failure());
        assert!(!budget.record_failure());
    }

    #[test]
    fn success_resets_the_counter() {
        let mut budget = RetryBudget::new(2);
        assert!(budget.record_failure());
        assert!(budget.record_failure());
        budget.record_success();
        assert_eq!(budget.attempts(), 0);
        // Full budget available again after a successful reconnect.
        assert!(budget.record_failure());
        assert!(budget.record_failure());
        assert!(!budget.record_failure());
    }

    #[test]
    fn zero_budget_never_allows_retry() {
        let mut budget = RetryBudget::new(0);
        assert!(!budget.record_failure());
    }
}
