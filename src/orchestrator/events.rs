//! Typed session events produced by the orchestrator.
//!
//! Consumers subscribe to a broadcast channel instead of registering
//! delegate callbacks; slow subscribers lag without blocking the pipeline.

use tokio::sync::broadcast;

use crate::audio::SourceTag;
use crate::session::{SourceMode, TranscriptSegment};

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started {
        session_id: String,
        mode: SourceMode,
    },
    /// Live transcript for one source, recomputed on every backend event.
    Transcript {
        source: SourceTag,
        text: String,
        is_final: bool,
    },
    SegmentAdded {
        segment: TranscriptSegment,
    },
    SpeakerIdentified {
        speaker_id: i64,
        name: String,
    },
    SessionSaved {
        session_id: String,
    },
    Stopped {
        session_id: String,
    },
    Error {
        message: String,
        terminal: bool,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }
}

impl EventBus {
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. No subscribers is not an error.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(SessionEvent::Started {
            session_id: "s".to_string(),
            mode: SourceMode::Both,
        });

        match rx.recv().await.unwrap() {
            SessionEvent::Started { session_id, .. } => assert_eq!(session_id, "s"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.emit(SessionEvent::Stopped {
            session_id: "s".to_string(),
        });
    }
}
