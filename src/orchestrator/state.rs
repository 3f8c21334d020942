//! Recorder lifecycle state and shared status handle.
//!
//! The phase is an explicit tagged enum with validated transitions instead
//! of a pile of booleans; the grace-window sequencing in the orchestrator
//! leans on `Stopping` being a real state.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::PipelineError;
use crate::session::SourceMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderPhase {
    Idle,
    Starting,
    Recording,
    Stopping,
}

impl RecorderPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Recording => "recording",
            Self::Stopping => "stopping",
        }
    }

    /// Valid lifecycle edges. `Starting -> Idle` covers startup failure.
    pub fn can_transition_to(&self, next: RecorderPhase) -> bool {
        matches!(
            (self, next),
            (Self::Idle, RecorderPhase::Starting)
                | (Self::Starting, RecorderPhase::Recording)
                | (Self::Starting, RecorderPhase::Idle)
                | (Self::Recording, RecorderPhase::Stopping)
                | (Self::Stopping, RecorderPhase::Idle)
        )
    }
}

/// Current recorder state, readable by API handlers.
#[derive(Debug, Clone)]
pub struct RecorderState {
    pub phase: RecorderPhase,
    pub session_id: Option<String>,
    pub mode: Option<SourceMode>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
}

impl Default for RecorderState {
    fn default() -> Self {
        Self {
            phase: RecorderPhase::Idle,
            session_id: None,
            mode: None,
            started_at: None,
            last_error: None,
        }
    }
}

impl RecorderState {
    pub fn duration_seconds(&self) -> Option<u64> {
        self.started_at.map(|started| {
            let elapsed = chrono::Utc::now() - started;
            elapsed.num_seconds().max(0) as u64
        })
    }
}

/// Thread-safe handle shared between the orchestrator and API handlers.
#[derive(Clone, Default)]
pub struct StatusHandle {
    inner: Arc<Mutex<RecorderState>>,
}

impl StatusHandle {
    pub async fn get(&self) -> RecorderState {
        self.inner.lock().await.clone()
    }

    /// Move to `next`, failing on an invalid edge.
    pub async fn transition(&self, next: RecorderPhase) -> Result<(), PipelineError> {
        let mut state = self.inner.lock().await;
        if !state.phase.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: state.phase.as_str(),
                to: next.as_str(),
            });
        }
        state.phase = next;
        Ok(())
    }

    pub async fn begin_recording(
        &self,
        session_id: String,
        mode: SourceMode,
    ) -> Result<(), PipelineError> {
        let mut state = self.inner.lock().await;
        if !state.phase.can_transition_to(RecorderPhase::Recording) {
            return Err(PipelineError::InvalidTransition {
                from: state.phase.as_str(),
                to: RecorderPhase::Recording.as_str(),
            });
        }
        state.phase = RecorderPhase::Recording;
        state.session_id = Some(session_id);
        state.mode = Some(mode);
        state.started_at = Some(chrono::Utc::now());
        state.last_error = None;
        Ok(())
    }

    /// Startup or recording failed; back to idle with the error recorded.
    pub async fn fail(&self, error: String) {
        let mut state = self.inner.lock().await;
        state.phase = RecorderPhase::Idle;
        state.session_id = None;
        state.mode = None;
        state.started_at = None;
        state.last_error = Some(error);
    }

    /// Clean teardown finished.
    pub async fn finish(&self) {
        let mut state = self.inner.lock().await;
        state.phase = RecorderPhase::Idle;
        state.session_id = None;
        state.mode = None;
        state.started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_as_str() {
        assert_eq!(RecorderPhase::Idle.as_str(), "idle");
        assert_eq!(RecorderPhase::Starting.as_str(), "starting");
        assert_eq!(RecorderPhase::Recording.as_str(), "recording");
        assert_eq!(RecorderPhase::Stopping.as_str(), "stopping");
    }

    #[test]
    fn test_valid_lifecycle_edges() {
        assert!(RecorderPhase::Idle.can_transition_to(RecorderPhase::Starting));
        assert!(RecorderPhase::Starting.can_transition_to(RecorderPhase::Recording));
        assert!(RecorderPhase::Starting.can_transition_to(RecorderPhase::Idle));
        assert!(RecorderPhase::Recording.can_transition_to(RecorderPhase::Stopping));
        assert!(RecorderPhase::Stopping.can_transition_to(RecorderPhase::Idle));
    }

    #[test]
    fn test_invalid_edges_rejected() {
        assert!(!RecorderPhase::Idle.can_transition_to(RecorderPhase::Recording));
        assert!(!RecorderPhase::Idle.can_transition_to(RecorderPhase::Stopping));
        assert!(!RecorderPhase::Recording.can_transition_to(RecorderPhase::Idle));
        assert!(!RecorderPhase::Stopping.can_transition_to(RecorderPhase::Recording));
        assert!(!RecorderPhase::Recording.can_transition_to(RecorderPhase::Starting));
    }

    #[tokio::test]
    async fn test_transition_enforces_edges() {
        let status = StatusHandle::default();
        assert!(status.transition(RecorderPhase::Stopping).await.is_err());
        assert!(status.transition(RecorderPhase::Starting).await.is_ok());
        assert_eq!(status.get().await.phase, RecorderPhase::Starting);
    }

    #[tokio::test]
    async fn test_begin_recording_sets_metadata() {
        let status = StatusHandle::default();
        status.transition(RecorderPhase::Starting).await.unwrap();
        status
            .begin_recording("session-1".to_string(), SourceMode::Both)
            .await
            .unwrap();

        let state = status.get().await;
        assert_eq!(state.phase, RecorderPhase::Recording);
        assert_eq!(state.session_id.as_deref(), Some("session-1"));
        assert_eq!(state.mode, Some(SourceMode::Both));
        assert!(state.started_at.is_some());
    }

    #[tokio::test]
    async fn test_fail_returns_to_idle_with_error() {
        let status = StatusHandle::default();
        status.transition(RecorderPhase::Starting).await.unwrap();
        status.fail("no credentials".to_string()).await;

        let state = status.get().await;
        assert_eq!(state.phase, RecorderPhase::Idle);
        assert_eq!(state.last_error.as_deref(), Some("no credentials"));
        assert!(state.session_id.is_none());
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let status = StatusHandle::default();
        status.transition(RecorderPhase::Starting).await.unwrap();
        status
            .begin_recording("s".to_string(), SourceMode::Microphone)
            .await
            .unwrap();
        status.transition(RecorderPhase::Stopping).await.unwrap();
        status.finish().await;

        assert_eq!(status.get().await.phase, RecorderPhase::Idle);
    }
}
