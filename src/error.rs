//! Error taxonomy for the recording pipeline.
//!
//! Each variant maps to a distinct recovery policy: configuration errors are
//! terminal and never retried, capture errors may degrade a dual-source
//! session to single-source, connection errors drive bounded reconnection,
//! protocol errors are logged and skipped, and chunk errors stay isolated to
//! one chunk of a batch.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Missing or invalid credentials/model files. Fatal to starting a
    /// session; surfaced immediately, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An audio device failed or disappeared. Fatal to that source only.
    #[error("audio capture error: {0}")]
    Capture(String),

    /// The backend connection dropped or could not be established.
    /// Recoverable up to the reconnection budget.
    #[error("backend connection error: {0}")]
    BackendConnection(String),

    /// The backend sent something we could not understand. Logged and
    /// skipped; does not tear down the connection.
    #[error("backend protocol error: {0}")]
    BackendProtocol(String),

    /// One chunk of a batch transcription failed after retries.
    #[error("chunk {index} failed: {message}")]
    ChunkProcessing { index: usize, message: String },

    /// A lifecycle operation was requested in a phase that does not allow it.
    #[error("invalid recorder transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

impl PipelineError {
    /// Whether the orchestrator should attempt local recovery before
    /// surfacing this error to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::BackendConnection(_)
                | PipelineError::BackendProtocol(_)
                | PipelineError::ChunkProcessing { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_is_not_recoverable() {
        let err = PipelineError::Configuration("missing api key".to_string());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_connection_is_recoverable() {
        let err = PipelineError::BackendConnection("socket closed".to_string());
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_chunk_error_display_includes_index() {
        let err = PipelineError::ChunkProcessing {
            index: 3,
            message: "timeout".to_string(),
        };
        assert!(err.to_string().contains("chunk 3"));
    }
}
