//! Transcription backend abstraction.
//!
//! Two implementations: the Deepgram cloud streaming service and the local
//! whisper engine. The orchestrator only sees `TranscriptionBackend` plus
//! the command/event channel pair a stream exposes.

pub mod cloud;
pub mod diarize;
pub mod event;
pub mod local;
pub mod supervisor;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::PipelineError;
pub use event::{BackendCommand, RawSegment, TranscriptEvent, WordInfo};
pub use supervisor::{BackendSupervisor, RetryBudget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Cloud,
    Local,
}

/// Parameters for opening a streaming connection.
#[derive(Debug, Clone)]
pub struct StreamParams {
    pub sample_rate: u32,
    /// Language code, or "auto" for multilingual auto-detect.
    pub language: String,
    pub diarize: bool,
    pub interim_results: bool,
    pub utterance_end_ms: u32,
    pub endpointing_ms: u32,
    pub keywords: Vec<String>,
}

/// A live connection: audio and control go in through `commands`, transcript
/// events come out of `events`. The channel closes when the connection dies.
pub struct BackendStream {
    pub commands: mpsc::Sender<BackendCommand>,
    pub events: mpsc::Receiver<TranscriptEvent>,
}

/// Result of a whole-file (non-streaming) transcription request.
#[derive(Debug, Clone, Default)]
pub struct FileTranscript {
    pub segments: Vec<RawSegment>,
    pub detected_language: Option<String>,
}

#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> BackendKind;

    /// Check credentials/model readiness without opening a connection.
    fn validate(&self) -> Result<(), PipelineError>;

    /// Open a streaming connection.
    async fn open_stream(&self, params: &StreamParams) -> Result<BackendStream, PipelineError>;

    /// Transcribe a whole pre-recorded file.
    async fn transcribe_file(
        &self,
        path: &Path,
        language: Option<&str>,
    ) -> Result<FileTranscript, PipelineError>;
}

/// Build the configured backend. One choice per session, never mixed.
pub fn build_backend(config: &Config) -> Result<Arc<dyn TranscriptionBackend>, PipelineError> {
    match config.backend.provider.as_str() {
        "deepgram" => Ok(Arc::new(cloud::DeepgramBackend::new(&config.deepgram)?)),
        "whisper" => Ok(Arc::new(local::WhisperBackend::new(&config.whisper)?)),
        other => Err(PipelineError::Configuration(format!(
            "Unknown transcription provider '{}'. Supported providers: deepgram, whisper",
            other
        ))),
    }
}

/// Stream parameters derived from config for the configured backend.
pub fn stream_params(config: &Config) -> StreamParams {
    StreamParams {
        sample_rate: crate::audio::SAMPLE_RATE,
        language: config.deepgram.language.clone(),
        diarize: config.deepgram.diarize,
        interim_results: config.deepgram.interim_results,
        utterance_end_ms: config.deepgram.utterance_end_ms,
        endpointing_ms: config.deepgram.endpointing_ms,
        keywords: config.deepgram.keywords.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_a_configuration_error() {
        let mut config = Config::default();
        config.backend.provider = "carrier-pigeon".to_string();

        let err = build_backend(&config).err().unwrap();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
