//! Local whisper backend.
//!
//! Wraps a `whisper_rs::WhisperContext` behind the streaming contract: audio
//! accumulates in a buffer that is processed on a timer, when it grows past
//! a cap, or when a flush forces it. Processing is single-flight; a second
//! pass never starts while one is running. Whisper reports segment-level
//! timing, surfaced through the word list so downstream timestamps stay
//! accurate.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::diarize::{assign_speakers, Diarizer};
use super::event::{BackendCommand, RawSegment, TranscriptEvent, WordInfo};
use super::{BackendKind, BackendStream, FileTranscript, StreamParams, TranscriptionBackend};
use crate::audio::SAMPLE_RATE;
use crate::config::WhisperConfig;
use crate::error::PipelineError;

/// Whisper degrades badly below roughly a second of audio; shorter forced
/// flushes are zero-padded up to this.
const MIN_ENGINE_SAMPLES: usize = SAMPLE_RATE as usize;

/// Gap tolerance for diarization carry-forward, seconds.
const CARRY_FORWARD_GAP_SECS: f64 = 1.0;

/// Model size classes mapped to GGML files under the models dir.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    pub fn parse(s: &str) -> Result<Self, PipelineError> {
        match s {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            other => Err(PipelineError::Configuration(format!(
                "Unknown whisper model size '{}'. Supported: tiny, base, small, medium, large",
                other
            ))),
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "ggml-tiny.bin",
            ModelSize::Base => "ggml-base.bin",
            ModelSize::Small => "ggml-small.bin",
            ModelSize::Medium => "ggml-medium.bin",
            ModelSize::Large => "ggml-large-v3.bin",
        }
    }
}

/// Loaded whisper model. A fresh `WhisperState` is created per call, so the
/// engine can be shared across tasks without locking.
pub struct WhisperEngine {
    ctx: WhisperContext,
    language: Option<String>,
}

// WhisperContext holds a raw pointer internally; the model weights are
// read-only after loading, and per-call state is created fresh.
unsafe impl Send for WhisperEngine {}
unsafe impl Sync for WhisperEngine {}

impl WhisperEngine {
    pub fn load(model_path: &Path, language: Option<String>) -> Result<Self, PipelineError> {
        if !model_path.exists() {
            return Err(PipelineError::Configuration(format!(
                "Whisper model not found: {}",
                model_path.display()
            )));
        }

        let path_str = model_path.to_str().ok_or_else(|| {
            PipelineError::Configuration(format!(
                "model path is not valid UTF-8: {}",
                model_path.display()
            ))
        })?;

        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;

        info!("Loaded whisper model: {}", model_path.display());
        Ok(Self { ctx, language })
    }

    /// Transcribe a chunk, returning segments with chunk-relative timing.
    pub fn transcribe(&self, audio: &[f32]) -> Result<Vec<RawSegment>, PipelineError> {
        let padded;
        let audio = if audio.len() < MIN_ENGINE_SAMPLES {
            padded = {
                let mut p = audio.to_vec();
                p.resize(MIN_ENGINE_SAMPLES, 0.0);
                p
            };
            &padded[..]
        } else {
            audio
        };

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        let lang: Option<&str> = match self.language.as_deref() {
            Some("auto") | None => None,
            Some(l) => Some(l),
        };
        params.set_language(lang);
        params.set_print_progress(false);
        params.set_print_realtime(false);

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| PipelineError::BackendProtocol(e.to_string()))?;

        state
            .full(params, audio)
            .map_err(|e| PipelineError::BackendProtocol(e.to_string()))?;

        let n_segments = state
            .full_n_segments()
            .map_err(|e| PipelineError::BackendProtocol(e.to_string()))?;

        let mut segments = Vec::with_capacity(n_segments as usize);
        for i in 0..n_segments {
            let text = state
                .full_get_segment_text(i)
                .map_err(|e| PipelineError::BackendProtocol(format!("segment {}: {}", i, e)))?;
            let text = text.trim().to_string();
            if text.is_empty() {
                continue;
            }

            // Timestamps come back in centiseconds.
            let start = state.full_get_segment_t0(i).unwrap_or(0).max(0) as f64 / 100.0;
            let end = state.full_get_segment_t1(i).unwrap_or(0).max(0) as f64 / 100.0;

            segments.push(RawSegment {
                start,
                end,
                text,
                confidence: 1.0,
                speaker: None,
                words: Vec::new(),
            });
        }

        Ok(segments)
    }
}

pub struct WhisperBackend {
    model_size: ModelSize,
    model_path_override: Option<PathBuf>,
    language: Option<String>,
    process_interval: Duration,
    min_chunk_samples: usize,
    max_buffer_samples: usize,
    engine: tokio::sync::Mutex<Option<Arc<WhisperEngine>>>,
    diarizer: Option<Arc<Diarizer>>,
}

impl WhisperBackend {
    pub fn new(config: &WhisperConfig) -> Result<Self, PipelineError> {
        let model_size = ModelSize::parse(&config.model)?;

        let diarizer = match (&config.segmentation_model_path, &config.embedding_model_path) {
            (Some(seg), Some(emb)) => {
                match Diarizer::new(Path::new(seg), Path::new(emb)) {
                    Ok(d) => Some(Arc::new(d)),
                    Err(e) => {
                        warn!("Diarization disabled: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(Self {
            model_size,
            model_path_override: config.model_path.as_ref().map(PathBuf::from),
            language: config.language.clone(),
            process_interval: Duration::from_secs(config.process_interval_secs.max(1)),
            min_chunk_samples: (config.min_chunk_secs * SAMPLE_RATE as f32) as usize,
            max_buffer_samples: (config.max_buffer_secs * SAMPLE_RATE as f32) as usize,
            engine: tokio::sync::Mutex::new(None),
            diarizer,
        })
    }

    fn resolve_model_path(&self) -> Result<PathBuf, PipelineError> {
        if let Some(path) = &self.model_path_override {
            return Ok(path.clone());
        }
        let dir = crate::global::models_dir()
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;
        Ok(dir.join(self.model_size.file_name()))
    }

    /// Load the model if it is not already resident.
    pub async fn ensure_loaded(&self) -> Result<Arc<WhisperEngine>, PipelineError> {
        let mut guard = self.engine.lock().await;
        if let Some(engine) = guard.as_ref() {
            return Ok(engine.clone());
        }

        let path = self.resolve_model_path()?;
        let language = self.language.clone();
        let engine = tokio::task::spawn_blocking(move || WhisperEngine::load(&path, language))
            .await
            .map_err(|e| PipelineError::BackendProtocol(e.to_string()))??;

        let engine = Arc::new(engine);
        *guard = Some(engine.clone());
        Ok(engine)
    }

    /// Drop the resident model.
    pub async fn unload(&self) {
        let mut guard = self.engine.lock().await;
        if guard.take().is_some() {
            info!("Whisper model unloaded");
        }
    }
}

#[async_trait]
impl TranscriptionBackend for WhisperBackend {
    fn name(&self) -> &'static str {
        "Whisper"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn validate(&self) -> Result<(), PipelineError> {
        let path = self.resolve_model_path()?;
        if !path.exists() {
            return Err(PipelineError::Configuration(format!(
                "Whisper model not found: {}",
                path.display()
            )));
        }
        Ok(())
    }

    async fn open_stream(&self, _params: &StreamParams) -> Result<BackendStream, PipelineError> {
        let engine = self.ensure_loaded().await?;
        let diarizer = self.diarizer.clone();

        let (cmd_tx, cmd_rx) = mpsc::channel::<BackendCommand>(64);
        let (event_tx, event_rx) = mpsc::channel::<TranscriptEvent>(64);

        tokio::spawn(process_loop(
            engine,
            diarizer,
            cmd_rx,
            event_tx,
            self.process_interval,
            self.min_chunk_samples,
            self.max_buffer_samples,
        ));

        Ok(BackendStream {
            commands: cmd_tx,
            events: event_rx,
        })
    }

    async fn transcribe_file(
        &self,
        path: &Path,
        _language: Option<&str>,
    ) -> Result<FileTranscript, PipelineError> {
        let engine = self.ensure_loaded().await?;
        let diarizer = self.diarizer.clone();

        let (samples, rate) = crate::audio::wav::read_samples(path)
            .map_err(|e| PipelineError::BackendProtocol(e.to_string()))?;
        let samples = if rate == SAMPLE_RATE {
            samples
        } else if rate > SAMPLE_RATE && rate % SAMPLE_RATE == 0 {
            let step = (rate / SAMPLE_RATE) as usize;
            samples.into_iter().step_by(step).collect()
        } else {
            return Err(PipelineError::BackendProtocol(format!(
                "unsupported sample rate {} in {:?}",
                rate, path
            )));
        };

        let segments = tokio::task::spawn_blocking(move || {
            let mut segments = engine.transcribe(&samples)?;
            if let Some(diarizer) = &diarizer {
                match diarizer.diarize(&samples, SAMPLE_RATE) {
                    Ok(spans) => assign_speakers(&mut segments, &spans, CARRY_FORWARD_GAP_SECS),
                    Err(e) => warn!("Diarization pass failed: {}", e),
                }
            }
            Ok::<_, PipelineError>(segments)
        })
        .await
        .map_err(|e| PipelineError::BackendProtocol(e.to_string()))??;

        Ok(FileTranscript {
            segments,
            detected_language: None,
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_loop(
    engine: Arc<WhisperEngine>,
    diarizer: Option<Arc<Diarizer>>,
    mut cmd_rx: mpsc::Receiver<BackendCommand>,
    event_tx: mpsc::Sender<TranscriptEvent>,
    process_interval: Duration,
    min_chunk_samples: usize,
    max_buffer_samples: usize,
) {
    let mut buffer: Vec<f32> = Vec::new();
    let mut consumed_samples: u64 = 0;
    let in_flight = Arc::new(AtomicBool::new(false));
    let mut pending: Option<JoinHandle<()>> = None;

    let mut ticker = tokio::time::interval(process_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(BackendCommand::Audio(samples)) => {
                    buffer.extend_from_slice(&samples);
                    if buffer.len() >= max_buffer_samples {
                        dispatch(
                            &mut buffer, &mut consumed_samples, min_chunk_samples, false,
                            &in_flight, &engine, &diarizer, &event_tx, &mut pending,
                        );
                    }
                }
                Some(BackendCommand::KeepAlive) => {}
                Some(BackendCommand::Flush) => {
                    // Forced: wait out any running pass so the remainder is
                    // processed even below the minimum chunk.
                    if let Some(task) = pending.take() {
                        let _ = task.await;
                    }
                    dispatch(
                        &mut buffer, &mut consumed_samples, min_chunk_samples, true,
                        &in_flight, &engine, &diarizer, &event_tx, &mut pending,
                    );
                }
                Some(BackendCommand::Close) | None => {
                    if let Some(task) = pending.take() {
                        let _ = task.await;
                    }
                    dispatch(
                        &mut buffer, &mut consumed_samples, min_chunk_samples, true,
                        &in_flight, &engine, &diarizer, &event_tx, &mut pending,
                    );
                    break;
                }
            },
            _ = ticker.tick() => {
                if buffer.len() >= min_chunk_samples {
                    dispatch(
                        &mut buffer, &mut consumed_samples, min_chunk_samples, false,
                        &in_flight, &engine, &diarizer, &event_tx, &mut pending,
                    );
                }
            }
        }
    }

    if let Some(task) = pending.take() {
        let _ = task.await;
    }
    let _ = event_tx.send(TranscriptEvent::Closed).await;
    debug!("Whisper process loop exited");
}

#[allow(clippy::too_many_arguments)]
fn dispatch(
    buffer: &mut Vec<f32>,
    consumed_samples: &mut u64,
    min_chunk_samples: usize,
    force: bool,
    in_flight: &Arc<AtomicBool>,
    engine: &Arc<WhisperEngine>,
    diarizer: &Option<Arc<Diarizer>>,
    event_tx: &mpsc::Sender<TranscriptEvent>,
    pending: &mut Option<JoinHandle<()>>,
) {
    if buffer.is_empty() {
        return;
    }
    if !force && buffer.len() < min_chunk_samples {
        return;
    }
    // Single-flight: leave the buffer accumulating while a pass runs.
    if in_flight
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    let chunk = std::mem::take(buffer);
    let offset_secs = *consumed_samples as f64 / SAMPLE_RATE as f64;
    *consumed_samples += chunk.len() as u64;

    let engine = engine.clone();
    let diarizer = diarizer.clone();
    let event_tx = event_tx.clone();
    let in_flight = in_flight.clone();

    *pending = Some(tokio::spawn(async move {
        let result = tokio::task::spawn_blocking(move || {
            let mut segments = engine.transcribe(&chunk)?;
            if let Some(diarizer) = &diarizer {
                match diarizer.diarize(&chunk, SAMPLE_RATE) {
                    Ok(spans) => assign_speakers(&mut segments, &spans, CARRY_FORWARD_GAP_SECS),
                    Err(e) => warn!("Diarization pass failed: {}", e),
                }
            }
            Ok::<_, PipelineError>(segments)
        })
        .await;

        match result {
            Ok(Ok(segments)) => {
                for segment in segments {
                    let event = TranscriptEvent::Results {
                        text: segment.text.clone(),
                        is_final: true,
                        speech_final: true,
                        confidence: segment.confidence,
                        words: vec![WordInfo {
                            text: segment.text,
                            start: offset_secs + segment.start,
                            end: offset_secs + segment.end,
                            confidence: segment.confidence,
                            speaker: segment.speaker,
                        }],
                        speaker: segment.speaker,
                        detected_language: None,
                    };
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Err(e)) => {
                warn!("Whisper processing failed: {}", e);
                let _ = event_tx
                    .send(TranscriptEvent::Warning {
                        message: e.to_string(),
                    })
                    .await;
            }
            Err(e) => warn!("Whisper task join error: {}", e),
        }

        in_flight.store(false, Ordering::SeqCst);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_size_parse_and_file_names() {
        assert_eq!(ModelSize::parse("tiny").unwrap(), ModelSize::Tiny);
        assert_eq!(ModelSize::parse("base").unwrap(), ModelSize::Base);
        assert_eq!(ModelSize::Large.file_name(), "ggml-large-v3.bin");
        assert!(ModelSize::parse("enormous").is_err());
    }

    #[test]
    fn backend_with_unknown_size_is_configuration_error() {
        let config = WhisperConfig {
            model: "enormous".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            WhisperBackend::new(&config),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn validate_fails_without_model_file() {
        let config = WhisperConfig {
            model_path: Some("/nonexistent/ggml-base.bin".to_string()),
            ..Default::default()
        };
        let backend = WhisperBackend::new(&config).unwrap();
        assert!(matches!(
            backend.validate(),
            Err(PipelineError::Configuration(_))
        ));
    }
}
