//! Bounded-parallel transcription of long pre-recorded files.
//!
//! Files beyond a threshold are split into fixed-length chunks in a temp
//! dir and transcribed with at most K requests in flight. Chunk timestamps
//! are shifted by their offset, the merged list is re-sorted (completion
//! order is not index order), and per-chunk speaker indices are unioned by
//! raw value. A chunk failing after retries is excluded, not fatal.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::audio::{wav, SourceTag};
use crate::backend::{FileTranscript, TranscriptionBackend};
use crate::config::BatchConfig;
use crate::error::PipelineError;
use crate::session::model::{speaker_color, Speaker, TranscriptSegment, TranscriptWord};

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub split_threshold_secs: f64,
    pub chunk_secs: f64,
    pub max_concurrent: usize,
    pub retries: u32,
}

impl From<&BatchConfig> for BatchOptions {
    fn from(config: &BatchConfig) -> Self {
        Self {
            split_threshold_secs: config.split_threshold_secs,
            chunk_secs: config.chunk_secs,
            max_concurrent: config.max_concurrent.max(1),
            retries: config.retries,
        }
    }
}

/// Merged result of a batch run. Cross-chunk speaker identity is not
/// reconciled: indices are unioned by raw backend value, so the same
/// physical person may appear under different IDs in different chunks.
#[derive(Debug)]
pub struct BatchOutcome {
    pub segments: Vec<TranscriptSegment>,
    pub speakers: Vec<Speaker>,
    pub detected_language: Option<String>,
    pub chunk_count: usize,
    pub failed_chunks: usize,
}

pub struct ChunkedBatchTranscriber {
    backend: Arc<dyn TranscriptionBackend>,
    options: BatchOptions,
}

impl ChunkedBatchTranscriber {
    pub fn new(backend: Arc<dyn TranscriptionBackend>, options: BatchOptions) -> Self {
        Self { backend, options }
    }

    pub async fn transcribe_file(
        &self,
        path: &Path,
        language: Option<&str>,
    ) -> Result<BatchOutcome> {
        let duration = wav::duration_secs(path)?;

        if duration <= self.options.split_threshold_secs {
            info!(
                "File is {:.0}s, transcribing without chunking: {:?}",
                duration, path
            );
            let transcript = self
                .backend
                .transcribe_file(path, language)
                .await
                .with_context(|| format!("transcription failed for {:?}", path))?;
            return Ok(merge(vec![(0, transcript)], self.options.chunk_secs, 1, 0));
        }

        let tmp = tempfile::tempdir().context("Failed to create chunk directory")?;
        let chunks = wav::split_into_chunks(path, self.options.chunk_secs, tmp.path())?;
        let chunk_count = chunks.len();
        info!(
            "Split {:.0}s file into {} chunks of {:.0}s",
            duration, chunk_count, self.options.chunk_secs
        );

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent));
        let mut tasks: JoinSet<std::result::Result<(usize, FileTranscript), PipelineError>> =
            JoinSet::new();

        for chunk in chunks {
            let backend = self.backend.clone();
            let semaphore = semaphore.clone();
            let language = language.map(|s| s.to_string());
            let retries = self.options.retries;
            let chunk_path: PathBuf = chunk.path.clone();
            let index = chunk.index;

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("semaphore is never closed");

                let mut last_error = String::new();
                for attempt in 0..=retries {
                    match backend
                        .transcribe_file(&chunk_path, language.as_deref())
                        .await
                    {
                        Ok(transcript) => return Ok((index, transcript)),
                        Err(e) => {
                            warn!(
                                "Chunk {} attempt {}/{} failed: {}",
                                index,
                                attempt + 1,
                                retries + 1,
                                e
                            );
                            last_error = e.to_string();
                        }
                    }
                }
                Err(PipelineError::ChunkProcessing {
                    index,
                    message: last_error,
                })
            });
        }

        let mut completed: Vec<(usize, FileTranscript)> = Vec::new();
        let mut failed_chunks = 0usize;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(result)) => completed.push(result),
                Ok(Err(e)) => {
                    // One bad chunk never aborts the batch.
                    warn!("{}", e);
                    failed_chunks += 1;
                }
                Err(e) => {
                    warn!("Chunk task panicked: {}", e);
                    failed_chunks += 1;
                }
            }
        }

        Ok(merge(
            completed,
            self.options.chunk_secs,
            chunk_count,
            failed_chunks,
        ))
    }
}

fn merge(
    completed: Vec<(usize, FileTranscript)>,
    chunk_secs: f64,
    chunk_count: usize,
    failed_chunks: usize,
) -> BatchOutcome {
    let mut segments: Vec<TranscriptSegment> = Vec::new();
    let mut speaker_ids: BTreeSet<i64> = BTreeSet::new();
    let mut detected_language = None;

    for (index, transcript) in completed {
        let shift = index as f64 * chunk_secs;
        if detected_language.is_none() {
            detected_language = transcript.detected_language.clone();
        }

        for raw in transcript.segments {
            let speaker_id = raw.speaker.map(i64::from);
            if let Some(id) = speaker_id {
                speaker_ids.insert(id);
            }

            segments.push(TranscriptSegment {
                timestamp: raw.start + shift,
                text: raw.text,
                speaker_id,
                confidence: raw.confidence,
                is_final: true,
                words: raw
                    .words
                    .into_iter()
                    .map(|w| TranscriptWord {
                        text: w.text,
                        start: w.start + shift,
                        end: w.end + shift,
                        confidence: w.confidence,
                        speaker_id: w.speaker.map(i64::from),
                    })
                    .collect(),
                source: SourceTag::Unknown,
            });
        }
    }

    // Completion order is arbitrary; the merged list must not be.
    segments.sort_by(|a, b| {
        a.timestamp
            .partial_cmp(&b.timestamp)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let speakers = speaker_ids
        .into_iter()
        .enumerate()
        .map(|(i, id)| Speaker {
            id,
            name: None,
            embedding: None,
            color: speaker_color(i).to_string(),
        })
        .collect();

    BatchOutcome {
        segments,
        speakers,
        detected_language,
        chunk_count,
        failed_chunks,
    }
}
