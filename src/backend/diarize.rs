//! Local diarization pass and temporal-overlap speaker assignment.
//!
//! The pyannote segmentation model yields speech spans; each span's
//! embedding is clustered into a session-local speaker index. Transcript
//! segments then pick up the speaker whose spans overlap them most, with a
//! carry-forward across small gaps so brief pauses do not drop attribution.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use super::event::RawSegment;

const MAX_SPEAKERS: usize = 10;
const CLUSTER_THRESHOLD: f32 = 0.5;

/// A speaker-attributed time range from the diarization pass.
#[derive(Debug, Clone)]
pub struct SpeakerSpan {
    pub start: f64,
    pub end: f64,
    pub speaker: u32,
    pub embedding: Vec<f32>,
}

pub struct Diarizer {
    segmentation_model_path: PathBuf,
    extractor: Mutex<pyannote_rs::EmbeddingExtractor>,
    manager: Mutex<pyannote_rs::EmbeddingManager>,
}

impl Diarizer {
    pub fn new(segmentation_model: &Path, embedding_model: &Path) -> Result<Self> {
        if !segmentation_model.exists() {
            return Err(anyhow!(
                "Segmentation model not found: {:?}",
                segmentation_model
            ));
        }
        if !embedding_model.exists() {
            return Err(anyhow!("Embedding model not found: {:?}", embedding_model));
        }

        // pyannote-rs reports errors through eyre; convert at the boundary.
        let extractor = pyannote_rs::EmbeddingExtractor::new(embedding_model)
            .map_err(|e| anyhow!("Failed to create embedding extractor: {}", e))?;
        let manager = pyannote_rs::EmbeddingManager::new(MAX_SPEAKERS);

        info!("Diarizer initialized (max {} speakers)", MAX_SPEAKERS);
        Ok(Self {
            segmentation_model_path: segmentation_model.to_path_buf(),
            extractor: Mutex::new(extractor),
            manager: Mutex::new(manager),
        })
    }

    /// Produce speaker spans for a chunk of audio. Span times are relative
    /// to the chunk start; speaker indices are stable across chunks within
    /// one diarizer instance.
    pub fn diarize(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<SpeakerSpan>> {
        let samples_i16: Vec<i16> = samples
            .iter()
            .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
            .collect();

        let segments_iter =
            pyannote_rs::get_segments(&samples_i16, sample_rate, &self.segmentation_model_path)
                .map_err(|e| anyhow!("Failed to run segmentation: {}", e))?;

        let mut spans = Vec::new();
        for segment_result in segments_iter {
            let segment = match segment_result {
                Ok(s) => s,
                Err(e) => {
                    warn!("Failed to process diarization segment: {}", e);
                    continue;
                }
            };

            let embedding: Vec<f32> = {
                let mut extractor = self
                    .extractor
                    .lock()
                    .map_err(|_| anyhow!("embedding extractor mutex poisoned"))?;
                match extractor.compute(&segment.samples) {
                    Ok(iter) => iter.collect(),
                    Err(e) => {
                        warn!("Failed to compute span embedding: {}", e);
                        continue;
                    }
                }
            };

            let speaker = {
                let mut manager = self
                    .manager
                    .lock()
                    .map_err(|_| anyhow!("embedding manager mutex poisoned"))?;
                match manager.search_speaker(embedding.clone(), CLUSTER_THRESHOLD) {
                    Some(index) => index as u32,
                    None => {
                        debug!("Speaker capacity reached, span left unattributed");
                        continue;
                    }
                }
            };

            spans.push(SpeakerSpan {
                start: segment.start,
                end: segment.end,
                speaker,
                embedding,
            });
        }

        debug!("Diarization produced {} spans", spans.len());
        Ok(spans)
    }
}

/// Assign speakers to transcript segments by temporal overlap with
/// diarization spans. A segment with no overlapping span inherits the
/// previous speaker when the gap back to attributed audio is small.
pub fn assign_speakers(segments: &mut [RawSegment], spans: &[SpeakerSpan], carry_gap_secs: f64) {
    let mut last_speaker: Option<u32> = None;
    let mut last_attributed_end: f64 = f64::NEG_INFINITY;

    for segment in segments.iter_mut() {
        let mut best: Option<(u32, f64)> = None;
        for span in spans {
            let overlap = span.end.min(segment.end) - span.start.max(segment.start);
            if overlap <= 0.0 {
                continue;
            }
            if best.map_or(true, |(_, o)| overlap > o) {
                best = Some((span.speaker, overlap));
            }
        }

        match best {
            Some((speaker, _)) => {
                segment.speaker = Some(speaker);
                last_speaker = Some(speaker);
                last_attributed_end = segment.end;
            }
            None => {
                if segment.start - last_attributed_end <= carry_gap_secs {
                    segment.speaker = last_speaker;
                } else {
                    segment.speaker = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f64, end: f64) -> RawSegment {
        RawSegment {
            start,
            end,
            text: "text".to_string(),
            confidence: 1.0,
            speaker: None,
            words: Vec::new(),
        }
    }

    fn span(start: f64, end: f64, speaker: u32) -> SpeakerSpan {
        SpeakerSpan {
            start,
            end,
            speaker,
            embedding: Vec::new(),
        }
    }

    #[test]
    fn assigns_by_largest_overlap() {
        let mut segments = vec![segment(0.0, 4.0)];
        let spans = vec![span(0.0, 1.0, 0), span(1.0, 4.0, 1)];

        assign_speakers(&mut segments, &spans, 1.0);
        assert_eq!(segments[0].speaker, Some(1));
    }

    #[test]
    fn carries_forward_across_small_gap() {
        let mut segments = vec![segment(0.0, 2.0), segment(2.5, 3.5)];
        let spans = vec![span(0.0, 2.0, 3)];

        assign_speakers(&mut segments, &spans, 1.0);
        assert_eq!(segments[0].speaker, Some(3));
        // Gap of 0.5s to the attributed audio, within tolerance.
        assert_eq!(segments[1].speaker, Some(3));
    }

    #[test]
    fn does_not_carry_across_large_gap() {
        let mut segments = vec![segment(0.0, 2.0), segment(10.0, 11.0)];
        let spans = vec![span(0.0, 2.0, 3)];

        assign_speakers(&mut segments, &spans, 1.0);
        assert_eq!(segments[1].speaker, None);
    }

    #[test]
    fn no_spans_leaves_segments_unattributed() {
        let mut segments = vec![segment(0.0, 2.0)];
        assign_speakers(&mut segments, &[], 1.0);
        assert_eq!(segments[0].speaker, None);
    }
}
