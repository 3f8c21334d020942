//! Interim/final reconciliation and speaker normalization.
//!
//! Each source gets one mutable interim buffer and one final accumulator.
//! Interim results replace the buffer and never become segments; only final
//! results do, after the annotation filter clears them. Speaker indices from
//! the backend are shifted into per-source ranges so the two diarized
//! sources can never collide.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::filter::AnnotationFilter;
use crate::audio::SourceTag;
use crate::backend::{TranscriptEvent, WordInfo};
use crate::session::model::{TranscriptSegment, TranscriptWord, SYSTEM_SPEAKER_BASE};

/// Smallest timestamp step for the elapsed-time fallback, keeping the
/// per-source sequence strictly increasing.
const TIMESTAMP_EPSILON: f64 = 0.001;

fn speaker_base(source: SourceTag) -> i64 {
    match source {
        SourceTag::System => SYSTEM_SPEAKER_BASE,
        SourceTag::Microphone | SourceTag::Unknown => 0,
    }
}

#[derive(Debug, Default)]
struct SourceState {
    interim: String,
    accumulator: String,
    last_timestamp: f64,
}

impl SourceState {
    fn live_text(&self) -> String {
        let mut text = self.accumulator.clone();
        if !self.interim.is_empty() {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&self.interim);
        }
        text.trim().to_string()
    }
}

/// What one backend event did to the transcript.
#[derive(Debug, Default)]
pub struct AssemblerUpdate {
    /// Recomputed live transcript for the source, when it changed.
    pub live_text: Option<String>,
    pub is_final: bool,
    /// A new segment, when a final result survived filtering.
    pub segment: Option<TranscriptSegment>,
}

pub struct SegmentAssembler {
    filter: Arc<dyn AnnotationFilter>,
    states: HashMap<SourceTag, SourceState>,
}

impl SegmentAssembler {
    pub fn new(filter: Arc<dyn AnnotationFilter>) -> Self {
        Self {
            filter,
            states: HashMap::new(),
        }
    }

    /// Current live transcript for a source.
    pub fn live_transcript(&self, source: SourceTag) -> String {
        self.states
            .get(&source)
            .map(|s| s.live_text())
            .unwrap_or_default()
    }

    /// Final accumulator only, without the interim tail.
    pub fn final_transcript(&self, source: SourceTag) -> String {
        self.states
            .get(&source)
            .map(|s| s.accumulator.trim().to_string())
            .unwrap_or_default()
    }

    /// Process one backend event for a source. `elapsed_secs` is the
    /// recording-elapsed time used as the timestamp fallback.
    pub fn handle(
        &mut self,
        source: SourceTag,
        event: &TranscriptEvent,
        elapsed_secs: f64,
    ) -> AssemblerUpdate {
        match event {
            TranscriptEvent::Results {
                text,
                is_final,
                confidence,
                words,
                speaker,
                ..
            } => {
                if *is_final {
                    self.handle_final(source, text, *confidence, words, *speaker, elapsed_secs)
                } else {
                    self.handle_interim(source, text)
                }
            }
            // Lifecycle chatter carries no transcript text.
            TranscriptEvent::UtteranceEnd { .. }
            | TranscriptEvent::SpeechStarted { .. }
            | TranscriptEvent::Metadata { .. }
            | TranscriptEvent::Warning { .. }
            | TranscriptEvent::Error { .. }
            | TranscriptEvent::Closed => AssemblerUpdate::default(),
        }
    }

    fn handle_interim(&mut self, source: SourceTag, text: &str) -> AssemblerUpdate {
        let state = self.states.entry(source).or_default();
        state.interim = text.trim().to_string();
        AssemblerUpdate {
            live_text: Some(state.live_text()),
            is_final: false,
            segment: None,
        }
    }

    fn handle_final(
        &mut self,
        source: SourceTag,
        text: &str,
        confidence: f32,
        words: &[WordInfo],
        speaker: Option<u32>,
        elapsed_secs: f64,
    ) -> AssemblerUpdate {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return AssemblerUpdate::default();
        }

        let state = self.states.entry(source).or_default();
        if !state.accumulator.is_empty() {
            state.accumulator.push(' ');
        }
        state.accumulator.push_str(trimmed);
        state.interim.clear();
        let live_text = Some(state.live_text());

        if self.filter.is_annotation(trimmed) {
            debug!("Dropping non-speech annotation: {:?}", trimmed);
            return AssemblerUpdate {
                live_text,
                is_final: true,
                segment: None,
            };
        }

        let base = speaker_base(source);
        let speaker_id = Some(base + speaker.unwrap_or(0) as i64);

        // First word's start time when we have word timings, else the
        // recording-elapsed fallback, kept strictly increasing.
        let state = self.states.entry(source).or_default();
        let timestamp = match words.first() {
            Some(first) => first.start,
            None => {
                if elapsed_secs > state.last_timestamp {
                    elapsed_secs
                } else {
                    state.last_timestamp + TIMESTAMP_EPSILON
                }
            }
        };
        state.last_timestamp = timestamp;

        let segment = TranscriptSegment {
            timestamp,
            text: trimmed.to_string(),
            speaker_id,
            confidence,
            is_final: true,
            words: words
                .iter()
                .map(|w| TranscriptWord {
                    text: w.text.clone(),
                    start: w.start,
                    end: w.end,
                    confidence: w.confidence,
                    speaker_id: w.speaker.map(|s| base + s as i64),
                })
                .collect(),
            source,
        };

        AssemblerUpdate {
            live_text,
            is_final: true,
            segment: Some(segment),
        }
    }
}
