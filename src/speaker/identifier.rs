//! Real-time speaker identification.
//!
//! Keeps a rolling buffer of recent audio per source. When a new speaker ID
//! shows up in a segment, a window of that buffer is matched against known
//! voice profiles: embeddings by cosine distance first, legacy acoustic
//! features as the fallback. Matching is rate-limited by a cooldown so the
//! embedding model cannot be hammered.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::embedding::{cosine_distance, EmbeddingExtractor};
use super::features;
use super::profile::VoiceProfile;
use crate::audio::{RecentAudioBuffer, SourceTag, SAMPLE_RATE};
use crate::config::SpeakerConfig;
use crate::session::model::TranscriptSegment;

#[derive(Debug, Clone)]
pub struct IdentifierConfig {
    pub embedding_distance_threshold: f32,
    pub feature_similarity_threshold: f32,
    pub min_buffer_secs: f32,
    pub match_window_secs: f32,
    pub buffer_secs: f32,
    pub cooldown: Duration,
    pub min_peak_amplitude: f32,
    pub max_training_secs: f32,
}

impl From<&SpeakerConfig> for IdentifierConfig {
    fn from(config: &SpeakerConfig) -> Self {
        Self {
            embedding_distance_threshold: config.embedding_distance_threshold,
            feature_similarity_threshold: config.feature_similarity_threshold,
            min_buffer_secs: config.min_buffer_secs,
            match_window_secs: config.match_window_secs,
            buffer_secs: config.buffer_secs,
            cooldown: Duration::from_secs(config.cooldown_secs),
            min_peak_amplitude: config.min_peak_amplitude,
            max_training_secs: config.max_training_secs,
        }
    }
}

/// A successful match against a known voice profile.
#[derive(Debug, Clone)]
pub struct Identification {
    pub name: String,
    /// Cosine distance (embedding path) or similarity (feature path).
    pub score: f32,
    pub via_embedding: bool,
    /// The live embedding that produced the match, for the session's
    /// speaker record.
    pub embedding: Option<Vec<f32>>,
}

pub struct SpeakerIdentifier {
    config: IdentifierConfig,
    embedder: Option<Arc<dyn EmbeddingExtractor>>,
    profiles: Mutex<Vec<VoiceProfile>>,
    buffers: HashMap<SourceTag, RecentAudioBuffer>,
    identified: Mutex<HashSet<i64>>,
    pending: Mutex<HashSet<i64>>,
    last_embedding_attempt: Mutex<Option<Instant>>,
}

impl SpeakerIdentifier {
    pub fn new(
        config: IdentifierConfig,
        profiles: Vec<VoiceProfile>,
        embedder: Option<Arc<dyn EmbeddingExtractor>>,
    ) -> Self {
        let capacity = (config.buffer_secs * SAMPLE_RATE as f32) as usize;
        let buffers = [SourceTag::Microphone, SourceTag::System, SourceTag::Unknown]
            .into_iter()
            .map(|tag| (tag, RecentAudioBuffer::new(capacity)))
            .collect();

        Self {
            config,
            embedder,
            profiles: Mutex::new(profiles),
            buffers,
            identified: Mutex::new(HashSet::new()),
            pending: Mutex::new(HashSet::new()),
            last_embedding_attempt: Mutex::new(None),
        }
    }

    /// Feed captured audio into the rolling buffer for one source.
    pub fn observe_audio(&self, tag: SourceTag, samples: &[f32]) {
        if let Some(buffer) = self.buffers.get(&tag) {
            buffer.append(samples);
        }
    }

    /// Attempt to resolve a session speaker ID to a known person.
    ///
    /// Returns `None` when the ID is already identified or pending, the
    /// buffer is too short or too quiet, the cooldown is active, or no
    /// profile passes its threshold.
    pub fn identify(&self, tag: SourceTag, speaker_id: i64) -> Option<Identification> {
        {
            let identified = self.identified.lock().unwrap();
            let mut pending = self.pending.lock().unwrap();
            if identified.contains(&speaker_id) || pending.contains(&speaker_id) {
                return None;
            }
            pending.insert(speaker_id);
        }

        let result = self.identify_inner(tag, speaker_id);

        let mut pending = self.pending.lock().unwrap();
        pending.remove(&speaker_id);
        if result.is_some() {
            self.identified.lock().unwrap().insert(speaker_id);
        }
        result
    }

    fn identify_inner(&self, tag: SourceTag, speaker_id: i64) -> Option<Identification> {
        let buffer = self.buffers.get(&tag)?;

        let min_samples = (self.config.min_buffer_secs * SAMPLE_RATE as f32) as usize;
        if buffer.len() < min_samples {
            debug!(
                "Speaker {}: only {} samples buffered, skipping identification",
                speaker_id,
                buffer.len()
            );
            return None;
        }

        if buffer.peak() < self.config.min_peak_amplitude {
            debug!("Speaker {}: buffer is near-silence, skipping", speaker_id);
            return None;
        }

        let window_samples = (self.config.match_window_secs * SAMPLE_RATE as f32) as usize;
        let window = buffer.tail(window_samples);

        if let Some(embedder) = &self.embedder {
            {
                let mut last = self.last_embedding_attempt.lock().unwrap();
                if let Some(at) = *last {
                    if at.elapsed() < self.config.cooldown {
                        debug!("Speaker {}: embedding cooldown active", speaker_id);
                        return None;
                    }
                }
                *last = Some(Instant::now());
            }

            match embedder.extract(&window, SAMPLE_RATE) {
                Ok(embedding) => {
                    if let Some(mut matched) = self.match_embedding(&embedding) {
                        info!(
                            "Speaker {} identified as '{}' (distance {:.3})",
                            speaker_id, matched.name, matched.score
                        );
                        matched.embedding = Some(embedding);
                        return Some(matched);
                    }
                }
                Err(e) => warn!("Embedding extraction failed: {}", e),
            }
        }

        self.match_features(&window, speaker_id)
    }

    fn match_embedding(&self, embedding: &[f32]) -> Option<Identification> {
        let profiles = self.profiles.lock().unwrap();
        let mut best: Option<(String, f32)> = None;

        for profile in profiles.iter() {
            let Some(profile_embedding) = &profile.embedding else {
                continue;
            };
            let distance = cosine_distance(embedding, profile_embedding);
            if distance < self.config.embedding_distance_threshold
                && best.as_ref().map_or(true, |(_, d)| distance < *d)
            {
                best = Some((profile.name.clone(), distance));
            }
        }

        best.map(|(name, score)| Identification {
            name,
            score,
            via_embedding: true,
            embedding: None,
        })
    }

    fn match_features(&self, window: &[f32], speaker_id: i64) -> Option<Identification> {
        let extracted = features::extract(window, SAMPLE_RATE);
        if extracted.is_degenerate() {
            debug!(
                "Speaker {}: degenerate features, skipping fallback match",
                speaker_id
            );
            return None;
        }

        let profiles = self.profiles.lock().unwrap();
        let mut best: Option<(String, f32)> = None;

        for profile in profiles.iter() {
            // Feature matching only covers profiles without embeddings.
            if profile.embedding.is_some() {
                continue;
            }
            let Some(profile_features) = &profile.features else {
                continue;
            };
            let similarity = features::cosine_similarity(&extracted.vector, profile_features);
            if similarity > self.config.feature_similarity_threshold
                && best.as_ref().map_or(true, |(_, s)| similarity > *s)
            {
                best = Some((profile.name.clone(), similarity));
            }
        }

        if let Some((ref name, score)) = best {
            info!(
                "Speaker {} identified as '{}' via features (similarity {:.3})",
                speaker_id, name, score
            );
        }

        best.map(|(name, score)| Identification {
            name,
            score,
            via_embedding: false,
            embedding: None,
        })
    }

    /// Fold training clips into a person's profile. Returns how many clips
    /// were actually used; degenerate clips are skipped and logged.
    pub fn train_profile(
        &self,
        profile: &mut VoiceProfile,
        clips: &[Vec<f32>],
        session_id: &str,
    ) -> u32 {
        let max_samples = (self.config.max_training_secs * SAMPLE_RATE as f32) as usize;
        let mut folded = 0u32;
        let mut duration = 0.0f64;

        for clip in clips {
            let bounded = &clip[..clip.len().min(max_samples)];

            let extracted = features::extract(bounded, SAMPLE_RATE);
            if extracted.is_degenerate() {
                warn!(
                    "Skipping degenerate training clip for '{}' ({} samples)",
                    profile.name,
                    bounded.len()
                );
                continue;
            }

            if let Some(embedder) = &self.embedder {
                match embedder.extract(bounded, SAMPLE_RATE) {
                    Ok(embedding) => profile.fold_embedding(&embedding),
                    Err(e) => {
                        warn!("Training embedding failed for '{}': {}", profile.name, e);
                        continue;
                    }
                }
            } else {
                profile.fold_features(&extracted.vector);
            }

            folded += 1;
            duration += bounded.len() as f64 / SAMPLE_RATE as f64;
        }

        if folded > 0 {
            profile.record_training(session_id, folded, duration);
            info!(
                "Trained '{}' on {} clips ({:.1}s)",
                profile.name, folded, duration
            );
        }
        folded
    }

    /// Reset per-session state between recordings.
    pub fn reset_session(&self) {
        self.identified.lock().unwrap().clear();
        self.pending.lock().unwrap().clear();
        for buffer in self.buffers.values() {
            buffer.clear();
        }
        *self.last_embedding_attempt.lock().unwrap() = None;
    }

    pub fn profiles(&self) -> Vec<VoiceProfile> {
        self.profiles.lock().unwrap().clone()
    }
}

/// Cut per-segment audio clips for one session speaker out of a full
/// recording, for profile training.
pub fn speaker_clips(
    segments: &[TranscriptSegment],
    speaker_id: i64,
    samples: &[f32],
    sample_rate: u32,
    max_secs: f32,
) -> Vec<Vec<f32>> {
    let mut clips = Vec::new();

    for segment in segments {
        if segment.speaker_id != Some(speaker_id) {
            continue;
        }

        let start = (segment.timestamp * sample_rate as f64) as usize;
        let end_secs = segment
            .words
            .last()
            .map(|w| w.end)
            .unwrap_or(segment.timestamp + max_secs as f64);
        let end = (end_secs * sample_rate as f64) as usize;

        let start = start.min(samples.len());
        let end = end.min(samples.len()).min(start + (max_secs * sample_rate as f32) as usize);
        if end > start {
            clips.push(samples[start..end].to_vec());
        }
    }

    clips
}
