//! Cross-session voice profiles.
//!
//! One profile per known person. New training audio folds in by weighted
//! averaging: the existing vector weighs `sample_count`, the new sample
//! weighs 1. Embeddings are renormalized after every fold so the unit-norm
//! invariant holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::embedding::l2_normalize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub session_id: String,
    pub segments: u32,
    pub duration_secs: f64,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub id: Option<i64>,
    pub name: String,
    /// 256-dim voice embedding, always unit-norm when present.
    pub embedding: Option<Vec<f32>>,
    /// Legacy acoustic feature vector for profiles without embeddings.
    pub features: Option<Vec<f32>>,
    pub sample_count: u32,
    pub trained_secs: f64,
    pub history: Vec<TrainingRecord>,
}

impl VoiceProfile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            embedding: None,
            features: None,
            sample_count: 0,
            trained_secs: 0.0,
            history: Vec::new(),
        }
    }

    /// Fold a new embedding into the profile via weighted averaging.
    pub fn fold_embedding(&mut self, new: &[f32]) {
        match &mut self.embedding {
            Some(existing) => {
                let weight = self.sample_count as f32;
                for (old, &n) in existing.iter_mut().zip(new.iter()) {
                    *old = (*old * weight + n) / (weight + 1.0);
                }
                l2_normalize(existing);
            }
            None => {
                let mut first = new.to_vec();
                l2_normalize(&mut first);
                self.embedding = Some(first);
            }
        }
        self.sample_count += 1;
    }

    /// Fold a new legacy feature vector into the profile.
    pub fn fold_features(&mut self, new: &[f32]) {
        match &mut self.features {
            Some(existing) => {
                let weight = self.sample_count as f32;
                for (old, &n) in existing.iter_mut().zip(new.iter()) {
                    *old = (*old * weight + n) / (weight + 1.0);
                }
            }
            None => {
                self.features = Some(new.to_vec());
            }
        }
        self.sample_count += 1;
    }

    pub fn record_training(&mut self, session_id: &str, segments: u32, duration_secs: f64) {
        self.trained_secs += duration_secs;
        self.history.push(TrainingRecord {
            session_id: session_id.to_string(),
            segments,
            duration_secs,
            trained_at: Utc::now(),
        });
    }
}
