//! Voice embedding extraction and comparison.
//!
//! Embeddings are 256-dim vectors compared by cosine distance. The concrete
//! extractor wraps the pyannote speaker embedding model; the trait keeps the
//! identifier testable without model files.

use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub const EMBEDDING_DIM: usize = 256;

pub trait EmbeddingExtractor: Send + Sync {
    /// Compute an L2-normalized embedding for a span of 16 kHz mono audio.
    fn extract(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>>;
}

/// `cosine_distance(a, a) == 0` for any normalized embedding.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - super::features::cosine_similarity(a, b)
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Speaker embedding extraction via the pyannote ONNX model.
pub struct PyannoteEmbedder {
    inner: Mutex<pyannote_rs::EmbeddingExtractor>,
}

impl PyannoteEmbedder {
    pub fn new(model_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(anyhow!("Embedding model not found: {:?}", model_path));
        }

        // pyannote-rs reports errors through eyre; convert at the boundary.
        let inner = pyannote_rs::EmbeddingExtractor::new(model_path)
            .map_err(|e| anyhow!("Failed to create embedding extractor: {}", e))?;

        info!("Loaded speaker embedding model: {:?}", model_path);
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }
}

impl EmbeddingExtractor for PyannoteEmbedder {
    fn extract(&self, samples: &[f32], _sample_rate: u32) -> Result<Vec<f32>> {
        let samples_i16: Vec<i16> = samples
            .iter()
            .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
            .collect();

        let mut extractor = self
            .inner
            .lock()
            .map_err(|_| anyhow!("embedding extractor mutex poisoned"))?;

        let mut embedding: Vec<f32> = extractor
            .compute(&samples_i16)
            .map_err(|e| anyhow!("Failed to compute embedding: {}", e))?
            .collect();

        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_to_self_is_zero() {
        let mut v = vec![0.3_f32; EMBEDDING_DIM];
        l2_normalize(&mut v);
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn normalize_produces_unit_norm() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_of_zero_vector_is_noop() {
        let mut v = vec![0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn distance_of_opposite_vectors_is_two() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_distance(&a, &b) - 2.0).abs() < 1e-6);
    }
}
