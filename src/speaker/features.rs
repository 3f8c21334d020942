//! Legacy acoustic feature extraction.
//!
//! Used when no embedding model is configured, and as the fallback match
//! path for profiles that were trained before embeddings existed. The
//! vector packs pitch, energy, spectral centroid, zero-crossing rate and a
//! set of log-spaced band energies.

/// Number of Goertzel band energies in the feature vector.
const FEATURE_BANDS: usize = 12;

/// Band centers span the useful voice range.
const BAND_LOW_HZ: f32 = 100.0;
const BAND_HIGH_HZ: f32 = 6000.0;

/// Pitch search range for autocorrelation.
const PITCH_MIN_HZ: f32 = 50.0;
const PITCH_MAX_HZ: f32 = 400.0;

#[derive(Debug, Clone)]
pub struct AcousticFeatures {
    /// Flat vector used for similarity matching.
    pub vector: Vec<f32>,
    pub pitch_hz: f32,
    pub energy: f32,
}

impl AcousticFeatures {
    /// Degenerate features cannot be matched or trained against.
    pub fn is_degenerate(&self) -> bool {
        self.pitch_hz == 0.0 || self.energy == 0.0
    }
}

pub fn extract(samples: &[f32], sample_rate: u32) -> AcousticFeatures {
    let energy = rms(samples);
    let pitch_hz = autocorrelation_pitch(samples, sample_rate);
    let zcr = zero_crossing_rate(samples);
    let bands = band_energies(samples, sample_rate);
    let centroid = spectral_centroid(&bands, sample_rate);

    let mut vector = Vec::with_capacity(4 + FEATURE_BANDS);
    vector.push(pitch_hz / PITCH_MAX_HZ);
    vector.push(energy);
    vector.push(centroid / (sample_rate as f32 / 2.0));
    vector.push(zcr);
    vector.extend_from_slice(&bands);

    AcousticFeatures {
        vector,
        pitch_hz,
        energy,
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_sq: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    mean_sq.sqrt()
}

fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}

/// Fundamental frequency via normalized autocorrelation, or 0.0 when the
/// signal has no clear periodicity (silence, noise).
fn autocorrelation_pitch(samples: &[f32], sample_rate: u32) -> f32 {
    let min_lag = (sample_rate as f32 / PITCH_MAX_HZ) as usize;
    let max_lag = (sample_rate as f32 / PITCH_MIN_HZ) as usize;
    if samples.len() < max_lag * 2 || min_lag == 0 {
        return 0.0;
    }

    let energy: f32 = samples.iter().map(|s| s * s).sum();
    if energy == 0.0 {
        return 0.0;
    }

    let mut best_lag = 0usize;
    let mut best_corr = 0.0_f32;
    for lag in min_lag..=max_lag {
        let corr: f32 = samples[..samples.len() - lag]
            .iter()
            .zip(&samples[lag..])
            .map(|(a, b)| a * b)
            .sum();
        let normalized = corr / energy;
        if normalized > best_corr {
            best_corr = normalized;
            best_lag = lag;
        }
    }

    // Weak periodicity means no usable pitch.
    if best_corr < 0.3 || best_lag == 0 {
        return 0.0;
    }

    sample_rate as f32 / best_lag as f32
}

/// Goertzel power at log-spaced band centers, normalized to sum 1.
fn band_energies(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let mut energies = Vec::with_capacity(FEATURE_BANDS);
    for i in 0..FEATURE_BANDS {
        let t = i as f32 / (FEATURE_BANDS - 1) as f32;
        let freq = BAND_LOW_HZ * (BAND_HIGH_HZ / BAND_LOW_HZ).powf(t);
        energies.push(goertzel_power(samples, sample_rate, freq));
    }

    let total: f32 = energies.iter().sum();
    if total > 0.0 {
        for e in &mut energies {
            *e /= total;
        }
    }
    energies
}

fn goertzel_power(samples: &[f32], sample_rate: u32, freq: f32) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let omega = 2.0 * std::f32::consts::PI * freq / sample_rate as f32;
    let coeff = 2.0 * omega.cos();

    let mut s_prev = 0.0_f32;
    let mut s_prev2 = 0.0_f32;
    for &sample in samples {
        let s = sample + coeff * s_prev - s_prev2;
        s_prev2 = s_prev;
        s_prev = s;
    }

    (s_prev2 * s_prev2 + s_prev * s_prev - coeff * s_prev * s_prev2) / samples.len() as f32
}

fn spectral_centroid(band_energies: &[f32], sample_rate: u32) -> f32 {
    let mut weighted = 0.0_f32;
    let mut total = 0.0_f32;
    for (i, &e) in band_energies.iter().enumerate() {
        let t = i as f32 / (band_energies.len() - 1) as f32;
        let freq = BAND_LOW_HZ * (BAND_HIGH_HZ / BAND_LOW_HZ).powf(t);
        weighted += freq * e;
        total += e;
    }
    if total == 0.0 {
        return 0.0;
    }
    (weighted / total).min(sample_rate as f32 / 2.0)
}
