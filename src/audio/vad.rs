//! Energy-based voice activity gate.
//!
//! Classifies a frame as speech or silence by RMS amplitude. Used to stop
//! silent frames from reaching paid or compute-bound backends; the WAV
//! mirror still records everything.

/// Stateless-per-call RMS classifier.
pub struct VoiceActivityGate {
    rms_threshold: f32,
}

impl VoiceActivityGate {
    /// `rms_threshold` should be in `[0.0, 1.0]`. A typical value is
    /// `0.01` for quiet rooms; use `0.02`–`0.05` in noisy environments.
    pub fn new(rms_threshold: f32) -> Self {
        Self { rms_threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.rms_threshold
    }

    /// Returns `true` when the frame contains voice activity.
    pub fn is_speech(&self, frame: &[f32]) -> bool {
        rms(frame) > self.rms_threshold
    }
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_sq: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    mean_sq.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_not_speech() {
        let gate = VoiceActivityGate::new(0.01);
        assert!(!gate.is_speech(&vec![0.0_f32; 480]));
    }

    #[test]
    fn loud_frame_is_speech() {
        let gate = VoiceActivityGate::new(0.01);
        assert!(gate.is_speech(&vec![0.5_f32; 480]));
    }

    #[test]
    fn empty_frame_is_not_speech() {
        let gate = VoiceActivityGate::new(0.01);
        assert!(!gate.is_speech(&[]));
    }

    #[test]
    fn rms_of_constant_signal() {
        let signal = vec![0.5_f32; 1000];
        assert!((rms(&signal) - 0.5).abs() < 1e-6);
    }
}
