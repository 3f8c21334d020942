//! Audio source abstraction for capturing audio from different inputs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::error::PipelineError;

/// Every source delivers PCM at this rate, mono, f32.
pub const SAMPLE_RATE: u32 = 16_000;

/// Which physical input a frame or segment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Microphone,
    System,
    Unknown,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Microphone => "microphone",
            SourceTag::System => "system",
            SourceTag::Unknown => "unknown",
        }
    }
}

/// A block of captured audio, already converted to 16 kHz mono f32.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub source: SourceTag,
    /// Milliseconds of audio delivered before this frame.
    pub elapsed_ms: u64,
}

/// Trait for audio capture sources (microphone, system audio monitor).
///
/// Each source captures independently on its own real-time thread and
/// streams frames through a bounded channel. The capture callback also
/// mirrors raw audio to a WAV file synchronously so the recorded file
/// preserves strict frame order.
pub trait AudioSource: Send + Sync {
    fn tag(&self) -> SourceTag;

    /// Start capturing. Returns the frame stream; the channel closes when
    /// the source is stopped.
    fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, PipelineError>;

    /// Stop capturing and release the device. Idempotent.
    fn stop(&mut self);

    fn is_active(&self) -> bool;

    /// Path of the WAV mirror file, if one was configured.
    fn audio_path(&self) -> Option<PathBuf>;
}
