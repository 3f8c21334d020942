pub mod mic_source;
pub mod recent_buffer;
pub mod source;
pub mod system_source;
pub mod vad;
pub mod wav;

pub use mic_source::MicAudioSource;
pub use recent_buffer::RecentAudioBuffer;
pub use source::{AudioFrame, AudioSource, SourceTag, SAMPLE_RATE};
pub use system_source::SystemAudioSource;
pub use vad::VoiceActivityGate;
