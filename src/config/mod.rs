use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub deepgram: DeepgramConfig,
    pub whisper: WhisperConfig,
    pub audio: AudioConfig,
    pub speaker: SpeakerConfig,
    pub session: SessionConfig,
    pub batch: BatchConfig,
    pub api: ApiConfig,
}

/// Which recognition backend a session uses. One choice per session,
/// never mixed between sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// "deepgram" (cloud streaming) or "whisper" (local engine).
    pub provider: String,
    /// Maximum reconnection attempts within one recording before the
    /// session fails with a terminal error.
    pub max_reconnect_attempts: u32,
    /// Fixed delay between reconnection attempts, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Interval for the idle keepalive message, in seconds.
    pub keepalive_interval_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: "deepgram".to_string(),
            max_reconnect_attempts: 3,
            reconnect_delay_ms: 2000,
            keepalive_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepgramConfig {
    pub api_key: Option<String>,
    pub api_endpoint: Option<String>,
    pub model: String,
    /// Language code, or "auto" for multilingual auto-detect.
    pub language: String,
    pub diarize: bool,
    pub interim_results: bool,
    pub utterance_end_ms: u32,
    pub endpointing_ms: u32,
    /// Keyword boost list sent with the stream open request.
    pub keywords: Vec<String>,
}

impl Default for DeepgramConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_endpoint: None,
            model: "nova-2".to_string(),
            language: "en".to_string(),
            diarize: true,
            interim_results: true,
            utterance_end_ms: 1000,
            endpointing_ms: 300,
            keywords: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    /// Model size class: tiny, base, small, medium, large.
    pub model: String,
    /// Explicit path to a GGML model file; overrides the models dir lookup.
    pub model_path: Option<String>,
    pub language: Option<String>,
    /// How often the accumulate buffer is processed, in seconds.
    pub process_interval_secs: u64,
    /// Buffer length that forces immediate processing, in seconds.
    pub max_buffer_secs: f32,
    /// Minimum buffered audio worth processing, in seconds.
    pub min_chunk_secs: f32,
    /// Pyannote segmentation model for the optional diarization pass.
    pub segmentation_model_path: Option<String>,
    /// Pyannote speaker embedding model.
    pub embedding_model_path: Option<String>,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model: "base".to_string(),
            model_path: None,
            language: Some("en".to_string()),
            process_interval_secs: 3,
            max_buffer_secs: 25.0,
            min_chunk_secs: 1.0,
            segmentation_model_path: None,
            embedding_model_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Gate silent frames before they reach the backend.
    pub vad_enabled: bool,
    /// RMS threshold below which a frame counts as silence.
    pub vad_threshold: f32,
    /// Extra capture time after a stop request, in milliseconds.
    pub capture_grace_ms: u64,
    /// How long to wait for trailing final results after capture stops,
    /// in milliseconds.
    pub final_grace_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            vad_enabled: true,
            vad_threshold: 0.01,
            capture_grace_ms: 500,
            final_grace_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakerConfig {
    /// Cosine distance below which an embedding match is accepted.
    pub embedding_distance_threshold: f32,
    /// Cosine similarity above which a legacy feature match is accepted.
    pub feature_similarity_threshold: f32,
    /// Minimum buffered audio before attempting identification, seconds.
    pub min_buffer_secs: f32,
    /// Window of recent audio used for a match attempt, seconds.
    pub match_window_secs: f32,
    /// Rolling buffer capacity per source, seconds.
    pub buffer_secs: f32,
    /// Cooldown between embedding-based attempts, seconds.
    pub cooldown_secs: u64,
    /// Peak amplitude below which the buffer counts as near-silence.
    pub min_peak_amplitude: f32,
    /// Per-segment cap on training audio, seconds.
    pub max_training_secs: f32,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            embedding_distance_threshold: 0.45,
            feature_similarity_threshold: 0.95,
            min_buffer_secs: 1.0,
            match_window_secs: 3.0,
            buffer_secs: 5.0,
            cooldown_secs: 6,
            min_peak_amplitude: 0.01,
            max_training_secs: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Auto-save interval while recording, in seconds.
    pub autosave_interval_secs: u64,
    /// Override for the recordings directory.
    pub recordings_dir: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autosave_interval_secs: 30,
            recordings_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Files longer than this are split into chunks, in seconds.
    pub split_threshold_secs: f64,
    /// Fixed chunk length, in seconds.
    pub chunk_secs: f64,
    /// Maximum concurrent chunk transcriptions.
    pub max_concurrent: usize,
    /// Retries per chunk before it is marked failed.
    pub retries: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            split_threshold_secs: 7200.0,
            chunk_secs: 1800.0,
            max_concurrent: 4,
            retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 3746 }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.backend.provider, "deepgram");
        assert_eq!(parsed.backend.max_reconnect_attempts, 3);
        assert_eq!(parsed.batch.max_concurrent, 4);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: Config = toml::from_str("[backend]\nprovider = \"whisper\"\n").unwrap();
        assert_eq!(parsed.backend.provider, "whisper");
        assert_eq!(parsed.whisper.model, "base");
        assert!(parsed.audio.vad_enabled);
    }
}
