//! Session data model: sessions, segments, words, speakers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::SourceTag;

/// Speaker IDs from the system source start here so two independently
/// diarized sources can never collide before identification resolves them.
pub const SYSTEM_SPEAKER_BASE: i64 = 1000;

/// Colors cycled through as speakers appear.
const SPEAKER_COLORS: &[&str] = &[
    "#e57373", "#64b5f6", "#81c784", "#ffd54f", "#ba68c8", "#4dd0e1", "#ff8a65", "#a1887f",
];

/// Display color for the nth speaker to appear.
pub fn speaker_color(index: usize) -> &'static str {
    SPEAKER_COLORS[index % SPEAKER_COLORS.len()]
}

/// Which inputs a session records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    Microphone,
    SystemAudio,
    Both,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::Microphone => "microphone",
            SourceMode::SystemAudio => "system_audio",
            SourceMode::Both => "both",
        }
    }

    pub fn tags(&self) -> Vec<SourceTag> {
        match self {
            SourceMode::Microphone => vec![SourceTag::Microphone],
            SourceMode::SystemAudio => vec![SourceTag::System],
            SourceMode::Both => vec![SourceTag::Microphone, SourceTag::System],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<i64>,
}

/// A finalized, attributed span of transcript text. Immutable once
/// appended to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Seconds from session start.
    pub timestamp: f64,
    pub text: String,
    pub speaker_id: Option<i64>,
    pub confidence: f32,
    pub is_final: bool,
    pub words: Vec<TranscriptWord>,
    pub source: SourceTag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Speaker {
    pub id: i64,
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub mode: SourceMode,
    pub segments: Vec<TranscriptSegment>,
    pub speakers: Vec<Speaker>,
    pub summary: Option<String>,
    pub mic_audio_path: Option<String>,
    pub system_audio_path: Option<String>,
}

impl RecordingSession {
    pub fn new(mode: SourceMode) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            ended_at: None,
            mode,
            segments: Vec::new(),
            speakers: Vec::new(),
            summary: None,
            mic_audio_path: None,
            system_audio_path: None,
        }
    }

    /// Insert a segment keeping the session-global list sorted by
    /// timestamp. Segments usually arrive in order, so scan from the back.
    pub fn push_segment(&mut self, segment: TranscriptSegment) {
        let pos = self
            .segments
            .iter()
            .rposition(|s| s.timestamp <= segment.timestamp)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.segments.insert(pos, segment);
    }

    /// Look up a speaker, creating the record lazily on first sight.
    pub fn ensure_speaker(&mut self, id: i64) -> &mut Speaker {
        if let Some(pos) = self.speakers.iter().position(|s| s.id == id) {
            return &mut self.speakers[pos];
        }
        let color = SPEAKER_COLORS[self.speakers.len() % SPEAKER_COLORS.len()].to_string();
        self.speakers.push(Speaker {
            id,
            name: None,
            embedding: None,
            color,
        });
        self.speakers.last_mut().expect("just pushed")
    }

    pub fn duration_secs(&self) -> f64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn finalize(&mut self, mic_audio_path: Option<String>, system_audio_path: Option<String>) {
        self.ended_at = Some(Utc::now());
        self.mic_audio_path = mic_audio_path;
        self.system_audio_path = system_audio_path;
    }

    /// Short text preview for listings.
    pub fn preview(&self) -> String {
        let mut text = String::new();
        for segment in &self.segments {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&segment.text);
            if text.len() > 80 {
                text.truncate(77);
                text.push_str("...");
                break;
            }
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(timestamp: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            timestamp,
            text: text.to_string(),
            speaker_id: None,
            confidence: 1.0,
            is_final: true,
            words: Vec::new(),
            source: SourceTag::Microphone,
        }
    }

    #[test]
    fn push_segment_keeps_timestamp_order() {
        let mut session = RecordingSession::new(SourceMode::Both);
        session.push_segment(segment(2.0, "b"));
        session.push_segment(segment(1.0, "a"));
        session.push_segment(segment(3.0, "c"));

        let texts: Vec<&str> = session.segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn push_segment_is_stable_for_equal_timestamps() {
        let mut session = RecordingSession::new(SourceMode::Microphone);
        session.push_segment(segment(1.0, "first"));
        session.push_segment(segment(1.0, "second"));

        assert_eq!(session.segments[0].text, "first");
        assert_eq!(session.segments[1].text, "second");
    }

    #[test]
    fn ensure_speaker_creates_lazily_with_cycling_colors() {
        let mut session = RecordingSession::new(SourceMode::Both);
        session.ensure_speaker(0);
        session.ensure_speaker(1000);
        session.ensure_speaker(0);

        assert_eq!(session.speakers.len(), 2);
        assert_ne!(session.speakers[0].color, session.speakers[1].color);
    }

    #[test]
    fn source_mode_tags() {
        assert_eq!(SourceMode::Both.tags().len(), 2);
        assert_eq!(
            SourceMode::Microphone.tags(),
            vec![SourceTag::Microphone]
        );
    }

    #[test]
    fn session_serde_round_trip() {
        let mut session = RecordingSession::new(SourceMode::SystemAudio);
        session.push_segment(segment(0.5, "hello"));
        session.ensure_speaker(1000).name = Some("Alice".to_string());

        let json = serde_json::to_string(&session).unwrap();
        let parsed: RecordingSession = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, session.id);
        assert_eq!(parsed.segments.len(), 1);
        assert_eq!(parsed.speakers[0].name.as_deref(), Some("Alice"));
    }

    #[test]
    fn preview_truncates_long_transcripts() {
        let mut session = RecordingSession::new(SourceMode::Microphone);
        for i in 0..20 {
            session.push_segment(segment(i as f64, "some words here"));
        }
        let preview = session.preview();
        assert!(preview.len() <= 80);
        assert!(preview.ends_with("..."));
    }
}
