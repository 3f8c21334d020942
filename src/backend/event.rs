//! Typed events exchanged with a transcription backend.

/// Outbound commands on a live stream.
#[derive(Debug, Clone)]
pub enum BackendCommand {
    /// 16 kHz mono f32 audio.
    Audio(Vec<f32>),
    /// No-op message that keeps an idle connection open.
    KeepAlive,
    /// Force processing of any buffered audio, even below the normal
    /// minimum chunk (local backend; the cloud maps this to a finalize).
    Flush,
    /// Close the connection after flushing.
    Close,
}

/// One word with timing, as reported by the backend.
#[derive(Debug, Clone)]
pub struct WordInfo {
    /// Punctuated text when the backend provides it.
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f32,
    /// Raw diarization index from the backend, not yet range-offset.
    pub speaker: Option<u32>,
}

/// Inbound events from a live stream.
#[derive(Debug, Clone)]
pub enum TranscriptEvent {
    Results {
        text: String,
        is_final: bool,
        /// The backend considers the utterance complete, not just the
        /// interim window.
        speech_final: bool,
        confidence: f32,
        words: Vec<WordInfo>,
        /// Dominant raw diarization index for the result.
        speaker: Option<u32>,
        detected_language: Option<String>,
    },
    UtteranceEnd {
        last_word_end: f64,
    },
    SpeechStarted {
        timestamp: f64,
    },
    Metadata {
        request_id: String,
    },
    Warning {
        message: String,
    },
    Error {
        message: String,
        /// Terminal errors end the stream; the supervisor decides whether
        /// to reconnect.
        terminal: bool,
    },
    /// The connection closed (cleanly or not). Always the last event.
    Closed,
}

/// One attributed span from a non-streaming (whole file) request.
#[derive(Debug, Clone)]
pub struct RawSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub confidence: f32,
    /// Raw backend diarization index.
    pub speaker: Option<u32>,
    pub words: Vec<WordInfo>,
}
