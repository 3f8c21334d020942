pub mod model;
pub mod store;

pub use model::{
    RecordingSession, SourceMode, Speaker, TranscriptSegment, TranscriptWord,
    SYSTEM_SPEAKER_BASE,
};
pub use store::{SessionStore, SqliteSessionStore};
