pub mod embedding;
pub mod features;
pub mod identifier;
pub mod profile;

pub use embedding::{cosine_distance, EmbeddingExtractor, PyannoteEmbedder, EMBEDDING_DIM};
pub use features::{cosine_similarity, AcousticFeatures};
pub use identifier::{speaker_clips, Identification, IdentifierConfig, SpeakerIdentifier};
pub use profile::{TrainingRecord, VoiceProfile};
