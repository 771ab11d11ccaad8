//! Speaker diarization stage and cross-chunk identity tracking

pub mod engine;
pub mod stage;
pub mod tracker;
pub mod types;

pub use engine::{cosine_similarity, Diarizer, FeatureDiarizer};
pub use stage::DiarizerStage;
pub use tracker::SpeakerTracker;
pub use types::{DiarizedChunk, DiarizerConfig, LocalTurn, SpeakerTurn};
