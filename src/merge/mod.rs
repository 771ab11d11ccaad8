//! Timeline fusion and artifact export

pub mod export;
pub mod merger;
pub mod text;
pub mod types;

pub use merger::TranscriptionMerger;
pub use types::{MergedSegment, MergedTranscription, MergerConfig, UNKNOWN_SPEAKER};
