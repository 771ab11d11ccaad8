//! Speech recognition stage: recognizer contract, result cache, retries

pub mod cache;
pub mod engine;
pub mod stage;
pub mod types;

pub use cache::TranscriptionCache;
pub use engine::{HttpTranscriber, Transcriber};
pub use stage::TranscriberStage;
pub use types::{RecognizerOutput, SubSegment, TranscribedChunk, TranscriberConfig};
