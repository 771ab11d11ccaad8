//! Audio decoding, preflight and chunking

pub mod chunker;
pub mod loader;
pub mod resampler;
pub mod types;

pub use chunker::AudioChunker;
pub use loader::{AudioLoader, WavLoader};
pub use types::{AudioChunk, AudioData, AudioError, ChunkSpec, ChunkerConfig};
