//! Diarization type definitions
//!
//! Types for the speaker-identification stage and the cross-chunk
//! identity tracker.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for the diarizer stage and speaker tracker.
///
/// The similarity threshold controls how eagerly local speakers are
/// matched to existing global identities; raising it splits voices more
/// readily, lowering it merges them. The default 0.7 is tuned for
/// embedding cosine similarity where >0.7 means "very likely the same
/// speaker".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiarizerConfig {
    /// Maximum speakers retained per chunk
    pub max_speakers: usize,

    /// Turns shorter than this are dropped (seconds)
    pub min_speaker_duration: f32,

    /// Turns below this confidence are dropped (0.0-1.0)
    pub confidence_threshold: f32,

    /// Cosine similarity required to reuse a global speaker id (0.0-1.0)
    pub similarity_threshold: f32,

    /// Exponential-moving-average factor for prototype updates (0.0-1.0)
    pub prototype_smoothing: f32,

    /// Concurrent diarizer calls per job
    pub workers: usize,
}

impl Default for DiarizerConfig {
    fn default() -> Self {
        Self {
            max_speakers: 8,
            min_speaker_duration: 1.0,
            confidence_threshold: 0.5,
            similarity_threshold: 0.7,
            prototype_smoothing: 0.3,
            workers: 2,
        }
    }
}

/// A speaker turn as emitted by the external diarizer, local to a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalTurn {
    /// Per-chunk label chosen by the diarizer (not stable across chunks)
    pub label: String,

    /// Start in seconds, relative to the chunk start
    pub start: f32,

    /// End in seconds, relative to the chunk start
    pub end: f32,

    /// Confidence score (0.0-1.0)
    pub confidence: f32,

    /// Voice embedding for the turn, if the diarizer provides one
    pub embedding: Option<Vec<f32>>,
}

impl LocalTurn {
    pub fn duration(&self) -> f32 {
        self.end - self.start
    }
}

/// A speaker turn after cross-chunk mapping, in global time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerTurn {
    /// Stable identifier for one person across the whole job
    pub speaker_id: String,

    /// Start in seconds, relative to the original audio
    pub start: f32,

    /// End in seconds, relative to the original audio
    pub end: f32,

    pub confidence: f32,
}

/// Per-chunk diarization result with globally mapped speaker ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiarizedChunk {
    pub chunk_id: String,
    pub chunk_index: usize,
    pub start_time: f32,
    pub end_time: f32,

    /// Global speaker ids observed in this chunk
    pub speakers: Vec<String>,

    pub turns: Vec<SpeakerTurn>,
    pub processing_time: f32,
    pub error: Option<String>,
}

impl DiarizedChunk {
    pub fn empty(chunk_id: &str, chunk_index: usize, start: f32, end: f32) -> Self {
        Self {
            chunk_id: chunk_id.to_string(),
            chunk_index,
            start_time: start,
            end_time: end,
            speakers: Vec::new(),
            turns: Vec::new(),
            processing_time: 0.0,
            error: None,
        }
    }
}

/// Diarization errors.
#[derive(Debug, Error)]
pub enum DiarizationError {
    #[error("Diarizer transport error: {message}")]
    Transport { message: String },

    #[error("Diarization failed: {message}")]
    ProcessingError { message: String },

    #[error("Empty audio provided")]
    EmptyAudio,

    #[error("Invalid configuration: {message}")]
    ConfigError { message: String },
}
