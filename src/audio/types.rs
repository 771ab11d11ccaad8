//! Audio-related type definitions
//!
//! Common types used throughout the chunking and decoding pipeline.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Decoded audio signal: mono PCM samples plus metadata.
#[derive(Debug, Clone)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioData {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Total duration of the signal in seconds.
    pub fn duration_seconds(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// One overlapping window of the decoded signal.
///
/// Chunks are immutable after creation. Samples are shared behind an `Arc`
/// so the transcriber and diarizer stages can consume the same chunk
/// without copying the PCM data.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Dense index within the job (0, 1, 2, ...)
    pub index: usize,

    /// Stable identifier derived from the job id and the index
    pub chunk_id: String,

    /// Start time in seconds, relative to the original audio
    pub start_time: f32,

    /// End time in seconds, relative to the original audio
    pub end_time: f32,

    pub sample_rate: u32,

    /// Mono PCM samples covering `[start_time, end_time]`
    pub samples: Arc<Vec<f32>>,

    /// Fraction of frames classified as below the silence threshold (0.0-1.0)
    pub silence_score: f32,

    /// Whether the chunk is mostly silence (score above the configured cutoff)
    pub is_silent: bool,
}

impl AudioChunk {
    pub fn duration(&self) -> f32 {
        self.end_time - self.start_time
    }
}

/// Chunk boundaries and metadata computed before the samples are extracted.
///
/// Planning is separated from extraction so the pipeline can copy sample
/// windows lazily, keeping only a bounded number of chunks in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSpec {
    pub index: usize,
    pub chunk_id: String,
    pub start_time: f32,
    pub end_time: f32,
    pub duration: f32,
    pub silence_score: f32,
    pub is_silent: bool,
}

/// Configuration for the chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Window length in seconds
    pub chunk_duration: f32,

    /// Overlap between consecutive windows in seconds
    pub overlap_duration: f32,

    /// Silent intervals shorter than this are ignored (seconds)
    pub min_silence_duration: f32,

    /// RMS level below which a frame counts as silent (dB)
    pub silence_threshold_db: f32,

    /// Analysis frame length in milliseconds
    pub frame_duration_ms: u32,

    /// How far a nominal cut point may move to reach a silence midpoint (seconds)
    pub snap_tolerance: f32,

    /// Chunks whose silence score exceeds this are flagged silent
    pub silent_chunk_threshold: f32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_duration: 30.0,
            overlap_duration: 5.0,
            min_silence_duration: 0.5,
            silence_threshold_db: -40.0,
            frame_duration_ms: 30,
            snap_tolerance: 2.0,
            silent_chunk_threshold: 0.8,
        }
    }
}

/// Summary statistics over a job's chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStatistics {
    pub total_chunks: usize,
    pub total_duration: f32,
    pub avg_chunk_duration: f32,
    pub min_chunk_duration: f32,
    pub max_chunk_duration: f32,
    pub silent_chunks: usize,
}

/// Audio decoding and chunking errors.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio file not found: {path}")]
    FileNotFound { path: String },

    #[error("Unsupported audio format: {path}")]
    UnsupportedFormat { path: String },

    #[error("Failed to decode audio: {message}")]
    DecodeFailed { message: String },

    #[error("unusable audio: {reason}")]
    UnusableAudio { reason: String },

    #[error("Failed to write audio: {message}")]
    WriteFailed { message: String },

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),
}
