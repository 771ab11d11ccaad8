//! Transcription-related type definitions
//!
//! Common types used throughout the recognizer stage.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Options passed to the external recognizer for a single call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeOptions {
    /// Language hint (ISO-639-1), or `None` for auto-detection
    pub language: Option<String>,

    /// Decoding temperature; 0.0 is deterministic
    pub temperature: f32,

    /// Request word/segment level timestamps
    pub word_timestamps: bool,
}

/// A recognizer-native sub-segment with times local to the chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubSegment {
    pub start: f32,
    pub end: f32,
    pub text: String,
}

/// What the external recognizer returns for one chunk of audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerOutput {
    pub text: String,
    pub language: String,

    /// Mean log-probability of the decoded tokens (<= 0.0)
    pub confidence: f32,

    pub segments: Vec<SubSegment>,
}

/// Per-chunk transcription result, in global time.
///
/// A populated `error` means every attempt for this chunk failed; the
/// chunk still flows downstream so the merger can work with whatever
/// chunks succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribedChunk {
    pub chunk_id: String,
    pub chunk_index: usize,

    /// Chunk start in seconds, relative to the original audio
    pub start_time: f32,

    /// Chunk end in seconds, relative to the original audio
    pub end_time: f32,

    pub text: String,
    pub language: String,
    pub confidence: f32,

    /// Sub-segments with times local to the chunk start
    pub segments: Vec<SubSegment>,

    pub processing_time: f32,
    pub error: Option<String>,
}

impl TranscribedChunk {
    /// Empty result used for silent chunks and exhausted retries.
    pub fn empty(chunk_id: &str, chunk_index: usize, start: f32, end: f32) -> Self {
        Self {
            chunk_id: chunk_id.to_string(),
            chunk_index,
            start_time: start,
            end_time: end,
            text: String::new(),
            language: "unknown".to_string(),
            confidence: 0.0,
            segments: Vec::new(),
            processing_time: 0.0,
            error: None,
        }
    }
}

/// Configuration for the transcriber stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    /// Identifier of the recognizer model; part of the cache key
    pub model_name: String,

    /// Language hint forwarded to the recognizer
    pub language: Option<String>,

    /// Temperature for the first attempt
    pub temperature: f32,

    /// Temperatures used when an attempt produced invalid text
    pub retry_temperatures: Vec<f32>,

    /// Total attempts per chunk
    pub max_retries: u32,

    /// Concurrent recognizer calls per job
    pub workers: usize,

    pub word_timestamps: bool,

    /// Result-cache capacity (entries)
    pub cache_capacity: usize,

    /// Outputs with fewer visible characters than this are invalid
    pub invalid_min_chars: usize,

    /// A word (longer than 3 chars) repeated more than this many times
    /// marks the output invalid
    pub invalid_repetition_limit: usize,

    /// Repetition is only checked on outputs of at least this many words
    pub invalid_min_words: usize,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            model_name: "large-v3".to_string(),
            language: None,
            temperature: 0.0,
            retry_temperatures: vec![0.1, 0.2],
            max_retries: 3,
            workers: 2,
            word_timestamps: true,
            cache_capacity: 100,
            invalid_min_chars: 3,
            invalid_repetition_limit: 8,
            invalid_min_words: 5,
        }
    }
}

/// Recognizer stage errors.
#[derive(Debug, Error)]
pub enum TranscriberError {
    #[error("Recognizer timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Recognizer transport error: {message}")]
    Transport { message: String },

    #[error("Invalid recognizer output: {reason}")]
    InvalidOutput { reason: String },

    #[error("Missing credentials: {variable} is not set")]
    MissingCredentials { variable: String },

    #[error("Empty audio provided")]
    EmptyAudio,

    #[error("Transcription cancelled")]
    Cancelled,
}
