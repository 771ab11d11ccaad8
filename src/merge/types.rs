//! Merger type definitions
//!
//! The final, speaker-attributed timeline and its configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for fusing transcription and diarization output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergerConfig {
    /// Overlaps longer than this split at the midpoint; shorter ones are
    /// shifted away (seconds)
    pub overlap_threshold: f32,

    /// Segments below this confidence are dropped (0.0-1.0)
    pub confidence_threshold: f32,

    /// Segments shorter than this are dropped (seconds)
    pub min_segment_duration: f32,

    /// Same-speaker segments this close are merged (seconds)
    pub max_gap_between_segments: f32,

    /// Fraction of a sub-segment a speaker turn must cover to claim it
    pub min_overlap_ratio: f32,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: 0.5,
            confidence_threshold: 0.5,
            min_segment_duration: 0.5,
            max_gap_between_segments: 2.0,
            min_overlap_ratio: 0.3,
        }
    }
}

/// Sentinel speaker for text no diarizer turn claimed.
pub const UNKNOWN_SPEAKER: &str = "unknown";

/// One entry of the final timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedSegment {
    pub speaker_id: String,

    /// Start in seconds, relative to the original audio
    pub start_time: f32,

    /// End in seconds, relative to the original audio
    pub end_time: f32,

    pub text: String,
    pub confidence: f32,

    /// Chunk this segment originated from
    pub chunk_id: String,

    /// Position within the final timeline
    pub segment_index: usize,

    /// Set when this segment shared time with another speaker
    pub is_overlap: bool,

    /// Speakers this segment overlapped with, if any
    pub overlap_speakers: Vec<String>,
}

impl MergedSegment {
    pub fn duration(&self) -> f32 {
        self.end_time - self.start_time
    }
}

/// Counters collected while merging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_segments_merged: usize,
    pub overlap_segments: usize,
    pub dropped_segments: usize,
    pub processing_time: f32,
}

/// The complete fused transcript for one source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedTranscription {
    pub file_path: String,

    /// End of the last segment, in seconds
    pub total_duration: f32,

    /// Dominant language across chunks, `"unknown"` when undetected
    pub language: String,

    /// Global speaker ids present in the timeline, sorted
    pub speakers: Vec<String>,

    pub segments: Vec<MergedSegment>,
    pub processing_stats: ProcessingStats,
}

/// Per-speaker aggregate statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeakerStatistics {
    pub total_segments: usize,
    pub total_duration: f32,
    pub total_words: usize,
    pub avg_confidence: f32,
}

/// Export errors.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to write artifact: {message}")]
    WriteFailed { message: String },

    #[error("Failed to serialize transcription: {message}")]
    SerializeFailed { message: String },
}
