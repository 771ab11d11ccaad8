//! Job lifecycle type definitions

use crate::asr::types::TranscriberConfig;
use crate::audio::types::ChunkerConfig;
use crate::config::{TimeoutMode, TimeoutPolicy};
use crate::diarization::types::DiarizerConfig;
use crate::merge::types::{MergedTranscription, MergerConfig};
use crate::resources::types::{JobPriority, ResourceError, ResourceLimits};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Pipeline stage a job is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Chunking,
    Transcribing,
    Diarizing,
    Merging,
    Completed,
    Failed,
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Admitted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

/// Coarse progress record: stage drives the percent band, the message
/// carries fine detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub stage: Stage,
    pub percent: u8,
    pub message: String,
}

/// A submitted transcription job. Mutated only by the orchestrator while
/// holding the per-job lock.
#[derive(Debug)]
pub struct Job {
    pub id: Uuid,
    pub file_path: PathBuf,
    pub output_dir: PathBuf,
    pub priority: JobPriority,
    pub estimated_memory_gb: f32,
    pub estimated_duration_minutes: f32,
    pub audio_duration_secs: f32,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: Progress,
    pub error: Option<String>,
    pub cancel: CancellationToken,
}

impl Job {
    pub fn new(
        file_path: PathBuf,
        output_dir: PathBuf,
        priority: JobPriority,
        estimated_memory_gb: f32,
        estimated_duration_minutes: f32,
        audio_duration_secs: f32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_path,
            output_dir,
            priority,
            estimated_memory_gb,
            estimated_duration_minutes,
            audio_duration_secs,
            state: JobState::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            progress: Progress {
                stage: Stage::Chunking,
                percent: 0,
                message: "Job submitted".to_string(),
            },
            error: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Progress never regresses within a job: a lower percent than the
    /// current one is clamped up.
    pub fn update_progress(&mut self, stage: Stage, percent: u8, message: String) {
        let percent = percent.max(self.progress.percent).min(100);
        self.progress = Progress {
            stage,
            percent,
            message,
        };
    }

    pub fn snapshot(&self) -> JobStatus {
        JobStatus {
            job_id: self.id,
            file_path: self.file_path.display().to_string(),
            output_dir: self.output_dir.display().to_string(),
            priority: self.priority,
            state: self.state,
            progress: self.progress.clone(),
            estimated_memory_gb: self.estimated_memory_gb,
            estimated_duration_minutes: self.estimated_duration_minutes,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            error: self.error.clone(),
        }
    }
}

/// Serializable job snapshot returned by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub file_path: String,
    pub output_dir: String,
    pub priority: JobPriority,
    pub state: JobState,
    pub progress: Progress,
    pub estimated_memory_gb: f32,
    pub estimated_duration_minutes: f32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// How a job's resource needs are estimated from its audio duration.
///
/// The piecewise form and its coefficients mirror observed model
/// footprints; they are configuration, not derived values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEstimateConfig {
    /// Audio longer than this uses the long-form coefficients (seconds)
    pub long_audio_threshold_secs: f32,

    pub long_memory_gb_per_hour: f32,
    pub long_memory_base_gb: f32,
    pub short_memory_gb_per_hour: f32,
    pub short_memory_base_gb: f32,

    /// Estimated processing time as a multiple of audio duration
    pub long_minutes_factor: f32,
    pub short_minutes_factor: f32,
}

impl Default for ResourceEstimateConfig {
    fn default() -> Self {
        Self {
            long_audio_threshold_secs: 3600.0,
            long_memory_gb_per_hour: 0.3,
            long_memory_base_gb: 10.0,
            short_memory_gb_per_hour: 0.15,
            short_memory_base_gb: 6.0,
            long_minutes_factor: 2.0,
            short_minutes_factor: 1.5,
        }
    }
}

impl ResourceEstimateConfig {
    /// (estimated memory GB, estimated processing minutes)
    pub fn estimate(&self, audio_duration_secs: f32) -> (f32, f32) {
        let hours = audio_duration_secs / 3600.0;
        let minutes = audio_duration_secs / 60.0;
        if audio_duration_secs > self.long_audio_threshold_secs {
            (
                hours * self.long_memory_gb_per_hour + self.long_memory_base_gb,
                minutes * self.long_minutes_factor,
            )
        } else {
            (
                hours * self.short_memory_gb_per_hour + self.short_memory_base_gb,
                minutes * self.short_minutes_factor,
            )
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub limits: ResourceLimits,
    pub chunker: ChunkerConfig,
    pub transcriber: TranscriberConfig,
    pub diarizer: DiarizerConfig,
    pub merger: MergerConfig,
    pub estimate: ResourceEstimateConfig,

    /// Bounded capacity of stage-to-stage channels (chunks)
    pub channel_capacity: usize,

    /// Per-chunk recognizer deadline policy
    pub chunk_timeout: TimeoutPolicy,

    /// Whole-job deadline policy
    pub job_timeout: TimeoutPolicy,

    /// Heartbeat and history-eviction interval (seconds)
    pub monitor_interval_secs: u64,

    /// Completed jobs older than this are evicted (minutes)
    pub history_retention_minutes: u64,

    /// At most this many completed jobs are retained
    pub history_cap: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            chunker: ChunkerConfig::default(),
            transcriber: TranscriberConfig::default(),
            diarizer: DiarizerConfig::default(),
            merger: MergerConfig::default(),
            estimate: ResourceEstimateConfig::default(),
            channel_capacity: 4,
            chunk_timeout: TimeoutPolicy::per_chunk(TimeoutMode::Multiplier),
            job_timeout: TimeoutPolicy::unbounded(),
            monitor_interval_secs: 60,
            history_retention_minutes: 30,
            history_cap: 50,
        }
    }
}

impl OrchestratorConfig {
    /// Default configuration with the timeout mode taken from the
    /// environment.
    pub fn from_env() -> Self {
        let mode = TimeoutMode::from_env();
        Self {
            chunk_timeout: TimeoutPolicy::per_chunk(mode),
            ..Default::default()
        }
    }
}

/// How a job's pipeline run ended (errors are reported separately).
#[derive(Debug)]
pub enum JobOutcome {
    Completed(MergedTranscription),
    Cancelled,
}

/// Orchestrator API errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Audio(#[from] crate::audio::types::AudioError),

    #[error("Unknown job: {job_id}")]
    UnknownJob { job_id: Uuid },

    #[error("Orchestrator is shutting down")]
    ShuttingDown,
}
