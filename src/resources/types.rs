//! Resource governance type definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Job priority classes. Ordering follows dispatch preference:
/// `Critical` beats `High` beats `Normal` beats `Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum JobPriority {
    Critical,
    High,
    Normal,
    Low,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

/// Static resource ceilings for the governor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Hard ceiling on pledged memory across running jobs (GB)
    pub max_memory_gb: f32,

    /// CPU utilization ceiling, informational (percent)
    pub max_cpu_percent: f32,

    /// Maximum jobs in the Running state at once
    pub max_concurrent_jobs: usize,

    /// Sampled memory above this emits pressure signals (GB)
    pub memory_alert_threshold_gb: f32,

    /// Sampled memory above this triggers emergency cleanup (GB)
    pub memory_critical_threshold_gb: f32,

    /// Interval between resource samples (seconds)
    pub sampling_interval_secs: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_gb: 28.0,
            max_cpu_percent: 90.0,
            max_concurrent_jobs: 2,
            memory_alert_threshold_gb: 25.0,
            memory_critical_threshold_gb: 30.0,
            sampling_interval_secs: 30,
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Deferred,
}

/// Governor counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernorMetrics {
    pub total_jobs_processed: u64,
    pub jobs_failed: u64,
    pub peak_memory_gb: f32,
    pub average_processing_minutes: f32,
    pub memory_alerts: u64,
}

/// Point-in-time memory reading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStatus {
    pub total_gb: f32,
    pub used_gb: f32,
    pub available_gb: f32,
    pub percent: f32,
}

/// Point-in-time CPU reading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuStatus {
    pub percent: f32,
    pub count: usize,
}

/// Job population snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobCounts {
    pub running: usize,
    pub queued: usize,
    pub completed: usize,
    pub max_concurrent: usize,
}

/// Full system snapshot returned by `system_status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStatus {
    pub memory: MemoryStatus,
    pub cpu: CpuStatus,
    pub jobs: JobCounts,
    pub metrics: GovernorMetrics,
}

/// Resource governance errors.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error(
        "insufficient capacity: job needs {estimated_gb:.1}GB, ceiling is {limit_gb:.1}GB"
    )]
    InsufficientCapacity { estimated_gb: f32, limit_gb: f32 },

    #[error("Job queue is closed")]
    QueueClosed,
}
