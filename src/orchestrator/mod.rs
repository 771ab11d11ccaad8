//! Job lifecycle, dispatch and the per-job pipeline

pub mod engine;
pub mod pipeline;
pub mod types;

pub use engine::Orchestrator;
pub use pipeline::JobPipeline;
pub use types::{
    JobOutcome, JobState, JobStatus, OrchestratorConfig, OrchestratorError, Progress, Stage,
};
