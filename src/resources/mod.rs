//! Resource governance: admission control, pressure signals, job queue

pub mod governor;
pub mod queue;
pub mod types;

pub use governor::ResourceGovernor;
pub use queue::JobQueue;
pub use types::{Admission, JobPriority, ResourceError, ResourceLimits, SystemStatus};
