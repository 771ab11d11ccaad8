//! batchscribe - resource-aware batch transcription engine
//!
//! Orchestrates long-running speech-to-text plus speaker-diarization jobs
//! on a multi-core server with bounded memory: a governor admits jobs
//! against static ceilings, audio is split into silence-aligned chunks,
//! chunks stream through the recognizer and diarizer stages over bounded
//! channels, and a merger fuses both outputs into one speaker-attributed
//! timeline.

pub mod asr;
pub mod audio;
pub mod config;
pub mod diarization;
pub mod merge;
pub mod orchestrator;
pub mod resources;

pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use resources::JobPriority;
