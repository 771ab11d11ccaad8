//! Engine-wide timeout configuration
//!
//! Two timeout regimes coexist: deadlines scaled from the audio duration,
//! or no deadline at all (long recordings are allowed to take as long as
//! they need). The mode is read from the environment once at startup.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

pub const TIMEOUT_MODE_ENV: &str = "TRANSCRIPTION_TIMEOUT_MODE";
pub const CUSTOM_MULTIPLIER_ENV: &str = "CUSTOM_TIMEOUT_MULTIPLIER";

/// How deadlines are derived from audio duration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TimeoutMode {
    /// No deadline; attempts run until they finish
    None,

    /// Scale wall-clock budget with audio duration at the configured rate
    Multiplier,

    /// Like `Multiplier`, additionally scaled by a caller-chosen factor
    Custom(f64),
}

impl TimeoutMode {
    /// Read the mode from the environment; unknown values fall back to
    /// `Multiplier` with a warning.
    pub fn from_env() -> Self {
        match std::env::var(TIMEOUT_MODE_ENV).as_deref() {
            Ok("none") => TimeoutMode::None,
            Ok("multiplier") | Err(_) => TimeoutMode::Multiplier,
            Ok("custom") => {
                let factor = std::env::var(CUSTOM_MULTIPLIER_ENV)
                    .ok()
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or_else(|| {
                        warn!("{} not set or invalid, using 1.0", CUSTOM_MULTIPLIER_ENV);
                        1.0
                    });
                TimeoutMode::Custom(factor)
            }
            Ok(other) => {
                warn!("Unknown {}={:?}, using multiplier", TIMEOUT_MODE_ENV, other);
                TimeoutMode::Multiplier
            }
        }
    }
}

/// A deadline policy: mode plus the scaling rate and clamp bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    pub mode: TimeoutMode,

    /// Seconds of wall-clock budget per minute of audio
    pub per_audio_minute_secs: f32,

    /// Lower clamp in seconds
    pub floor_secs: f32,

    /// Upper clamp in seconds
    pub ceiling_secs: f32,
}

impl TimeoutPolicy {
    /// Per-chunk recognizer policy: 30s of wall clock per minute of audio,
    /// clamped to [30s, 5min].
    pub fn per_chunk(mode: TimeoutMode) -> Self {
        Self {
            mode,
            per_audio_minute_secs: 30.0,
            floor_secs: 30.0,
            ceiling_secs: 300.0,
        }
    }

    /// Whole-job policy defaults to no deadline.
    pub fn unbounded() -> Self {
        Self {
            mode: TimeoutMode::None,
            per_audio_minute_secs: 0.0,
            floor_secs: 0.0,
            ceiling_secs: f32::MAX,
        }
    }

    /// Deadline for a piece of audio, or `None` when deadlines are disabled.
    pub fn timeout_for(&self, audio_seconds: f32) -> Option<Duration> {
        let factor = match self.mode {
            TimeoutMode::None => return None,
            TimeoutMode::Multiplier => 1.0,
            TimeoutMode::Custom(f) => f,
        };
        let budget =
            (audio_seconds / 60.0) * self.per_audio_minute_secs * factor as f32;
        let clamped = budget.clamp(self.floor_secs, self.ceiling_secs);
        Some(Duration::from_secs_f32(clamped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplier_scales_and_clamps() {
        let policy = TimeoutPolicy::per_chunk(TimeoutMode::Multiplier);

        // 30s chunk: raw budget 15s, clamped up to the floor.
        assert_eq!(policy.timeout_for(30.0), Some(Duration::from_secs(30)));

        // 2min chunk: 60s budget, within bounds.
        assert_eq!(policy.timeout_for(120.0), Some(Duration::from_secs(60)));

        // Very long chunk clamps to the ceiling.
        assert_eq!(policy.timeout_for(7200.0), Some(Duration::from_secs(300)));
    }

    #[test]
    fn none_disables_deadlines() {
        let policy = TimeoutPolicy::per_chunk(TimeoutMode::None);
        assert_eq!(policy.timeout_for(120.0), None);
    }

    #[test]
    fn custom_factor_scales_budget() {
        let policy = TimeoutPolicy::per_chunk(TimeoutMode::Custom(2.0));
        assert_eq!(policy.timeout_for(120.0), Some(Duration::from_secs(120)));
    }
}
