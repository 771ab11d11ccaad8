//! Shared fixtures: synthetic audio builders and scripted engines
//!
//! Speakers are encoded as tone frequencies (200Hz vs 440Hz) so the
//! scripted diarizer can recover identity from the samples alone, the
//! same way a real engine would.

use batchscribe::asr::engine::Transcriber;
use batchscribe::asr::types::{RecognizerOutput, SubSegment, TranscriberError};
use batchscribe::diarization::engine::Diarizer;
use batchscribe::diarization::types::{DiarizationError, LocalTurn};
use batchscribe::orchestrator::OrchestratorConfig;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const SAMPLE_RATE: u32 = 16_000;
pub const SPEAKER_A_HZ: f32 = 200.0;
pub const SPEAKER_B_HZ: f32 = 440.0;

/// A pure tone at the given frequency.
pub fn tone(freq: f32, seconds: f32, amplitude: f32) -> Vec<f32> {
    (0..(SAMPLE_RATE as f32 * seconds) as usize)
        .map(|i| {
            (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE as f32).sin() * amplitude
        })
        .collect()
}

pub fn silence(seconds: f32) -> Vec<f32> {
    vec![0.0; (SAMPLE_RATE as f32 * seconds) as usize]
}

/// Write samples as a mono 32-bit float WAV.
pub fn write_wav(path: &Path, samples: &[f32]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
    for sample in samples {
        writer.write_sample(*sample).expect("write sample");
    }
    writer.finalize().expect("finalize wav");
}

/// Engine configuration tuned for tests: huge memory ceilings so the
/// host's real usage never interferes, and quiet background loops.
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.limits.max_memory_gb = 1000.0;
    config.limits.memory_alert_threshold_gb = 10_000.0;
    config.limits.memory_critical_threshold_gb = 20_000.0;
    config.limits.max_concurrent_jobs = 2;
    config.limits.sampling_interval_secs = 3600;
    config.monitor_interval_secs = 3600;
    config.transcriber.max_retries = 2;
    config
}

/// Scripted recognizer: emits fixed text over the chunk, either as one
/// whole-chunk sub-segment or as fixed-length windows.
pub struct ScriptedTranscriber {
    pub text: String,
    pub window_secs: Option<f32>,
    pub language: String,
    pub delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn whole_chunk(text: &str) -> Self {
        Self {
            text: text.to_string(),
            window_secs: None,
            language: "en".to_string(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn windows(text: &str, window_secs: f32) -> Self {
        Self {
            text: text.to_string(),
            window_secs: Some(window_secs),
            language: "en".to_string(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcriber for ScriptedTranscriber {
    fn transcribe(
        &self,
        samples: &[f32],
        _options: &batchscribe::asr::types::TranscribeOptions,
    ) -> Result<RecognizerOutput, TranscriberError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let duration = samples.len() as f32 / SAMPLE_RATE as f32;
        let segments = match self.window_secs {
            None => vec![SubSegment {
                start: 0.0,
                end: duration,
                text: self.text.clone(),
            }],
            Some(window) => {
                let mut segments = Vec::new();
                let mut start = 0.0f32;
                while start < duration {
                    let end = (start + window).min(duration);
                    segments.push(SubSegment {
                        start,
                        end,
                        text: self.text.clone(),
                    });
                    start = end;
                }
                segments
            }
        };

        Ok(RecognizerOutput {
            text: segments
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            language: self.language.clone(),
            confidence: -0.2,
            segments,
        })
    }
}

/// Recognizer that fails every call, as a permanently timing-out engine
/// does after the stage's retry budget.
pub struct FailingTranscriber;

impl Transcriber for FailingTranscriber {
    fn transcribe(
        &self,
        _samples: &[f32],
        _options: &batchscribe::asr::types::TranscribeOptions,
    ) -> Result<RecognizerOutput, TranscriberError> {
        Err(TranscriberError::Timeout { seconds: 30 })
    }
}

/// Scripted diarizer that recovers speaker identity from tone frequency.
///
/// Classifies 0.5s windows by zero-crossing rate (200Hz vs 440Hz), groups
/// consecutive windows of one class into a turn, and attaches a crisp
/// per-class embedding so the cross-chunk tracker sees consistent voices.
pub struct ToneDiarizer;

impl ToneDiarizer {
    fn classify(window: &[f32]) -> Option<usize> {
        let energy = window.iter().map(|s| s * s).sum::<f32>() / window.len() as f32;
        if energy < 1e-6 {
            return None;
        }
        let mut crossings = 0usize;
        for i in 1..window.len() {
            if (window[i - 1] >= 0.0) != (window[i] >= 0.0) {
                crossings += 1;
            }
        }
        let rate = crossings as f32 / window.len() as f32;
        // 200Hz tone: ~0.025 crossings/sample; 440Hz: ~0.055.
        Some(if rate < 0.04 { 0 } else { 1 })
    }

    fn embedding(class: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        v[class] = 1.0;
        v
    }
}

impl Diarizer for ToneDiarizer {
    fn diarize(&self, samples: &[f32]) -> Result<Vec<LocalTurn>, DiarizationError> {
        if samples.is_empty() {
            return Err(DiarizationError::EmptyAudio);
        }

        let window = (SAMPLE_RATE / 2) as usize; // 0.5s
        let mut turns: Vec<LocalTurn> = Vec::new();
        let mut current: Option<(usize, f32)> = None; // (class, start)

        let flush = |turns: &mut Vec<LocalTurn>, class: usize, start: f32, end: f32| {
            turns.push(LocalTurn {
                label: format!("S{}", class),
                start,
                end,
                confidence: 0.9,
                embedding: Some(Self::embedding(class)),
            });
        };

        for (i, chunk) in samples.chunks(window).enumerate() {
            let time = i as f32 * 0.5;
            let class = Self::classify(chunk);
            match (current, class) {
                (None, Some(class)) => current = Some((class, time)),
                (Some((active, start)), Some(class)) if class != active => {
                    flush(&mut turns, active, start, time);
                    current = Some((class, time));
                }
                (Some((active, start)), None) => {
                    flush(&mut turns, active, start, time);
                    current = None;
                }
                _ => {}
            }
        }

        if let Some((active, start)) = current {
            flush(
                &mut turns,
                active,
                start,
                samples.len() as f32 / SAMPLE_RATE as f32,
            );
        }

        Ok(turns)
    }
}
