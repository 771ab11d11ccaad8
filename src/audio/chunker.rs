//! Silence-aware audio chunker
//!
//! Splits a decoded file into overlapping fixed-length windows, snapping
//! cut points to natural silences when one lies close enough. Every chunk
//! keeps its global start/end so downstream timestamps stitch back onto
//! the original timeline.

use crate::audio::types::{
    AudioChunk, AudioData, AudioError, ChunkSpec, ChunkStatistics, ChunkerConfig,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Serialized alongside the chunk WAV files.
#[derive(Debug, Serialize)]
struct ChunksMetadata<'a> {
    file_path: String,
    total_chunks: usize,
    config: &'a ChunkerConfig,
    chunks: &'a [ChunkSpec],
}

/// Splits decoded audio into overlapping windows aligned to silences.
///
/// Planning (`plan`) is cheap and produces only boundaries and scores;
/// sample extraction (`extract`) copies one window at a time so the
/// pipeline can bound how many chunks are alive at once.
pub struct AudioChunker {
    config: ChunkerConfig,
}

impl AudioChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        info!(
            "Initializing AudioChunker (window {:.1}s, overlap {:.1}s)",
            config.chunk_duration, config.overlap_duration
        );
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Reject audio the pipeline cannot produce a meaningful transcript for.
    pub fn validate(&self, audio: &AudioData) -> Result<(), AudioError> {
        if audio.samples.is_empty() {
            return Err(AudioError::UnusableAudio {
                reason: "audio is empty".to_string(),
            });
        }
        if audio.samples.iter().any(|s| !s.is_finite()) {
            return Err(AudioError::UnusableAudio {
                reason: "audio contains NaN or infinite samples".to_string(),
            });
        }
        if audio.samples.iter().all(|s| *s == 0.0) {
            return Err(AudioError::UnusableAudio {
                reason: "audio contains only zeros".to_string(),
            });
        }
        let duration = audio.duration_seconds();
        if duration < 1.0 {
            return Err(AudioError::UnusableAudio {
                reason: format!("duration too short: {:.2}s", duration),
            });
        }
        Ok(())
    }

    /// Plan chunk boundaries without extracting samples.
    pub fn plan(&self, audio: &AudioData, id_prefix: &str) -> Result<Vec<ChunkSpec>, AudioError> {
        self.validate(audio)?;

        let frame_flags = self.classify_frames(&audio.samples, audio.sample_rate);
        let silences = self.silence_intervals(&frame_flags);
        let cuts = self.cut_points(audio.duration_seconds(), &silences);

        let total = audio.duration_seconds();
        let frame_duration = self.config.frame_duration_ms as f32 / 1000.0;
        let mut specs = Vec::with_capacity(cuts.len().saturating_sub(1));

        for i in 0..cuts.len() - 1 {
            let start = cuts[i];
            let end = (cuts[i + 1] + self.config.overlap_duration).min(total);

            let silence_score = self.window_silence_score(&frame_flags, frame_duration, start, end);
            let is_silent = silence_score > self.config.silent_chunk_threshold;

            specs.push(ChunkSpec {
                index: i,
                chunk_id: format!("{}_chunk_{:04}", id_prefix, i),
                start_time: start,
                end_time: end,
                duration: end - start,
                silence_score,
                is_silent,
            });
        }

        info!(
            "Planned {} chunks over {:.2}s ({} silences found)",
            specs.len(),
            total,
            silences.len()
        );
        Ok(specs)
    }

    /// Copy the sample window described by a spec.
    pub fn extract(&self, audio: &AudioData, spec: &ChunkSpec) -> AudioChunk {
        let start_idx = (spec.start_time * audio.sample_rate as f32) as usize;
        let end_idx = ((spec.end_time * audio.sample_rate as f32) as usize).min(audio.samples.len());
        let samples = audio.samples[start_idx.min(end_idx)..end_idx].to_vec();

        AudioChunk {
            index: spec.index,
            chunk_id: spec.chunk_id.clone(),
            start_time: spec.start_time,
            end_time: spec.end_time,
            sample_rate: audio.sample_rate,
            samples: Arc::new(samples),
            silence_score: spec.silence_score,
            is_silent: spec.is_silent,
        }
    }

    /// Plan and extract in one pass. Convenient for tests and small files.
    pub fn create_chunks(
        &self,
        audio: &AudioData,
        id_prefix: &str,
    ) -> Result<Vec<AudioChunk>, AudioError> {
        let specs = self.plan(audio, id_prefix)?;
        Ok(specs.iter().map(|spec| self.extract(audio, spec)).collect())
    }

    /// Classify every analysis frame as silent or voiced by RMS level.
    fn classify_frames(&self, samples: &[f32], sample_rate: u32) -> Vec<bool> {
        let frame_size =
            ((sample_rate as u64 * self.config.frame_duration_ms as u64) / 1000) as usize;
        if frame_size == 0 {
            return Vec::new();
        }

        samples
            .chunks(frame_size)
            .map(|frame| {
                let rms = (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt();
                let rms_db = if rms > 0.0 { 20.0 * rms.log10() } else { -100.0 };
                rms_db < self.config.silence_threshold_db
            })
            .collect()
    }

    /// Coalesce silent frames into intervals, dropping short ones.
    fn silence_intervals(&self, frame_flags: &[bool]) -> Vec<(f32, f32)> {
        let frame_duration = self.config.frame_duration_ms as f32 / 1000.0;
        let mut intervals = Vec::new();
        let mut run_start: Option<usize> = None;

        for (i, silent) in frame_flags.iter().enumerate() {
            match (*silent, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(start)) => {
                    let begin = start as f32 * frame_duration;
                    let end = i as f32 * frame_duration;
                    if end - begin >= self.config.min_silence_duration {
                        intervals.push((begin, end));
                    }
                    run_start = None;
                }
                _ => {}
            }
        }

        if let Some(start) = run_start {
            let begin = start as f32 * frame_duration;
            let end = frame_flags.len() as f32 * frame_duration;
            if end - begin >= self.config.min_silence_duration {
                intervals.push((begin, end));
            }
        }

        debug!("Detected {} silence intervals", intervals.len());
        intervals
    }

    /// Nominal cut points every `window - overlap` seconds, each interior
    /// point snapped to a nearby silence midpoint when one exists.
    fn cut_points(&self, total_duration: f32, silences: &[(f32, f32)]) -> Vec<f32> {
        let step = (self.config.chunk_duration - self.config.overlap_duration).max(1.0);

        let mut nominal = Vec::new();
        let mut current = 0.0f32;
        while current < total_duration {
            nominal.push(current);
            current += step;
        }

        let mut cuts: Vec<f32> = Vec::with_capacity(nominal.len() + 1);
        for (i, base) in nominal.iter().enumerate() {
            let mut point = *base;
            if i > 0 {
                for (silence_start, silence_end) in silences {
                    let center = (silence_start + silence_end) / 2.0;
                    if (center - base).abs() < self.config.snap_tolerance {
                        point = center;
                        break;
                    }
                }
            }
            // Snapping must never fold a window onto the previous cut.
            if let Some(prev) = cuts.last() {
                if point <= *prev {
                    point = *base;
                }
                if point <= *prev {
                    continue;
                }
            }
            cuts.push(point);
        }

        // An interior cut this close to the end would clamp the overlap
        // extension and leave a sliver chunk; fold it into the terminal
        // window instead.
        while cuts.len() > 1 {
            let last = cuts[cuts.len() - 1];
            if total_duration - last < self.config.overlap_duration {
                cuts.pop();
            } else {
                break;
            }
        }

        if cuts.is_empty() {
            cuts.push(0.0);
        }
        let last = cuts.last().copied().unwrap_or(0.0);
        if last < total_duration {
            cuts.push(total_duration);
        }

        cuts
    }

    /// Fraction of silent frames within `[start, end]`.
    fn window_silence_score(
        &self,
        frame_flags: &[bool],
        frame_duration: f32,
        start: f32,
        end: f32,
    ) -> f32 {
        if frame_flags.is_empty() || frame_duration <= 0.0 {
            return 0.0;
        }
        let first = (start / frame_duration) as usize;
        let last = ((end / frame_duration) as usize).min(frame_flags.len());
        if first >= last {
            return 0.0;
        }
        let window = &frame_flags[first..last];
        window.iter().filter(|silent| **silent).count() as f32 / window.len() as f32
    }

    /// Write a chunk's samples as a 32-bit float WAV file.
    pub fn save_chunk_wav(chunk: &AudioChunk, path: &Path) -> Result<(), AudioError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AudioError::WriteFailed {
                message: e.to_string(),
            })?;
        }

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: chunk.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer =
            hound::WavWriter::create(path, spec).map_err(|e| AudioError::WriteFailed {
                message: e.to_string(),
            })?;
        for sample in chunk.samples.iter() {
            writer.write_sample(*sample).map_err(|e| AudioError::WriteFailed {
                message: e.to_string(),
            })?;
        }
        writer.finalize().map_err(|e| AudioError::WriteFailed {
            message: e.to_string(),
        })
    }

    /// Persist chunk boundaries and scores next to the chunk WAVs.
    pub fn write_metadata(
        &self,
        specs: &[ChunkSpec],
        source_path: &Path,
        output_path: &Path,
    ) -> Result<(), AudioError> {
        let metadata = ChunksMetadata {
            file_path: source_path.display().to_string(),
            total_chunks: specs.len(),
            config: &self.config,
            chunks: specs,
        };
        let json = serde_json::to_string_pretty(&metadata).map_err(|e| AudioError::WriteFailed {
            message: e.to_string(),
        })?;
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AudioError::WriteFailed {
                message: e.to_string(),
            })?;
        }
        std::fs::write(output_path, json).map_err(|e| AudioError::WriteFailed {
            message: e.to_string(),
        })
    }

    pub fn statistics(specs: &[ChunkSpec]) -> Option<ChunkStatistics> {
        if specs.is_empty() {
            return None;
        }
        let durations: Vec<f32> = specs.iter().map(|s| s.duration).collect();
        Some(ChunkStatistics {
            total_chunks: specs.len(),
            total_duration: durations.iter().sum(),
            avg_chunk_duration: durations.iter().sum::<f32>() / durations.len() as f32,
            min_chunk_duration: durations.iter().cloned().fold(f32::INFINITY, f32::min),
            max_chunk_duration: durations.iter().cloned().fold(f32::NEG_INFINITY, f32::max),
            silent_chunks: specs.iter().filter(|s| s.is_silent).count(),
        })
    }
}
