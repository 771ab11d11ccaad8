//! Diarizer contract and the built-in feature-based implementation
//!
//! The external diarizer is an opaque collaborator behind the blocking
//! `Diarizer` trait. When a diarizer emits turns without embeddings, the
//! stage derives a fallback feature vector from the turn's samples so the
//! cross-chunk matcher still has something to compare.

use crate::diarization::types::{DiarizationError, LocalTurn};
use tracing::debug;

const FRAME_SIZE: usize = 1024;
const HOP_SIZE: usize = 512;

/// Diarizer contract: 16kHz mono PCM in, locally-labelled turns out.
pub trait Diarizer: Send + Sync {
    fn diarize(&self, samples: &[f32]) -> Result<Vec<LocalTurn>, DiarizationError>;
}

/// Compute a voice feature vector from raw samples.
///
/// Frame-wise energy, zero-crossing rate, spectral centroid, rolloff and
/// flux are summarized by their mean, standard deviation, minimum and
/// maximum, yielding a 20-dimensional L2-normalized vector. Coarse
/// compared to a neural embedding, but distinct voices separate well
/// enough for cosine matching.
pub fn compute_fallback_embedding(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let mut frame_features: Vec<[f32; 5]> = Vec::new();
    let mut previous_energy = 0.0f32;

    let mut position = 0;
    while position + FRAME_SIZE <= samples.len() {
        let frame = &samples[position..position + FRAME_SIZE];

        let energy = (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt();
        let zcr = zero_crossing_rate(frame);
        let centroid = spectral_centroid(frame, sample_rate);
        let rolloff = spectral_rolloff(frame, sample_rate);
        let flux = (energy - previous_energy).abs();
        previous_energy = energy;

        frame_features.push([energy, zcr, centroid, rolloff, flux]);
        position += HOP_SIZE;
    }

    let mut embedding = vec![0.0f32; 20];
    if frame_features.is_empty() {
        return embedding;
    }

    for feature_idx in 0..5 {
        let values: Vec<f32> = frame_features.iter().map(|f| f[feature_idx]).collect();
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
        let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

        let base = feature_idx * 4;
        embedding[base] = mean;
        embedding[base + 1] = variance.sqrt();
        embedding[base + 2] = min;
        embedding[base + 3] = max;
    }

    let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut embedding {
            *value /= norm;
        }
    }
    embedding
}

fn zero_crossing_rate(frame: &[f32]) -> f32 {
    if frame.len() < 2 {
        return 0.0;
    }
    let mut crossings = 0;
    for i in 1..frame.len() {
        if (frame[i - 1] >= 0.0) != (frame[i] >= 0.0) {
            crossings += 1;
        }
    }
    crossings as f32 / frame.len() as f32
}

fn spectral_centroid(frame: &[f32], sample_rate: u32) -> f32 {
    let mut weighted_sum = 0.0;
    let mut magnitude_sum = 0.0;
    for (i, sample) in frame.iter().enumerate() {
        let freq = i as f32 * sample_rate as f32 / frame.len() as f32 / 2.0;
        let magnitude = sample.abs();
        weighted_sum += freq * magnitude;
        magnitude_sum += magnitude;
    }
    if magnitude_sum > 0.0 {
        weighted_sum / magnitude_sum
    } else {
        0.0
    }
}

fn spectral_rolloff(frame: &[f32], sample_rate: u32) -> f32 {
    let mut magnitudes: Vec<f32> = frame.iter().map(|s| s.abs()).collect();
    magnitudes.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let total: f32 = magnitudes.iter().sum();
    let threshold = total * 0.85;

    let mut cumulative = 0.0;
    for (i, magnitude) in magnitudes.iter().enumerate() {
        cumulative += magnitude;
        if cumulative >= threshold {
            return i as f32 * sample_rate as f32 / frame.len() as f32 / 2.0;
        }
    }
    sample_rate as f32 / 2.0
}

/// Built-in speaker-change detector usable behind the diarizer contract.
///
/// Splits the chunk into voiced regions by energy, derives a feature
/// vector per region and groups regions whose vectors are close into the
/// same local label. No model download, fully deterministic.
pub struct FeatureDiarizer {
    /// Energy below which a window counts as silence
    energy_floor: f32,

    /// Cosine similarity above which two regions share a label
    grouping_threshold: f32,

    /// Regions shorter than this are discarded (seconds)
    min_region_duration: f32,
}

impl Default for FeatureDiarizer {
    fn default() -> Self {
        Self {
            energy_floor: 1e-4,
            grouping_threshold: 0.95,
            min_region_duration: 0.5,
        }
    }
}

impl FeatureDiarizer {
    pub fn new(energy_floor: f32, grouping_threshold: f32, min_region_duration: f32) -> Self {
        Self {
            energy_floor,
            grouping_threshold,
            min_region_duration,
        }
    }

    /// Voiced regions as (start, end) second pairs at 16kHz.
    fn voiced_regions(&self, samples: &[f32], sample_rate: u32) -> Vec<(f32, f32)> {
        let window = (sample_rate as usize) / 10; // 100ms
        if window == 0 {
            return Vec::new();
        }

        let mut regions = Vec::new();
        let mut region_start: Option<f32> = None;

        for (i, chunk) in samples.chunks(window).enumerate() {
            let energy = chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len() as f32;
            let time = i as f32 * 0.1;
            let voiced = energy > self.energy_floor;

            match (voiced, region_start) {
                (true, None) => region_start = Some(time),
                (false, Some(start)) => {
                    if time - start >= self.min_region_duration {
                        regions.push((start, time));
                    }
                    region_start = None;
                }
                _ => {}
            }
        }

        if let Some(start) = region_start {
            let end = samples.len() as f32 / sample_rate as f32;
            if end - start >= self.min_region_duration {
                regions.push((start, end));
            }
        }

        regions
    }
}

impl Diarizer for FeatureDiarizer {
    fn diarize(&self, samples: &[f32]) -> Result<Vec<LocalTurn>, DiarizationError> {
        if samples.is_empty() {
            return Err(DiarizationError::EmptyAudio);
        }

        let sample_rate = 16_000u32;
        let regions = self.voiced_regions(samples, sample_rate);
        debug!("Feature diarizer found {} voiced regions", regions.len());

        // Greedy grouping: each region joins the closest existing label or
        // opens a new one.
        let mut labels: Vec<Vec<f32>> = Vec::new();
        let mut turns = Vec::new();

        for (start, end) in regions {
            let begin_idx = (start * sample_rate as f32) as usize;
            let end_idx = ((end * sample_rate as f32) as usize).min(samples.len());
            let embedding =
                compute_fallback_embedding(&samples[begin_idx..end_idx], sample_rate);

            let mut best: Option<(usize, f32)> = None;
            for (label_idx, prototype) in labels.iter().enumerate() {
                let similarity = cosine_similarity(&embedding, prototype);
                if similarity >= self.grouping_threshold
                    && best.map(|(_, s)| similarity > s).unwrap_or(true)
                {
                    best = Some((label_idx, similarity));
                }
            }

            let label_idx = match best {
                Some((idx, _)) => {
                    // Blend the region into the label prototype.
                    let prototype = &mut labels[idx];
                    for (p, e) in prototype.iter_mut().zip(embedding.iter()) {
                        *p = 0.7 * *p + 0.3 * e;
                    }
                    idx
                }
                None => {
                    labels.push(embedding.clone());
                    labels.len() - 1
                }
            };

            turns.push(LocalTurn {
                label: format!("S{}", label_idx),
                start,
                end,
                confidence: 1.0,
                embedding: Some(embedding),
            });
        }

        Ok(turns)
    }
}

/// Cosine similarity; mismatched dimensions compare as 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
