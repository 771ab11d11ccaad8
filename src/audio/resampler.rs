//! Sample-rate conversion and amplitude preflight
//!
//! Linear resampling to the 16kHz rate the external recognizer and
//! diarizer expect, plus peak normalization for over-range signals.

use crate::audio::types::AudioError;
use tracing::debug;

/// Target rate for the external recognizer and diarizer contracts.
pub const ENGINE_SAMPLE_RATE: u32 = 16_000;

/// Resample a mono signal with linear interpolation.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>, AudioError> {
    if source_rate == 0 {
        return Err(AudioError::InvalidSampleRate(source_rate));
    }
    if target_rate == 0 {
        return Err(AudioError::InvalidSampleRate(target_rate));
    }
    if source_rate == target_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = source_rate as f64 / target_rate as f64;
    let output_len = ((samples.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let position = i as f64 * ratio;
        let index = position.floor() as usize;
        let frac = (position - index as f64) as f32;

        let current = samples[index.min(samples.len() - 1)];
        let next = samples[(index + 1).min(samples.len() - 1)];
        output.push(current + (next - current) * frac);
    }

    debug!(
        "Resampled {} -> {} samples ({} Hz -> {} Hz)",
        samples.len(),
        output.len(),
        source_rate,
        target_rate
    );

    Ok(output)
}

/// Average interleaved frames down to a single mono channel.
pub fn mix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let channels = channels as usize;
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Scale the signal down when its peak exceeds full scale.
///
/// Signals already within [-1, 1] are left untouched.
pub fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak > 1.0 {
        for sample in samples.iter_mut() {
            *sample /= peak;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_rates_match() {
        let samples = vec![0.1, 0.2, 0.3];
        let out = resample(&samples, 16_000, 16_000).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn downsampling_halves_length() {
        let samples: Vec<f32> = (0..32_000).map(|i| (i as f32 * 0.001).sin()).collect();
        let out = resample(&samples, 32_000, 16_000).unwrap();
        assert_eq!(out.len(), 16_000);
    }

    #[test]
    fn rejects_zero_rate() {
        assert!(resample(&[0.0], 0, 16_000).is_err());
        assert!(resample(&[0.0], 16_000, 0).is_err());
    }

    #[test]
    fn normalizes_only_over_range_signals() {
        let mut loud = vec![2.0, -4.0, 1.0];
        normalize_peak(&mut loud);
        assert!((loud[1] + 1.0).abs() < 1e-6);

        let mut quiet = vec![0.5, -0.25];
        normalize_peak(&mut quiet);
        assert_eq!(quiet, vec![0.5, -0.25]);
    }

    #[test]
    fn mixes_stereo_to_mono() {
        let stereo = vec![1.0, 0.0, 0.0, 1.0];
        let mono = mix_to_mono(&stereo, 2);
        assert_eq!(mono, vec![0.5, 0.5]);
    }
}
