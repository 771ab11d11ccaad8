//! Media decoding
//!
//! The engine treats audio decoding as an external collaborator behind the
//! `AudioLoader` trait. The built-in implementation reads WAV files with
//! `hound`; other formats are expected to be transcoded upstream.

use crate::audio::resampler;
use crate::audio::types::{AudioData, AudioError};
use std::path::Path;
use tracing::info;

/// Media-io contract: decode a file into mono PCM at the requested rate.
pub trait AudioLoader: Send + Sync {
    /// Decode the file, mix to mono and resample to `target_sample_rate`.
    fn load(&self, path: &Path, target_sample_rate: u32) -> Result<AudioData, AudioError>;

    /// Report the file's duration in seconds without decoding the samples.
    fn probe_duration(&self, path: &Path) -> Result<f32, AudioError>;
}

/// WAV loader backed by `hound`.
#[derive(Debug, Default)]
pub struct WavLoader;

impl WavLoader {
    pub fn new() -> Self {
        Self
    }

    fn open_reader(path: &Path) -> Result<hound::WavReader<std::io::BufReader<std::fs::File>>, AudioError> {
        if !path.exists() {
            return Err(AudioError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        hound::WavReader::open(path).map_err(|e| AudioError::UnsupportedFormat {
            path: format!("{} ({})", path.display(), e),
        })
    }
}

impl AudioLoader for WavLoader {
    fn load(&self, path: &Path, target_sample_rate: u32) -> Result<AudioData, AudioError> {
        let mut reader = Self::open_reader(path)?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AudioError::DecodeFailed {
                    message: e.to_string(),
                })?,
            hound::SampleFormat::Int => {
                let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| AudioError::DecodeFailed {
                        message: e.to_string(),
                    })?
            }
        };

        let mono = resampler::mix_to_mono(&interleaved, spec.channels);
        let samples = if spec.sample_rate != target_sample_rate {
            resampler::resample(&mono, spec.sample_rate, target_sample_rate)?
        } else {
            mono
        };

        let audio = AudioData::new(samples, target_sample_rate);
        info!(
            "Loaded {} ({:.2}s at {} Hz, {} channels)",
            path.display(),
            audio.duration_seconds(),
            spec.sample_rate,
            spec.channels
        );
        Ok(audio)
    }

    fn probe_duration(&self, path: &Path) -> Result<f32, AudioError> {
        let reader = Self::open_reader(path)?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            return Err(AudioError::InvalidSampleRate(spec.sample_rate));
        }
        let frames = reader.duration() as f32;
        Ok(frames / spec.sample_rate as f32)
    }
}
