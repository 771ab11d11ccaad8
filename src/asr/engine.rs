//! Recognizer contract and the HTTP-backed implementation
//!
//! The speech recognizer is an external collaborator. Engines implement
//! the blocking `Transcriber` trait; the stage runs calls on dedicated
//! worker tasks so the coordination loops stay responsive.

use crate::asr::types::{RecognizerOutput, SubSegment, TranscribeOptions, TranscriberError};
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info};

pub const API_KEY_ENV: &str = "TRANSCRIPTION_API_KEY";
pub const API_URL_ENV: &str = "TRANSCRIPTION_API_URL";
pub const API_MODEL_ENV: &str = "TRANSCRIPTION_API_MODEL";

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const DEFAULT_API_MODEL: &str = "whisper-1";

/// Recognizer contract: 16kHz mono PCM in, timed sub-segments out.
///
/// Implementations must either return a full `RecognizerOutput` or raise a
/// transport/timeout error; partially filled responses are rejected by the
/// stage's validity checks.
pub trait Transcriber: Send + Sync {
    fn transcribe(
        &self,
        samples: &[f32],
        options: &TranscribeOptions,
    ) -> Result<RecognizerOutput, TranscriberError>;
}

/// Whisper-compatible HTTP recognizer client.
///
/// Posts chunk audio as WAV multipart to a `/audio/transcriptions`
/// endpoint and parses the verbose JSON response. Credentials are read
/// from the environment once at construction.
pub struct HttpTranscriber {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ApiSegment {
    start: f32,
    end: f32,
    text: String,
    #[serde(default)]
    avg_logprob: f32,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<ApiSegment>,
}

impl HttpTranscriber {
    pub fn new(endpoint: String, api_key: String, model: String) -> Result<Self, TranscriberError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| TranscriberError::Transport {
                message: e.to_string(),
            })?;

        info!("Initialized HTTP recognizer ({}, model {})", endpoint, model);
        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
        })
    }

    /// Build a client from `TRANSCRIPTION_API_*` environment variables.
    pub fn from_env() -> Result<Self, TranscriberError> {
        let api_key =
            std::env::var(API_KEY_ENV).map_err(|_| TranscriberError::MissingCredentials {
                variable: API_KEY_ENV.to_string(),
            })?;
        let endpoint =
            std::env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let model =
            std::env::var(API_MODEL_ENV).unwrap_or_else(|_| DEFAULT_API_MODEL.to_string());
        Self::new(endpoint, api_key, model)
    }

    fn encode_wav(samples: &[f32]) -> Result<Vec<u8>, TranscriberError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(|e| {
                TranscriberError::Transport {
                    message: format!("WAV encoding failed: {}", e),
                }
            })?;
            for sample in samples {
                writer
                    .write_sample(*sample)
                    .map_err(|e| TranscriberError::Transport {
                        message: format!("WAV encoding failed: {}", e),
                    })?;
            }
            writer.finalize().map_err(|e| TranscriberError::Transport {
                message: format!("WAV encoding failed: {}", e),
            })?;
        }
        Ok(cursor.into_inner())
    }
}

impl Transcriber for HttpTranscriber {
    fn transcribe(
        &self,
        samples: &[f32],
        options: &TranscribeOptions,
    ) -> Result<RecognizerOutput, TranscriberError> {
        if samples.is_empty() {
            return Err(TranscriberError::EmptyAudio);
        }

        let wav = Self::encode_wav(samples)?;
        debug!(
            "Posting {:.2}s of audio to recognizer (temperature {:.1})",
            samples.len() as f32 / 16_000.0,
            options.temperature
        );

        let file = reqwest::blocking::multipart::Part::bytes(wav)
            .file_name("chunk.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscriberError::Transport {
                message: e.to_string(),
            })?;

        let mut form = reqwest::blocking::multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("temperature", format!("{}", options.temperature));
        if let Some(language) = &options.language {
            form = form.text("language", language.clone());
        }
        if options.word_timestamps {
            form = form.text("timestamp_granularities[]", "segment");
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    TranscriberError::Timeout { seconds: 600 }
                } else {
                    TranscriberError::Transport {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TranscriberError::Transport {
                message: format!("recognizer returned {}: {}", status, body),
            });
        }

        let parsed: ApiResponse =
            response.json().map_err(|e| TranscriberError::InvalidOutput {
                reason: format!("malformed response: {}", e),
            })?;

        let confidence = if parsed.segments.is_empty() {
            0.0
        } else {
            parsed.segments.iter().map(|s| s.avg_logprob).sum::<f32>()
                / parsed.segments.len() as f32
        };

        Ok(RecognizerOutput {
            text: parsed.text.trim().to_string(),
            language: parsed.language.unwrap_or_else(|| "unknown".to_string()),
            confidence,
            segments: parsed
                .segments
                .into_iter()
                .map(|s| SubSegment {
                    start: s.start,
                    end: s.end,
                    text: s.text.trim().to_string(),
                })
                .collect(),
        })
    }
}
