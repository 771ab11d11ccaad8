//! Transcriber stage
//!
//! Drives the external recognizer over a stream of chunks with caching,
//! per-attempt timeouts, exponential backoff and output validation.
//! Per-chunk failures never cross the stage boundary; an exhausted chunk
//! is forwarded empty with its error recorded.

use crate::asr::cache::TranscriptionCache;
use crate::asr::engine::Transcriber;
use crate::asr::types::{TranscribeOptions, TranscribedChunk, TranscriberConfig, TranscriberError};
use crate::audio::resampler;
use crate::audio::types::AudioChunk;
use crate::config::TimeoutPolicy;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Phrases that indicate the recognizer echoed instructions instead of
/// transcribing speech.
const META_PHRASES: &[&str] = &[
    "transcribe with maximum precision",
    "please transcribe",
    "audio in portuguese",
    "audio in english",
    "transcription system",
    "thank you for watching",
    "subtitles by",
];

/// Heuristic from the recovery machinery: hallucinated or degenerate
/// recognizer output forces a retry at a higher temperature.
pub fn is_invalid_transcription(text: &str, config: &TranscriberConfig) -> bool {
    let visible = text.chars().filter(|c| !c.is_whitespace()).count();
    if visible < config.invalid_min_chars {
        return true;
    }

    let lowered = text.to_lowercase();
    if META_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        return true;
    }

    let words: Vec<&str> = lowered.split_whitespace().collect();
    if words.len() >= config.invalid_min_words {
        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for word in &words {
            if word.len() > 3 {
                *counts.entry(*word).or_insert(0) += 1;
            }
        }
        if counts
            .values()
            .any(|count| *count > config.invalid_repetition_limit)
        {
            return true;
        }
    }

    false
}

/// Runs the recognizer over chunks with a bounded worker pool.
#[derive(Clone)]
pub struct TranscriberStage {
    transcriber: Arc<dyn Transcriber>,
    cache: Arc<TranscriptionCache>,
    config: Arc<TranscriberConfig>,
    timeout_policy: TimeoutPolicy,
}

impl TranscriberStage {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        cache: Arc<TranscriptionCache>,
        config: TranscriberConfig,
        timeout_policy: TimeoutPolicy,
    ) -> Self {
        Self {
            transcriber,
            cache,
            config: Arc::new(config),
            timeout_policy,
        }
    }

    /// Consume chunks from `rx`, emit results on `tx`.
    ///
    /// Results may arrive out of chunk-index order; consumers re-key by
    /// index. Cancellation stops new chunks from starting while in-flight
    /// attempts are allowed to finish.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<AudioChunk>,
        tx: mpsc::Sender<TranscribedChunk>,
        cancel: CancellationToken,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut workers = JoinSet::new();

        while let Some(chunk) = rx.recv().await {
            if cancel.is_cancelled() {
                break;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let stage = self.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                let _permit = permit;
                let result = stage.transcribe_chunk(&chunk, &cancel).await;
                let _ = tx.send(result).await;
            });
        }

        while workers.join_next().await.is_some() {}
    }

    /// Full per-chunk protocol: preflight, cache, retries, validation.
    pub async fn transcribe_chunk(
        &self,
        chunk: &AudioChunk,
        cancel: &CancellationToken,
    ) -> TranscribedChunk {
        let started = Instant::now();

        if chunk.is_silent {
            debug!("Skipping silent chunk {}", chunk.chunk_id);
            return TranscribedChunk::empty(
                &chunk.chunk_id,
                chunk.index,
                chunk.start_time,
                chunk.end_time,
            );
        }

        let samples = match self.preflight(chunk) {
            Ok(samples) => samples,
            Err(e) => {
                let mut result = TranscribedChunk::empty(
                    &chunk.chunk_id,
                    chunk.index,
                    chunk.start_time,
                    chunk.end_time,
                );
                result.error = Some(format!("preflight failed: {}", e));
                return result;
            }
        };

        let fingerprint = format!(
            "{}|{:?}|{}|{}",
            self.config.model_name,
            self.config.language,
            self.config.temperature,
            self.config.word_timestamps
        );
        let cache_key = TranscriptionCache::content_key(&samples, &fingerprint);
        if let Some(output) = self.cache.get(&cache_key) {
            return self.build_result(chunk, output, started);
        }

        let attempt_timeout = self.timeout_policy.timeout_for(chunk.duration());
        let mut last_error: Option<String> = None;
        let mut temperature_step = 0usize;

        for attempt in 0..self.config.max_retries.max(1) {
            if cancel.is_cancelled() {
                last_error = Some("cancelled before attempt".to_string());
                break;
            }

            if attempt > 0 {
                let backoff = Duration::from_secs(1 << (attempt - 1).min(4));
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => {
                        last_error = Some("cancelled during backoff".to_string());
                        break;
                    }
                }
            }

            let temperature = if temperature_step == 0 {
                self.config.temperature
            } else {
                let idx = (temperature_step - 1).min(
                    self.config.retry_temperatures.len().saturating_sub(1),
                );
                self.config
                    .retry_temperatures
                    .get(idx)
                    .copied()
                    .unwrap_or(self.config.temperature)
            };

            let options = TranscribeOptions {
                language: self.config.language.clone(),
                temperature,
                word_timestamps: self.config.word_timestamps,
            };

            match self.attempt(samples.clone(), options, attempt_timeout).await {
                Ok(output) => {
                    if is_invalid_transcription(&output.text, &self.config) {
                        warn!(
                            "Invalid transcription for {} on attempt {} ({} chars)",
                            chunk.chunk_id,
                            attempt + 1,
                            output.text.len()
                        );
                        last_error = Some("invalid transcription output".to_string());
                        temperature_step += 1;
                        continue;
                    }
                    self.cache.put(cache_key, output.clone());
                    return self.build_result(chunk, output, started);
                }
                Err(e) => {
                    warn!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt + 1,
                        self.config.max_retries,
                        chunk.chunk_id,
                        e
                    );
                    last_error = Some(e.to_string());
                }
            }
        }

        let mut result = TranscribedChunk::empty(
            &chunk.chunk_id,
            chunk.index,
            chunk.start_time,
            chunk.end_time,
        );
        result.processing_time = started.elapsed().as_secs_f32();
        result.error = Some(format!(
            "failed after {} attempts: {}",
            self.config.max_retries,
            last_error.unwrap_or_else(|| "unknown error".to_string())
        ));
        result
    }

    /// One recognizer call on a blocking worker, raced against the deadline.
    async fn attempt(
        &self,
        samples: Arc<Vec<f32>>,
        options: TranscribeOptions,
        deadline: Option<Duration>,
    ) -> Result<crate::asr::types::RecognizerOutput, TranscriberError> {
        let transcriber = Arc::clone(&self.transcriber);
        let call =
            tokio::task::spawn_blocking(move || transcriber.transcribe(&samples, &options));

        let joined = match deadline {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(TranscriberError::Timeout {
                        seconds: limit.as_secs(),
                    })
                }
            },
            None => call.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) => Err(TranscriberError::Transport {
                message: format!("recognizer worker failed: {}", e),
            }),
        }
    }

    fn preflight(&self, chunk: &AudioChunk) -> Result<Arc<Vec<f32>>, crate::audio::types::AudioError> {
        let peak = chunk
            .samples
            .iter()
            .fold(0.0f32, |acc, s| acc.max(s.abs()));
        if chunk.sample_rate == resampler::ENGINE_SAMPLE_RATE && peak <= 1.0 {
            return Ok(Arc::clone(&chunk.samples));
        }

        let mut samples = if chunk.sample_rate != resampler::ENGINE_SAMPLE_RATE {
            resampler::resample(
                &chunk.samples,
                chunk.sample_rate,
                resampler::ENGINE_SAMPLE_RATE,
            )?
        } else {
            chunk.samples.as_ref().clone()
        };
        resampler::normalize_peak(&mut samples);
        Ok(Arc::new(samples))
    }

    fn build_result(
        &self,
        chunk: &AudioChunk,
        output: crate::asr::types::RecognizerOutput,
        started: Instant,
    ) -> TranscribedChunk {
        info!(
            "Transcribed {} ({} chars, confidence {:.3})",
            chunk.chunk_id,
            output.text.len(),
            output.confidence
        );
        TranscribedChunk {
            chunk_id: chunk.chunk_id.clone(),
            chunk_index: chunk.index,
            start_time: chunk.start_time,
            end_time: chunk.end_time,
            text: output.text,
            language: output.language,
            confidence: output.confidence,
            segments: output.segments,
            processing_time: started.elapsed().as_secs_f32(),
            error: None,
        }
    }
}

/// Persist stage results as `whisper_results.json`.
pub fn save_results(results: &[TranscribedChunk], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(path, json)?;
    Ok(())
}
