//! Diarizer stage
//!
//! Runs the external diarizer per chunk, filters its turns, and maps the
//! per-chunk local labels onto stable global speaker ids. Diarizer calls
//! run concurrently; the identity mapping is applied strictly in
//! chunk-index order so speaker minting is deterministic regardless of
//! which worker finishes first.

use crate::audio::resampler;
use crate::audio::types::AudioChunk;
use crate::diarization::engine::{compute_fallback_embedding, Diarizer};
use crate::diarization::tracker::SpeakerTracker;
use crate::diarization::types::{DiarizedChunk, DiarizerConfig, LocalTurn, SpeakerTurn};
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Chunk after the diarizer ran but before identity mapping.
struct PreparedChunk {
    chunk_index: usize,
    chunk_id: String,
    start_time: f32,
    end_time: f32,
    turns: Vec<LocalTurn>,
    label_embeddings: Vec<(String, Vec<f32>)>,
    processing_time: f32,
    error: Option<String>,
}

/// Runs the diarizer over chunks and tracks speaker identity across them.
#[derive(Clone)]
pub struct DiarizerStage {
    diarizer: Arc<dyn Diarizer>,
    config: Arc<DiarizerConfig>,
    tracker: Arc<SpeakerTracker>,
}

impl DiarizerStage {
    pub fn new(diarizer: Arc<dyn Diarizer>, config: DiarizerConfig) -> Self {
        let tracker = Arc::new(SpeakerTracker::new(
            config.similarity_threshold,
            config.prototype_smoothing,
        ));
        Self {
            diarizer,
            config: Arc::new(config),
            tracker,
        }
    }

    pub fn tracker(&self) -> &Arc<SpeakerTracker> {
        &self.tracker
    }

    /// Consume chunks from `rx`, emit globally-mapped results on `tx`.
    ///
    /// Emission order follows chunk index even when diarizer calls finish
    /// out of order.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<AudioChunk>,
        tx: mpsc::Sender<DiarizedChunk>,
        cancel: CancellationToken,
    ) {
        let worker_count = self.config.workers.max(1);
        let (ready_tx, mut ready_rx) = mpsc::channel::<PreparedChunk>(worker_count * 2);

        let stage = self.clone();
        let pool_cancel = cancel.clone();
        let pool = tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(worker_count));
            let mut workers = JoinSet::new();
            while let Some(chunk) = rx.recv().await {
                if pool_cancel.is_cancelled() {
                    break;
                }
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let stage = stage.clone();
                let ready_tx = ready_tx.clone();
                workers.spawn(async move {
                    let _permit = permit;
                    let prepared = stage.prepare_chunk(&chunk).await;
                    let _ = ready_tx.send(prepared).await;
                });
            }
            while workers.join_next().await.is_some() {}
        });

        // Sequencer: apply the tracker in chunk-index order.
        let mut pending: BTreeMap<usize, PreparedChunk> = BTreeMap::new();
        let mut expected = 0usize;

        'collect: while let Some(prepared) = ready_rx.recv().await {
            pending.insert(prepared.chunk_index, prepared);
            while let Some(next) = pending.remove(&expected) {
                expected += 1;
                let result = self.finalize(next);
                if tx.send(result).await.is_err() {
                    break 'collect;
                }
            }
        }

        for (_, prepared) in std::mem::take(&mut pending) {
            let result = self.finalize(prepared);
            if tx.send(result).await.is_err() {
                break;
            }
        }

        let _ = pool.await;
    }

    /// Run the diarizer on one chunk and filter its turns. No identity
    /// mapping happens here; that is the sequencer's job.
    async fn prepare_chunk(&self, chunk: &AudioChunk) -> PreparedChunk {
        let started = Instant::now();
        let mut prepared = PreparedChunk {
            chunk_index: chunk.index,
            chunk_id: chunk.chunk_id.clone(),
            start_time: chunk.start_time,
            end_time: chunk.end_time,
            turns: Vec::new(),
            label_embeddings: Vec::new(),
            processing_time: 0.0,
            error: None,
        };

        if chunk.is_silent {
            debug!("Skipping silent chunk {}", chunk.chunk_id);
            return prepared;
        }

        let samples = match self.preflight(chunk) {
            Ok(samples) => samples,
            Err(e) => {
                prepared.error = Some(format!("preflight failed: {}", e));
                return prepared;
            }
        };

        let diarizer = Arc::clone(&self.diarizer);
        let call_samples = Arc::clone(&samples);
        let outcome =
            tokio::task::spawn_blocking(move || diarizer.diarize(&call_samples)).await;

        let turns = match outcome {
            Ok(Ok(turns)) => turns,
            Ok(Err(e)) => {
                warn!("Diarization of {} failed: {}", chunk.chunk_id, e);
                prepared.error = Some(e.to_string());
                prepared.processing_time = started.elapsed().as_secs_f32();
                return prepared;
            }
            Err(e) => {
                prepared.error = Some(format!("diarizer worker failed: {}", e));
                prepared.processing_time = started.elapsed().as_secs_f32();
                return prepared;
            }
        };

        let turns = self.filter_turns(turns);
        prepared.label_embeddings = self.label_embeddings(&turns, &samples);
        prepared.turns = turns;
        prepared.processing_time = started.elapsed().as_secs_f32();
        prepared
    }

    /// Apply duration/confidence filters and the per-chunk speaker cap.
    fn filter_turns(&self, turns: Vec<LocalTurn>) -> Vec<LocalTurn> {
        let mut turns: Vec<LocalTurn> = turns
            .into_iter()
            .filter(|t| t.duration() >= self.config.min_speaker_duration)
            .filter(|t| t.confidence >= self.config.confidence_threshold)
            .collect();

        let mut speaking_time: HashMap<String, f32> = HashMap::new();
        for turn in &turns {
            *speaking_time.entry(turn.label.clone()).or_insert(0.0) += turn.duration();
        }

        if speaking_time.len() > self.config.max_speakers {
            warn!(
                "Chunk produced {} local speakers, keeping top {}",
                speaking_time.len(),
                self.config.max_speakers
            );
            let mut by_time: Vec<(String, f32)> = speaking_time.into_iter().collect();
            by_time.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            let keep: std::collections::HashSet<String> = by_time
                .into_iter()
                .take(self.config.max_speakers)
                .map(|(label, _)| label)
                .collect();
            turns.retain(|t| keep.contains(&t.label));
        }

        turns
    }

    /// One average embedding per local label, computing the fallback
    /// feature vector for turns the diarizer left bare.
    fn label_embeddings(
        &self,
        turns: &[LocalTurn],
        samples: &Arc<Vec<f32>>,
    ) -> Vec<(String, Vec<f32>)> {
        let mut grouped: BTreeMap<String, Vec<Vec<f32>>> = BTreeMap::new();

        for turn in turns {
            let embedding = match &turn.embedding {
                Some(embedding) => embedding.clone(),
                None => {
                    let begin =
                        (turn.start * resampler::ENGINE_SAMPLE_RATE as f32) as usize;
                    let end = ((turn.end * resampler::ENGINE_SAMPLE_RATE as f32) as usize)
                        .min(samples.len());
                    compute_fallback_embedding(
                        &samples[begin.min(end)..end],
                        resampler::ENGINE_SAMPLE_RATE,
                    )
                }
            };
            grouped.entry(turn.label.clone()).or_default().push(embedding);
        }

        grouped
            .into_iter()
            .filter_map(|(label, embeddings)| {
                average_embedding(&embeddings).map(|mean| (label, mean))
            })
            .collect()
    }

    /// Map local labels to global ids and translate times to global.
    fn finalize(&self, prepared: PreparedChunk) -> DiarizedChunk {
        let mapping = self.tracker.assign_chunk(&prepared.label_embeddings);

        let mut speakers: Vec<String> = Vec::new();
        let turns: Vec<SpeakerTurn> = prepared
            .turns
            .iter()
            .map(|turn| {
                let speaker_id = mapping
                    .get(&turn.label)
                    .cloned()
                    .unwrap_or_else(|| turn.label.clone());
                if !speakers.contains(&speaker_id) {
                    speakers.push(speaker_id.clone());
                }
                SpeakerTurn {
                    speaker_id,
                    start: prepared.start_time + turn.start,
                    end: prepared.start_time + turn.end,
                    confidence: turn.confidence,
                }
            })
            .collect();

        speakers.sort();

        if prepared.error.is_none() {
            info!(
                "Diarized {} ({} turns, {} speakers)",
                prepared.chunk_id,
                turns.len(),
                speakers.len()
            );
        }

        DiarizedChunk {
            chunk_id: prepared.chunk_id,
            chunk_index: prepared.chunk_index,
            start_time: prepared.start_time,
            end_time: prepared.end_time,
            speakers,
            turns,
            processing_time: prepared.processing_time,
            error: prepared.error,
        }
    }

    fn preflight(
        &self,
        chunk: &AudioChunk,
    ) -> Result<Arc<Vec<f32>>, crate::audio::types::AudioError> {
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
}

fn average_embedding(embeddings: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = embeddings.first()?;
    let mut mean = vec![0.0f32; first.len()];
    let mut counted = 0usize;
    for embedding in embeddings {
        if embedding.len() != mean.len() {
            continue;
        }
        for (m, e) in mean.iter_mut().zip(embedding.iter()) {
            *m += e;
        }
        counted += 1;
    }
    if counted == 0 {
        return None;
    }
    for value in &mut mean {
        *value /= counted as f32;
    }
    Some(mean)
}

/// Persist stage results as `diarization_results.json`.
pub fn save_results(results: &[DiarizedChunk], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(path, json)?;
    Ok(())
}
