//! Per-job processing pipeline
//!
//! Runs one admitted job end to end: chunk the decoded audio, stream the
//! chunks through the transcriber and diarizer stages concurrently over
//! bounded channels, fuse the results and write artifacts. A slow stage
//! stalls the feeder, which bounds how many chunks are in memory no
//! matter how long the audio is.

use crate::asr::stage as asr_stage;
use crate::asr::stage::TranscriberStage;
use crate::asr::types::TranscribedChunk;
use crate::audio::chunker::AudioChunker;
use crate::audio::loader::AudioLoader;
use crate::audio::resampler::ENGINE_SAMPLE_RATE;
use crate::diarization::engine::Diarizer;
use crate::diarization::stage as dia_stage;
use crate::diarization::stage::DiarizerStage;
use crate::diarization::types::{DiarizedChunk, DiarizerConfig};
use crate::merge::merger::TranscriptionMerger;
use crate::orchestrator::types::{JobOutcome, Stage};
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Receives coarse progress updates from the pipeline.
pub type ProgressSink = Arc<dyn Fn(Stage, u8, String) + Send + Sync>;

fn report(progress: &ProgressSink, stage: Stage, percent: u8, message: String) {
    (progress.as_ref())(stage, percent, message);
}

/// Stateless per-job pipeline; per-job state (speaker tracker, channels)
/// is created inside `run`.
#[derive(Clone)]
pub struct JobPipeline {
    loader: Arc<dyn AudioLoader>,
    chunker: Arc<AudioChunker>,
    transcriber_stage: TranscriberStage,
    diarizer: Arc<dyn Diarizer>,
    diarizer_config: DiarizerConfig,
    merger: Arc<TranscriptionMerger>,
    channel_capacity: usize,
}

impl JobPipeline {
    pub fn new(
        loader: Arc<dyn AudioLoader>,
        chunker: Arc<AudioChunker>,
        transcriber_stage: TranscriberStage,
        diarizer: Arc<dyn Diarizer>,
        diarizer_config: DiarizerConfig,
        merger: Arc<TranscriptionMerger>,
        channel_capacity: usize,
    ) -> Self {
        Self {
            loader,
            chunker,
            transcriber_stage,
            diarizer,
            diarizer_config,
            merger,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Run a job to completion, cancellation or failure.
    ///
    /// Artifacts are written as stages complete, so a cancelled or failed
    /// job leaves whatever was produced on disk. `final_transcription.json`
    /// is written only on success.
    pub async fn run(
        &self,
        job_id: Uuid,
        file_path: &Path,
        output_dir: &Path,
        cancel: CancellationToken,
        progress: ProgressSink,
    ) -> Result<JobOutcome> {
        std::fs::create_dir_all(output_dir).context("failed to create output directory")?;
        report(
            &progress,
            Stage::Chunking,
            10,
            "Splitting audio into chunks".to_string(),
        );

        let audio = {
            let loader = Arc::clone(&self.loader);
            let path = file_path.to_path_buf();
            tokio::task::spawn_blocking(move || loader.load(&path, ENGINE_SAMPLE_RATE))
                .await
                .context("audio decode worker failed")??
        };
        let audio = Arc::new(audio);

        if cancel.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }

        let prefix: String = job_id.simple().to_string().chars().take(8).collect();
        let specs = self.chunker.plan(&audio, &prefix)?;
        let total_chunks = specs.len();
        if total_chunks == 0 {
            bail!("no chunks produced");
        }

        self.chunker.write_metadata(
            &specs,
            file_path,
            &output_dir.join("chunks_metadata.json"),
        )?;
        report(
            &progress,
            Stage::Chunking,
            30,
            format!("Planned {} chunks", total_chunks),
        );

        let (asr_tx, asr_rx) = mpsc::channel(self.channel_capacity);
        let (dia_tx, dia_rx) = mpsc::channel(self.channel_capacity);
        let (asr_result_tx, mut asr_result_rx) = mpsc::channel(self.channel_capacity);
        let (dia_result_tx, mut dia_result_rx) = mpsc::channel(self.channel_capacity);

        // Feeder: extract chunk windows lazily and push them to both
        // stages. Bounded sends are the backpressure point.
        let feeder = {
            let chunker = Arc::clone(&self.chunker);
            let audio = Arc::clone(&audio);
            let specs = specs.clone();
            let chunks_dir = output_dir.join("chunks");
            let cancel = cancel.clone();
            tokio::spawn(async move {
                for spec in specs {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let chunk = {
                        let chunker = Arc::clone(&chunker);
                        let audio = Arc::clone(&audio);
                        let wav_path = chunks_dir.join(format!("{}.wav", spec.chunk_id));
                        tokio::task::spawn_blocking(move || {
                            let chunk = chunker.extract(&audio, &spec);
                            if let Err(e) = AudioChunker::save_chunk_wav(&chunk, &wav_path) {
                                warn!("Failed to persist {}: {}", spec.chunk_id, e);
                            }
                            chunk
                        })
                        .await
                    };
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            warn!("Chunk extraction worker failed: {}", e);
                            break;
                        }
                    };
                    if asr_tx.send(chunk.clone()).await.is_err() {
                        break;
                    }
                    if dia_tx.send(chunk).await.is_err() {
                        break;
                    }
                }
            })
        };

        let transcriber_task = {
            let stage = self.transcriber_stage.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { stage.run(asr_rx, asr_result_tx, cancel).await })
        };

        let diarizer_task = {
            let stage =
                DiarizerStage::new(Arc::clone(&self.diarizer), self.diarizer_config.clone());
            let cancel = cancel.clone();
            tokio::spawn(async move { stage.run(dia_rx, dia_result_tx, cancel).await })
        };

        let transcription_collector = {
            let progress = Arc::clone(&progress);
            tokio::spawn(async move {
                let mut results: Vec<TranscribedChunk> = Vec::new();
                while let Some(result) = asr_result_rx.recv().await {
                    results.push(result);
                    let percent = 30 + (results.len() * 30 / total_chunks) as u8;
                    report(
                        &progress,
                        Stage::Transcribing,
                        percent,
                        format!("Transcription {}/{}", results.len(), total_chunks),
                    );
                }
                results
            })
        };

        let diarization_collector = {
            let progress = Arc::clone(&progress);
            tokio::spawn(async move {
                let mut results: Vec<DiarizedChunk> = Vec::new();
                while let Some(result) = dia_result_rx.recv().await {
                    results.push(result);
                    let percent = 60 + (results.len() * 25 / total_chunks) as u8;
                    report(
                        &progress,
                        Stage::Diarizing,
                        percent,
                        format!("Diarization {}/{}", results.len(), total_chunks),
                    );
                }
                results
            })
        };

        let (feeder_result, transcriber_result, diarizer_result, transcriptions, diarizations) = tokio::join!(
            feeder,
            transcriber_task,
            diarizer_task,
            transcription_collector,
            diarization_collector
        );
        feeder_result.context("chunk feeder failed")?;
        transcriber_result.context("transcriber stage failed")?;
        diarizer_result.context("diarizer stage failed")?;
        let mut transcriptions = transcriptions.context("transcription collector failed")?;
        let mut diarizations = diarizations.context("diarization collector failed")?;

        transcriptions.sort_by_key(|t| t.chunk_index);
        diarizations.sort_by_key(|d| d.chunk_index);

        // Stage outputs are persisted even for cancelled jobs; whatever
        // completed stays on disk.
        asr_stage::save_results(&transcriptions, &output_dir.join("whisper_results.json"))?;
        dia_stage::save_results(&diarizations, &output_dir.join("diarization_results.json"))?;

        if cancel.is_cancelled() {
            info!("Job {} cancelled after {} chunk results", job_id, transcriptions.len());
            return Ok(JobOutcome::Cancelled);
        }

        report(&progress, Stage::Merging, 85, "Combining results".to_string());
        let merged = self.merger.merge(
            &transcriptions,
            &diarizations,
            &file_path.display().to_string(),
        );

        // All-silent audio legitimately merges to nothing; voiced audio
        // that produced nothing means every chunk failed.
        let had_voiced_chunks = specs.iter().any(|spec| !spec.is_silent);
        if merged.segments.is_empty() && had_voiced_chunks {
            bail!("no segments");
        }

        crate::merge::export::save_transcription(
            &merged,
            &output_dir.join("final_transcription.json"),
        )?;
        crate::merge::export::export_srt(&merged, &output_dir.join("transcription.srt"))?;

        report(
            &progress,
            Stage::Completed,
            100,
            "Processing complete".to_string(),
        );
        Ok(JobOutcome::Completed(merged))
    }
}
