//! Top-level orchestrator
//!
//! Owns job lifecycle from submission to artifact, wires the pipeline to
//! the governor and queue, and runs the two background loops: dispatch
//! (drains the queue through admission control) and monitor (heartbeat
//! plus completed-history eviction). A job-scope error marks that job
//! Failed and never takes the process down.

use crate::asr::cache::TranscriptionCache;
use crate::asr::engine::Transcriber;
use crate::asr::stage::TranscriberStage;
use crate::audio::chunker::AudioChunker;
use crate::audio::loader::AudioLoader;
use crate::diarization::engine::Diarizer;
use crate::merge::merger::TranscriptionMerger;
use crate::orchestrator::pipeline::{JobPipeline, ProgressSink};
use crate::orchestrator::types::{
    Job, JobOutcome, JobState, JobStatus, OrchestratorConfig, OrchestratorError, Stage,
};
use crate::resources::governor::ResourceGovernor;
use crate::resources::queue::JobQueue;
use crate::resources::types::{Admission, JobPriority, SystemStatus};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

type JobMap = Arc<RwLock<HashMap<Uuid, Arc<Mutex<Job>>>>>;
type CompletedHistory = Arc<Mutex<VecDeque<(Uuid, Instant)>>>;

/// How often a deferred admission is re-checked even without a signal.
const ADMISSION_RECHECK: Duration = Duration::from_millis(500);

pub struct Orchestrator {
    config: OrchestratorConfig,
    governor: Arc<ResourceGovernor>,
    queue: Arc<JobQueue>,
    jobs: JobMap,
    completed: CompletedHistory,
    pipeline: JobPipeline,
    loader: Arc<dyn AudioLoader>,
    shutdown: CancellationToken,
    started: AtomicBool,
    me: Weak<Orchestrator>,
}

impl Orchestrator {
    /// Wire the engine together. External collaborators (decoder,
    /// recognizer, diarizer) are injected behind their contracts.
    pub fn new(
        config: OrchestratorConfig,
        loader: Arc<dyn AudioLoader>,
        transcriber: Arc<dyn Transcriber>,
        diarizer: Arc<dyn Diarizer>,
    ) -> Arc<Self> {
        let governor = Arc::new(ResourceGovernor::new(config.limits.clone()));
        let queue = Arc::new(JobQueue::new());
        let cache = Arc::new(TranscriptionCache::new(config.transcriber.cache_capacity));
        let chunker = Arc::new(AudioChunker::new(config.chunker.clone()));
        let merger = Arc::new(TranscriptionMerger::new(config.merger.clone()));

        let transcriber_stage = TranscriberStage::new(
            transcriber,
            Arc::clone(&cache),
            config.transcriber.clone(),
            config.chunk_timeout,
        );

        let pipeline = JobPipeline::new(
            Arc::clone(&loader),
            chunker,
            transcriber_stage,
            diarizer,
            config.diarizer.clone(),
            merger,
            config.channel_capacity,
        );

        let jobs: JobMap = Arc::new(RwLock::new(HashMap::new()));
        let completed: CompletedHistory = Arc::new(Mutex::new(VecDeque::new()));

        // Under critical memory pressure: drop the completed-job history
        // and release the recognizer result cache.
        {
            let cache = Arc::clone(&cache);
            let jobs = Arc::clone(&jobs);
            let completed = Arc::clone(&completed);
            governor.register_cleanup_hook(Box::new(move || {
                cache.clear();
                let mut history = completed.lock().unwrap_or_else(|e| e.into_inner());
                let mut map = jobs.write().unwrap_or_else(|e| e.into_inner());
                for (job_id, _) in history.drain(..) {
                    map.remove(&job_id);
                }
            }));
        }

        Arc::new_cyclic(|me| Self {
            config,
            governor,
            queue,
            jobs,
            completed,
            pipeline,
            loader,
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    pub fn governor(&self) -> &Arc<ResourceGovernor> {
        &self.governor
    }

    /// Start the background loops. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(this) = self.me.upgrade() else {
            return;
        };
        info!("Starting orchestrator");

        Arc::clone(&self.governor).spawn_sampler(self.shutdown.child_token());

        let dispatcher = Arc::clone(&this);
        tokio::spawn(async move { dispatcher.dispatch_loop().await });

        tokio::spawn(async move { this.monitor_loop().await });
    }

    /// Validate and enqueue a job. Rejects synchronously when the file is
    /// missing or the estimated footprint could never be admitted.
    pub fn submit(
        &self,
        file_path: &Path,
        output_dir: &Path,
        priority: JobPriority,
    ) -> Result<Uuid, OrchestratorError> {
        if self.shutdown.is_cancelled() {
            return Err(OrchestratorError::ShuttingDown);
        }
        if !file_path.exists() {
            return Err(OrchestratorError::FileNotFound {
                path: file_path.display().to_string(),
            });
        }

        let audio_duration = self.loader.probe_duration(file_path)?;
        let (estimated_memory_gb, estimated_minutes) =
            self.config.estimate.estimate(audio_duration);
        self.governor.validate_estimate(estimated_memory_gb)?;

        let job = Job::new(
            file_path.to_path_buf(),
            output_dir.to_path_buf(),
            priority,
            estimated_memory_gb,
            estimated_minutes,
            audio_duration,
        );
        let job_id = job.id;

        info!(
            "Job {} submitted ({:.1}min audio, est {:.1}GB, {:?})",
            job_id,
            audio_duration / 60.0,
            estimated_memory_gb,
            priority
        );

        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id, Arc::new(Mutex::new(job)));
        self.queue.push(job_id, priority);
        Ok(job_id)
    }

    /// Snapshot a job's status.
    pub fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.get(&job_id)
            .map(|job| job.lock().unwrap_or_else(|e| e.into_inner()).snapshot())
    }

    /// Request cancellation. Pending jobs cancel immediately; running
    /// jobs observe the token at the next stage boundary.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let job = {
            let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
            jobs.get(&job_id).cloned()
        };
        let Some(job) = job else {
            return false;
        };

        let mut job = job.lock().unwrap_or_else(|e| e.into_inner());
        if job.state.is_terminal() {
            return false;
        }
        job.cancel.cancel();
        if job.state == JobState::Pending {
            job.state = JobState::Cancelled;
            job.finished_at = Some(Utc::now());
            self.record_completed(job_id);
        }
        info!("Job {} cancellation requested", job_id);
        true
    }

    /// System-wide snapshot: resource readings plus job counts.
    pub fn system_status(&self) -> SystemStatus {
        let completed = self
            .completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        self.governor.system_status(self.queue.len(), completed)
    }

    /// Poll a job until it reaches a terminal state.
    pub async fn wait_for(&self, job_id: Uuid) -> Option<JobStatus> {
        loop {
            let status = self.status(job_id)?;
            if status.state.is_terminal() {
                return Some(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Stop the background loops. Running jobs finish on their own.
    pub fn shutdown(&self) {
        info!("Shutting down orchestrator");
        self.shutdown.cancel();
        self.queue.close();
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            let Some(job_id) = self.queue.pop(&self.shutdown).await else {
                break;
            };

            let job = {
                let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
                jobs.get(&job_id).cloned()
            };
            let Some(job) = job else { continue };

            let (estimated_memory_gb, priority, cancelled) = {
                let job = job.lock().unwrap_or_else(|e| e.into_inner());
                (
                    job.estimated_memory_gb,
                    job.priority,
                    job.state != JobState::Pending,
                )
            };
            if cancelled {
                continue;
            }

            match self.governor.admit(estimated_memory_gb) {
                Admission::Admitted => {
                    {
                        let mut job = job.lock().unwrap_or_else(|e| e.into_inner());
                        job.state = JobState::Admitted;
                        job.update_progress(Stage::Chunking, 5, "Job admitted".to_string());
                    }
                    self.governor.on_start(job_id, estimated_memory_gb);
                    {
                        let mut job = job.lock().unwrap_or_else(|e| e.into_inner());
                        job.state = JobState::Running;
                        job.started_at = Some(Utc::now());
                    }

                    let runner = Arc::clone(&self);
                    tokio::spawn(async move { runner.process_job(job_id, job).await });
                }
                Admission::Deferred => {
                    // The job stays queued at the front of its class and
                    // is re-checked when capacity may have changed.
                    self.queue.push_front(job_id, priority);
                    let _ = tokio::time::timeout(
                        ADMISSION_RECHECK,
                        self.governor.wait_admission_change(),
                    )
                    .await;
                }
            }
        }
    }

    async fn process_job(self: Arc<Self>, job_id: Uuid, job: Arc<Mutex<Job>>) {
        let (file_path, output_dir, cancel, audio_secs) = {
            let job = job.lock().unwrap_or_else(|e| e.into_inner());
            (
                job.file_path.clone(),
                job.output_dir.clone(),
                job.cancel.clone(),
                job.audio_duration_secs,
            )
        };

        let progress: ProgressSink = {
            let job = Arc::clone(&job);
            Arc::new(move |stage, percent, message| {
                let mut job = job.lock().unwrap_or_else(|e| e.into_inner());
                job.update_progress(stage, percent, message);
            })
        };

        let run = self
            .pipeline
            .run(job_id, &file_path, &output_dir, cancel, progress);
        let outcome = match self.config.job_timeout.timeout_for(audio_secs) {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => Err(anyhow::anyhow!(
                    "job timed out after {}s",
                    limit.as_secs()
                )),
            },
            None => run.await,
        };

        match outcome {
            Ok(JobOutcome::Completed(merged)) => {
                {
                    let mut job = job.lock().unwrap_or_else(|e| e.into_inner());
                    job.state = JobState::Completed;
                    job.finished_at = Some(Utc::now());
                }
                info!(
                    "Job {} completed ({} segments, {} speakers)",
                    job_id,
                    merged.segments.len(),
                    merged.speakers.len()
                );
                self.governor.on_finish(job_id, true, None);
            }
            Ok(JobOutcome::Cancelled) => {
                {
                    let mut job = job.lock().unwrap_or_else(|e| e.into_inner());
                    job.state = JobState::Cancelled;
                    job.finished_at = Some(Utc::now());
                }
                self.governor.on_finish(job_id, false, Some("job cancelled"));
            }
            Err(e) => {
                let message = e.to_string();
                {
                    let mut job = job.lock().unwrap_or_else(|e| e.into_inner());
                    job.state = JobState::Failed;
                    job.finished_at = Some(Utc::now());
                    job.error = Some(message.clone());
                    let percent = job.progress.percent;
                    job.update_progress(Stage::Failed, percent, message.clone());
                }
                warn!("Job {} failed: {}", job_id, message);
                self.governor.on_finish(job_id, false, Some(&message));
            }
        }

        self.record_completed(job_id);
    }

    fn record_completed(&self, job_id: Uuid) {
        self.completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back((job_id, Instant::now()));
    }

    async fn monitor_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.monitor_interval_secs.max(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.cancelled() => break,
            }

            let status = self.system_status();
            info!(
                "System status: {} running, {} queued, {} completed, {:.2}GB memory",
                status.jobs.running,
                status.jobs.queued,
                status.jobs.completed,
                status.memory.used_gb
            );

            self.evict_history();
        }
    }

    /// Drop completed jobs past the retention window, capping retained
    /// history at the configured size.
    fn evict_history(&self) {
        let cutoff = Duration::from_secs(self.config.history_retention_minutes * 60);
        let now = Instant::now();

        let mut evicted = Vec::new();
        {
            let mut history = self.completed.lock().unwrap_or_else(|e| e.into_inner());
            while let Some((job_id, finished)) = history.front().copied() {
                let too_old = now.duration_since(finished) > cutoff;
                let over_cap = history.len() > self.config.history_cap;
                if too_old || over_cap {
                    history.pop_front();
                    evicted.push(job_id);
                } else {
                    break;
                }
            }
        }

        if !evicted.is_empty() {
            let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
            for job_id in &evicted {
                jobs.remove(job_id);
            }
            info!("Evicted {} completed jobs from history", evicted.len());
        }
    }
}
