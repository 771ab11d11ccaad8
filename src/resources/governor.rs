//! Resource governor
//!
//! Tracks memory and CPU headroom, admits or defers jobs against static
//! ceilings, and emits pressure signals when sampled memory climbs past
//! the alert threshold. One internal lock guards admission, the running
//! set and statistics; the sampling loop runs in its own task.

use crate::resources::types::{
    Admission, CpuStatus, GovernorMetrics, JobCounts, MemoryStatus, ResourceError,
    ResourceLimits, SystemStatus,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use sysinfo::System;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type PressureCallback = Box<dyn Fn(f32) + Send + Sync>;
type CleanupHook = Box<dyn Fn() + Send + Sync>;

struct RunningJob {
    estimated_memory_gb: f32,
    started_at: Instant,
}

struct GovernorState {
    running: HashMap<Uuid, RunningJob>,
    sampled_memory_gb: f32,
    sampled_cpu_percent: f32,
    metrics: GovernorMetrics,
}

pub struct ResourceGovernor {
    limits: ResourceLimits,
    state: Mutex<GovernorState>,
    system: Mutex<System>,
    admission_changed: Notify,
    pressure_callbacks: Mutex<Vec<PressureCallback>>,
    cleanup_hooks: Mutex<Vec<CleanupHook>>,
}

impl ResourceGovernor {
    pub fn new(limits: ResourceLimits) -> Self {
        info!(
            "Initializing ResourceGovernor (max {:.0}GB, {} concurrent jobs)",
            limits.max_memory_gb, limits.max_concurrent_jobs
        );
        Self {
            limits,
            state: Mutex::new(GovernorState {
                running: HashMap::new(),
                sampled_memory_gb: 0.0,
                sampled_cpu_percent: 0.0,
                metrics: GovernorMetrics::default(),
            }),
            system: Mutex::new(System::new()),
            admission_changed: Notify::new(),
            pressure_callbacks: Mutex::new(Vec::new()),
            cleanup_hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Synchronous feasibility check used at submission. A job that could
    /// never fit is rejected outright instead of queueing forever.
    pub fn validate_estimate(&self, estimated_gb: f32) -> Result<(), ResourceError> {
        if estimated_gb > self.limits.max_memory_gb {
            return Err(ResourceError::InsufficientCapacity {
                estimated_gb,
                limit_gb: self.limits.max_memory_gb,
            });
        }
        Ok(())
    }

    /// Decide whether a queued job may start now.
    ///
    /// Admitted only when a concurrency slot is free and both the pledged
    /// memory of running jobs and the last sampled reading leave room for
    /// the estimate. While sampled memory sits above the alert threshold,
    /// new admissions are refused for the tick.
    pub fn admit(&self, estimated_gb: f32) -> Admission {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if state.running.len() >= self.limits.max_concurrent_jobs {
            debug!("Deferring admission: all concurrency slots busy");
            return Admission::Deferred;
        }

        let pledged: f32 = state
            .running
            .values()
            .map(|job| job.estimated_memory_gb)
            .sum();
        if pledged + estimated_gb > self.limits.max_memory_gb {
            debug!(
                "Deferring admission: pledged {:.1}GB + {:.1}GB exceeds {:.1}GB",
                pledged, estimated_gb, self.limits.max_memory_gb
            );
            return Admission::Deferred;
        }

        if state.sampled_memory_gb + estimated_gb > self.limits.max_memory_gb {
            debug!(
                "Deferring admission: sampled {:.1}GB leaves no headroom",
                state.sampled_memory_gb
            );
            return Admission::Deferred;
        }

        if state.sampled_memory_gb > self.limits.memory_alert_threshold_gb {
            warn!(
                "Deferring admission under memory pressure ({:.1}GB sampled)",
                state.sampled_memory_gb
            );
            return Admission::Deferred;
        }

        Admission::Admitted
    }

    /// Record a job entering the Running state.
    pub fn on_start(&self, job_id: Uuid, estimated_gb: f32) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.running.insert(
            job_id,
            RunningJob {
                estimated_memory_gb: estimated_gb,
                started_at: Instant::now(),
            },
        );
        info!("Job {} started ({:.1}GB pledged)", job_id, estimated_gb);
    }

    /// Record a job leaving the Running state and update statistics.
    pub fn on_finish(&self, job_id: Uuid, success: bool, error: Option<&str>) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(job) = state.running.remove(&job_id) {
                let minutes = job.started_at.elapsed().as_secs_f32() / 60.0;
                let processed = state.metrics.total_jobs_processed as f32;
                state.metrics.average_processing_minutes =
                    (state.metrics.average_processing_minutes * processed + minutes)
                        / (processed + 1.0);
            }
            state.metrics.total_jobs_processed += 1;
            if !success {
                state.metrics.jobs_failed += 1;
            }
        }

        match error {
            Some(message) => warn!("Job {} finished with error: {}", job_id, message),
            None => info!("Job {} finished (success: {})", job_id, success),
        }
        self.admission_changed.notify_waiters();
    }

    /// Wait until a finished job or a sampling tick may have freed capacity.
    pub async fn wait_admission_change(&self) {
        self.admission_changed.notified().await;
    }

    /// Take one resource sample and react to thresholds.
    ///
    /// Sampling problems are non-fatal; the previous reading is retained.
    pub fn sample_once(&self) {
        let (used_gb, cpu_percent) = {
            let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
            system.refresh_memory();
            system.refresh_cpu_usage();
            (
                system.used_memory() as f32 / 1024.0 / 1024.0 / 1024.0,
                system.global_cpu_info().cpu_usage(),
            )
        };

        let (alert, critical) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.sampled_memory_gb = used_gb;
            state.sampled_cpu_percent = cpu_percent;
            if used_gb > state.metrics.peak_memory_gb {
                state.metrics.peak_memory_gb = used_gb;
            }
            let alert = used_gb > self.limits.memory_alert_threshold_gb;
            if alert {
                state.metrics.memory_alerts += 1;
            }
            let running = state.running.len();
            debug!(
                "Resource sample: {:.2}GB memory, {:.1}% cpu, {} running",
                used_gb, cpu_percent, running
            );
            (alert, used_gb > self.limits.memory_critical_threshold_gb)
        };

        if alert {
            warn!("Memory above alert threshold ({:.2}GB)", used_gb);
            let callbacks = self
                .pressure_callbacks
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for callback in callbacks.iter() {
                callback(used_gb);
            }
        }

        if critical {
            self.emergency_cleanup();
        }

        self.admission_changed.notify_waiters();
    }

    /// Run the sampling loop until cancelled.
    pub fn spawn_sampler(
        self: std::sync::Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(self.limits.sampling_interval_secs.max(1));
        let governor = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sampler = std::sync::Arc::clone(&governor);
                        if let Err(e) =
                            tokio::task::spawn_blocking(move || sampler.sample_once()).await
                        {
                            error!("Resource sampling failed: {}", e);
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            debug!("Resource sampler stopped");
        })
    }

    /// Ask every registered component to release cacheable state.
    pub fn emergency_cleanup(&self) {
        warn!("Running emergency cleanup");
        let hooks = self.cleanup_hooks.lock().unwrap_or_else(|e| e.into_inner());
        for hook in hooks.iter() {
            hook();
        }
    }

    /// Invoked with the sampled memory reading whenever it exceeds the
    /// alert threshold.
    pub fn register_pressure_callback(&self, callback: PressureCallback) {
        self.pressure_callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }

    /// Invoked during emergency cleanup.
    pub fn register_cleanup_hook(&self, hook: CleanupHook) {
        self.cleanup_hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(hook);
    }

    pub fn running_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.running.len()
    }

    pub fn metrics(&self) -> GovernorMetrics {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.metrics.clone()
    }

    /// Snapshot of system readings and job counts.
    pub fn system_status(&self, queued: usize, completed: usize) -> SystemStatus {
        let (total_gb, available_gb, cpu_count) = {
            let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
            system.refresh_memory();
            (
                system.total_memory() as f32 / 1024.0 / 1024.0 / 1024.0,
                system.available_memory() as f32 / 1024.0 / 1024.0 / 1024.0,
                system.cpus().len(),
            )
        };

        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        SystemStatus {
            memory: MemoryStatus {
                total_gb,
                used_gb: state.sampled_memory_gb,
                available_gb,
                percent: if total_gb > 0.0 {
                    state.sampled_memory_gb / total_gb * 100.0
                } else {
                    0.0
                },
            },
            cpu: CpuStatus {
                percent: state.sampled_cpu_percent,
                count: cpu_count,
            },
            jobs: JobCounts {
                running: state.running.len(),
                queued,
                completed,
                max_concurrent: self.limits.max_concurrent_jobs,
            },
            metrics: state.metrics.clone(),
        }
    }
}
