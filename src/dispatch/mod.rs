//! Dispatch engine: job orchestration, cancellation, finalization
//!
//! The engine owns a job's cancellation signal, runs the mode executor for
//! it, and guarantees that a stop request reaches a terminal state within a
//! bounded window. Shutdown is two-phase: the cancellation signal asks the
//! work loop to exit at its next checkpoint (Running → Stopping), and a
//! hard deadline after the grace period abandons whatever is still in
//! flight before the job is finalized (→ Stopped). The scheduling model
//! cannot interrupt a single network call safely, so the forced phase never
//! fires while cooperative checkpoints are being honored.

pub mod modes;
pub mod report;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::health::AccountHealthMonitor;
use crate::metrics;
use crate::models::{ExecMode, FinalReport, Job, JobStatus, ProgressSnapshot};
use crate::sender::MessageSender;
use crate::storage::{JobRepository, Stores, TargetRepository};
use crate::utils::delay::DelayPolicy;

use modes::{ModeContext, ModeSummary};

/// Default wait for in-flight attempts after a stop request
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Handle to one running job
pub struct JobHandle {
    /// The job this handle controls
    pub job_id: String,

    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Wait for the run to finish on its own
    pub async fn wait(self) {
        let _ = self.task.await;
    }

    /// Whether the run task has already finished
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Top-level orchestrator for dispatch jobs
pub struct DispatchEngine {
    stores: Stores,
    sender: Arc<MessageSender>,
    health: Arc<AccountHealthMonitor>,
    grace_period: Duration,
    // Stop reasons are advisory runtime state, not part of the persisted
    // job record
    stop_reasons: Arc<Mutex<HashMap<String, String>>>,
}

impl DispatchEngine {
    pub fn new(
        stores: Stores,
        sender: Arc<MessageSender>,
        health: Arc<AccountHealthMonitor>,
    ) -> Self {
        Self {
            stores,
            sender,
            health,
            grace_period: DEFAULT_GRACE_PERIOD,
            stop_reasons: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Override the stop grace period
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Start a pending job.
    ///
    /// Degenerate jobs finish synchronously: an empty target or account
    /// list completes with zero attempts, and a pool with zero Active
    /// accounts stops before the first attempt.
    pub async fn start(&self, job_id: &str) -> Result<JobHandle> {
        let job = self
            .stores
            .jobs
            .get_job(job_id)?
            .with_context(|| format!("Job not found: {job_id}"))?;

        if job.status != JobStatus::Pending {
            anyhow::bail!("Job {} is {}, only pending jobs can start", job_id, job.status);
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);

        if job.target_ids.is_empty() || job.account_ids.is_empty() {
            info!(job_id, "Nothing to do, completing with zero attempts");
            self.stores.jobs.update_status(job_id, JobStatus::Completed)?;
            metrics::job_finished(JobStatus::Completed.as_str());
            return Ok(JobHandle {
                job_id: job_id.to_string(),
                cancel: cancel_tx,
                task: tokio::spawn(async {}),
            });
        }

        if let Some(reason) = self.health.should_stop_job(&job) {
            info!(job_id, %reason, "No usable accounts at start");
            self.record_stop_reason(job_id, reason.to_string());
            self.stores.jobs.update_status(job_id, JobStatus::Stopped)?;
            metrics::job_finished(JobStatus::Stopped.as_str());
            return Ok(JobHandle {
                job_id: job_id.to_string(),
                cancel: cancel_tx,
                task: tokio::spawn(async {}),
            });
        }

        let job = self.stores.jobs.update_status(job_id, JobStatus::Running)?;
        info!(
            job_id,
            mode = %job.mode,
            targets = job.target_ids.len(),
            accounts = job.account_ids.len(),
            "Job started"
        );

        let mut ctx = ModeContext {
            delay: Arc::new(DelayPolicy::new(job.min_delay_secs, job.max_delay_secs)),
            job,
            stores: self.stores.clone(),
            sender: self.sender.clone(),
            health: self.health.clone(),
            cancel: cancel_rx,
        };

        let stores = self.stores.clone();
        let stop_reasons = self.stop_reasons.clone();
        let job_id_owned = job_id.to_string();

        let task = tokio::spawn(async move {
            let mode = ctx.job.mode;
            let summary = match mode {
                ExecMode::Normal => modes::normal::run(&mut ctx).await,
                ExecMode::RepeatSend => modes::repeat::run(&mut ctx).await,
                ExecMode::ForceSend => modes::force::run(&mut ctx).await,
            };

            let final_status = match summary {
                Ok(ModeSummary {
                    stop_reason: Some(reason),
                    ..
                }) => {
                    stop_reasons
                        .lock()
                        .unwrap()
                        .insert(job_id_owned.clone(), reason.to_string());
                    JobStatus::Stopped
                }
                Ok(summary) if summary.cancelled => JobStatus::Stopped,
                Ok(_) => JobStatus::Completed,
                Err(e) => {
                    error!(job_id = %job_id_owned, error = %e, "Mode executor failed");
                    JobStatus::Failed
                }
            };

            match stores.jobs.update_status(&job_id_owned, final_status) {
                Ok(_) => {
                    metrics::job_finished(final_status.as_str());
                    info!(job_id = %job_id_owned, status = %final_status, "Job finalized");
                }
                Err(e) => warn!(job_id = %job_id_owned, error = %e, "Failed to finalize job"),
            }
        });

        Ok(JobHandle {
            job_id: job_id.to_string(),
            cancel: cancel_tx,
            task,
        })
    }

    /// Stop a running job within a bounded window.
    ///
    /// Phase one sets the cancellation signal and waits the grace period
    /// for the work loop to exit at a checkpoint; phase two aborts the run
    /// task outright and finalizes the job state. No new attempts start
    /// once the signal is observed.
    pub async fn stop(&self, handle: JobHandle) -> Result<FinalReport> {
        let job_id = handle.job_id;
        info!(job_id = %job_id, "Stop requested");

        // Already finished jobs just need their report
        if !handle.task.is_finished() {
            // The transition may legitimately fail if the run finalized
            // concurrently; the cancellation signal is what matters
            let _ = self.stores.jobs.update_status(&job_id, JobStatus::Stopping);
        }
        let _ = handle.cancel.send(true);

        let mut task = handle.task;
        match tokio::time::timeout(self.grace_period, &mut task).await {
            Ok(_) => {}
            Err(_) => {
                warn!(job_id = %job_id, grace_secs = self.grace_period.as_secs(), "Grace period expired, aborting in-flight work");
                task.abort();
                let _ = task.await;
            }
        }

        let job = self
            .stores
            .jobs
            .get_job(&job_id)?
            .with_context(|| format!("Job not found: {job_id}"))?;
        if !job.status.is_terminal() {
            self.stores.jobs.update_status(&job_id, JobStatus::Stopped)?;
            metrics::job_finished(JobStatus::Stopped.as_str());
        }

        self.final_report(&job_id)
    }

    /// Current progress, read from persisted state
    pub fn progress(&self, job_id: &str) -> Result<ProgressSnapshot> {
        let job = self
            .stores
            .jobs
            .get_job(job_id)?
            .with_context(|| format!("Job not found: {job_id}"))?;

        Ok(ProgressSnapshot {
            job_id: job.id.clone(),
            status: job.status,
            sent: job.sent_count,
            failed: job.failed_count,
            total: job.total_targets,
            elapsed_secs: report::elapsed_secs(&job),
        })
    }

    /// Structured end-of-job report
    pub fn final_report(&self, job_id: &str) -> Result<FinalReport> {
        let job = self
            .stores
            .jobs
            .get_job(job_id)?
            .with_context(|| format!("Job not found: {job_id}"))?;
        let stop_reason = self.stop_reasons.lock().unwrap().get(job_id).cloned();
        report::build_report(&self.stores, &job, stop_reason)
    }

    /// Register a job and its targets in one step
    pub fn create_job(&self, job: &Job) -> Result<()> {
        let targets: Vec<crate::models::Target> = job
            .target_ids
            .iter()
            .map(|id| crate::models::Target::new(&job.id, id))
            .collect();
        self.stores.jobs.insert_job(job)?;
        self.stores.targets.insert_targets(&targets)?;
        Ok(())
    }

    fn record_stop_reason(&self, job_id: &str, reason: String) {
        self.stop_reasons
            .lock()
            .unwrap()
            .insert(job_id.to_string(), reason);
    }
}
