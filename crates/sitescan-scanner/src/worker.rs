//! Polls a [`JobQueue`] and hands jobs to the orchestrator.
//!
//! A job whose orchestration fails with a retryable error goes back to the
//! queue; the record stays `in-progress` meanwhile. Once the queue reports the
//! attempts exhausted, or the error is not retryable, the record is moved to
//! `failed`.

use crate::error::{OrchestrationError, Result};
use crate::orchestrator::{AnalysisOrchestrator, ProcessOutcome};
use futures::future::join_all;
use sitescan_core::WorkerConfig;
use sitescan_queue::{Job, JobQueue, RetryDecision};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Polling behaviour.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Run a batch concurrently instead of one job after another
    pub parallel: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

impl WorkerSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            batch_size: config.batch_size.max(1),
            parallel: config.parallel,
        }
    }
}

/// Consumes jobs until cancelled.
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    orchestrator: Arc<AnalysisOrchestrator>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        orchestrator: Arc<AnalysisOrchestrator>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            settings,
        }
    }

    /// Fail analyses whose final delivery was lost, then dequeue up to one
    /// batch and process it. Returns the number of jobs taken.
    pub async fn tick(&self) -> Result<usize> {
        self.fail_abandoned().await?;

        let mut batch = Vec::with_capacity(self.settings.batch_size);
        while batch.len() < self.settings.batch_size {
            match self.queue.dequeue().await? {
                Some(job) => batch.push(job),
                None => break,
            }
        }

        let taken = batch.len();
        if taken == 0 {
            return Ok(0);
        }
        debug!(jobs = taken, parallel = self.settings.parallel, "Processing batch");

        if self.settings.parallel {
            for outcome in join_all(batch.into_iter().map(|job| self.handle(job))).await {
                outcome?;
            }
        } else {
            for job in batch {
                self.handle(job).await?;
            }
        }
        Ok(taken)
    }

    /// Poll until `shutdown` fires. A batch in flight is finished first.
    pub async fn run_until(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            poll_interval_ms = self.settings.poll_interval.as_millis(),
            batch_size = self.settings.batch_size,
            "Worker started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Worker tick failed");
                    }
                }
            }
        }
        info!("Worker stopped");
    }

    /// Jobs whose worker died on their last attempt never come back through
    /// `dequeue`; their records would otherwise stay `in-progress`.
    async fn fail_abandoned(&self) -> Result<()> {
        for job in self.queue.reap_exhausted().await? {
            warn!(
                analysis_id = %job.analysis_id,
                attempts = job.attempt_count,
                "Analysis abandoned after its final attempt was interrupted"
            );
            let message = format!(
                "analysis abandoned after {} interrupted attempts",
                job.attempt_count
            );
            self.orchestrator.fail(&job.analysis_id, &message).await?;
        }
        Ok(())
    }

    async fn handle(&self, job: Job) -> Result<()> {
        match self.orchestrator.process(&job).await {
            Ok(ProcessOutcome::Completed { errors, .. }) => {
                debug!(job_id = %job.id, errors, "Job done");
                self.queue.complete(&job).await?;
            }
            Ok(ProcessOutcome::Skipped { status, .. }) => {
                debug!(job_id = %job.id, %status, "Job redelivered for finished analysis");
                self.queue.complete(&job).await?;
            }
            Err(e) if e.is_retryable() => self.retry(job, &e).await?,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Job failed permanently");
                self.orchestrator.fail(&job.analysis_id, &e.to_string()).await?;
                self.queue.complete(&job).await?;
            }
        }
        Ok(())
    }

    async fn retry(&self, job: Job, cause: &OrchestrationError) -> Result<()> {
        let analysis_id = job.analysis_id.clone();
        let attempt = job.attempt_count;
        match self.queue.retry(job).await? {
            RetryDecision::Scheduled { attempt: next, delay } => {
                warn!(
                    analysis_id = %analysis_id,
                    attempt,
                    next_attempt = next,
                    ?delay,
                    error = %cause,
                    "Analysis attempt failed, retrying"
                );
            }
            RetryDecision::Exhausted { attempts } => {
                warn!(analysis_id = %analysis_id, attempts, error = %cause, "Retries exhausted");
                self.orchestrator.fail(&analysis_id, &cause.to_string()).await?;
            }
        }
        Ok(())
    }
}
