//! In-process queue backends.
//!
//! `InMemoryQueue` is the degraded development mode: a plain FIFO list with no
//! durability and no retry. `BackoffQueue` keeps the same FIFO order for new
//! jobs but re-inserts failed ones after an exponential delay.

use crate::error::Result;
use crate::jobs::Job;
use crate::queue::JobQueue;
use crate::scheduler::{RetryDecision, RetryPolicy};
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// FIFO list without durability or retry.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    jobs: Mutex<VecDeque<Job>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, job: Job) -> Result<()> {
        debug!(job_id = %job.id, analysis_id = %job.analysis_id, "Enqueued job");
        self.jobs.lock().await.push_back(job);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Job>> {
        let mut job = self.jobs.lock().await.pop_front();
        if let Some(job) = job.as_mut() {
            job.attempt_count += 1;
        }
        Ok(job)
    }

    async fn complete(&self, _job: &Job) -> Result<()> {
        Ok(())
    }

    async fn retry(&self, job: Job) -> Result<RetryDecision> {
        warn!(job_id = %job.id, "In-memory queue does not retry, dropping job");
        Ok(RetryDecision::Exhausted {
            attempts: job.attempt_count,
        })
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.jobs.lock().await.len())
    }
}

#[derive(Debug, Default)]
struct BackoffState {
    ready: VecDeque<Job>,
    delayed: Vec<(Instant, Job)>,
}

impl BackoffState {
    /// Move every delayed job whose delay has elapsed onto the ready list,
    /// earliest deadline first.
    fn promote_due(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        self.delayed.sort_by_key(|(due, _)| *due);
        let split = self.delayed.partition_point(|(due, _)| *due <= now);
        for (_, job) in self.delayed.drain(..split) {
            self.ready.push_back(job);
        }
    }
}

/// In-process FIFO queue with bounded, delayed retries.
#[derive(Debug)]
pub struct BackoffQueue {
    state: Mutex<BackoffState>,
    policy: RetryPolicy,
}

impl BackoffQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(BackoffState::default()),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

#[async_trait::async_trait]
impl JobQueue for BackoffQueue {
    async fn enqueue(&self, job: Job) -> Result<()> {
        debug!(job_id = %job.id, analysis_id = %job.analysis_id, "Enqueued job");
        self.state.lock().await.ready.push_back(job);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Job>> {
        let mut state = self.state.lock().await;
        state.promote_due(Instant::now());
        let mut job = state.ready.pop_front();
        if let Some(job) = job.as_mut() {
            job.attempt_count += 1;
        }
        Ok(job)
    }

    async fn complete(&self, _job: &Job) -> Result<()> {
        Ok(())
    }

    async fn retry(&self, job: Job) -> Result<RetryDecision> {
        if self.policy.is_exhausted(job.attempt_count) {
            warn!(
                job_id = %job.id,
                attempts = job.attempt_count,
                "Job exhausted its attempts, abandoning"
            );
            return Ok(RetryDecision::Exhausted {
                attempts: job.attempt_count,
            });
        }

        let delay = self.policy.delay_for(job.attempt_count);
        let attempt = job.attempt_count + 1;
        debug!(job_id = %job.id, attempt, ?delay, "Scheduling job retry");
        self.state
            .lock()
            .await
            .delayed
            .push((Instant::now() + delay, job));

        Ok(RetryDecision::Scheduled { attempt, delay })
    }

    async fn len(&self) -> Result<usize> {
        let state = self.state.lock().await;
        Ok(state.ready.len() + state.delayed.len())
    }
}
