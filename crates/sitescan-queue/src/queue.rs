//! The queue contract shared by every backend.

use crate::error::Result;
use crate::jobs::Job;
use crate::scheduler::RetryDecision;

/// Holds pending jobs between the request layer and the workers.
///
/// Delivery is at-least-once: `dequeue` claims a job and bumps its
/// `attempt_count`; the job stays owned by the queue until `complete` or an
/// exhausted `retry` removes it. A worker that dies between the two may see the
/// job again.
#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    /// Record a new job. Returns once the job is stored.
    async fn enqueue(&self, job: Job) -> Result<()>;

    /// Claim the oldest visible job, if any.
    async fn dequeue(&self) -> Result<Option<Job>>;

    /// Acknowledge a claimed job; it will not be delivered again.
    async fn complete(&self, job: &Job) -> Result<()>;

    /// Hand a claimed job back after a transient failure.
    async fn retry(&self, job: Job) -> Result<RetryDecision>;

    /// Remove and return claimed jobs whose lease ran out after their last
    /// permitted delivery. Their worker died without reporting back, so they
    /// will never be retried and their analyses must be failed by the caller.
    ///
    /// Backends without leases lose claimed jobs on a crash and have nothing to
    /// reap.
    async fn reap_exhausted(&self) -> Result<Vec<Job>> {
        Ok(Vec::new())
    }

    /// Jobs waiting or delayed (claimed jobs are not counted).
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
