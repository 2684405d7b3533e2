use std::time::Duration;

use async_trait::async_trait;

use crate::{Job, JobId, JobStatus, NewJob, QueueError, QueueStats, ResourceContext};

/// Persistence for jobs.
///
/// `claim`, `complete`, `fail` and `recover_stale` must each be atomic with
/// respect to concurrent callers in other processes; implementations may not
/// rely on in-process locking for that.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn enqueue(&self, job: NewJob) -> Result<JobId, QueueError>;

    /// Move the oldest `pending` job to `processing` for `worker_id`.
    /// Returns `None` without blocking when nothing is claimable.
    async fn claim(&self, worker_id: &str) -> Result<Option<Job>, QueueError>;

    /// `processing` -> `completed`. Returns `false` if the job was not
    /// `processing` (already completed, or reclaimed as stale).
    async fn complete(
        &self,
        id: JobId,
        result: serde_json::Value,
        processed: ResourceContext,
    ) -> Result<bool, QueueError>;

    /// `processing` -> `pending` while attempts remain, otherwise `dead`.
    /// Returns `None` if the job was not `processing`.
    async fn fail(&self, id: JobId, error: &str) -> Result<Option<JobStatus>, QueueError>;

    /// Routes every job `processing` for longer than `timeout` through the
    /// same decision as [`JobStore::fail`]. Returns the number reclaimed.
    async fn recover_stale(&self, timeout: Duration) -> Result<u64, QueueError>;

    async fn pending_count(&self) -> Result<i64, QueueError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError>;

    /// Newest first.
    async fn list_recent(
        &self,
        limit: i64,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Hard-deletes `completed` jobs whose `completed_at` is older than `older_than`.
    async fn purge_completed(&self, older_than: Duration) -> Result<u64, QueueError>;

    async fn delete(&self, id: JobId) -> Result<(), QueueError>;

    /// Resets a `dead` job to `pending` with zero attempts.
    async fn retry_dead(&self, id: JobId) -> Result<(), QueueError>;

    async fn ping(&self) -> Result<(), QueueError>;

    async fn list_dead(&self, limit: i64) -> Result<Vec<Job>, QueueError> {
        self.list_recent(limit, Some(JobStatus::Dead)).await
    }
}
