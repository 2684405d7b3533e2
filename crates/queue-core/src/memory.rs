//! In-process [`JobStore`] for single-process deployments without a database.
//!
//! Claim atomicity comes from the store mutex, so this backend is only safe
//! when every worker lives in the same process.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    Job, JobId, JobStatus, JobStore, NewJob, QueueError, QueueStats, ResourceContext, StatusStats,
};

struct Slot {
    /// Insertion order; ties on `created_at` are common at this resolution.
    seq: u64,
    job: Job,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    jobs: HashMap<JobId, Slot>,
    pending: BTreeSet<(u64, JobId)>,
}

impl Inner {
    fn settle_failure(&mut self, id: JobId, error: String, now: DateTime<Utc>) -> Option<JobStatus> {
        let slot = self.jobs.get_mut(&id)?;
        let job = &mut slot.job;
        if job.status != JobStatus::Processing {
            return None;
        }

        job.status = if job.attempts < job.max_attempts {
            JobStatus::Pending
        } else {
            JobStatus::Dead
        };
        job.last_error = Some(error);
        job.worker_id = None;
        job.processing_started_at = None;
        job.updated_at = now;

        if job.status == JobStatus::Pending {
            self.pending.insert((slot.seq, id));
        }
        Some(job.status)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cutoff(older_than: Duration) -> Result<DateTime<Utc>, QueueError> {
    let span = chrono::Duration::from_std(older_than)
        .map_err(|e| QueueError::Configuration(format!("duration out of range: {e}")))?;
    Ok(Utc::now() - span)
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn enqueue(&self, new: NewJob) -> Result<JobId, QueueError> {
        let max_attempts = new.resolved_max_attempts()?;
        let id = Uuid::new_v4();
        let now = Utc::now();

        let job = Job {
            id,
            payload: new.payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            last_error: None,
            submitted: new.submitted,
            processed: None,
            created_at: now,
            updated_at: now,
            processing_started_at: None,
            completed_at: None,
            worker_id: None,
            result: None,
        };

        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(id, Slot { seq, job });
        inner.pending.insert((seq, id));
        tracing::debug!(job_id=%id, "enqueued job in memory");
        Ok(id)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        let mut inner = self.inner.lock().await;
        let Some((_, id)) = inner.pending.pop_first() else {
            return Ok(None);
        };

        let slot = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| QueueError::Internal(format!("pending index references {id}")))?;
        let now = Utc::now();
        let job = &mut slot.job;
        job.status = JobStatus::Processing;
        job.attempts += 1;
        job.processing_started_at = Some(now);
        job.worker_id = Some(worker_id.to_string());
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn complete(
        &self,
        id: JobId,
        result: serde_json::Value,
        processed: ResourceContext,
    ) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        let Some(slot) = inner.jobs.get_mut(&id) else {
            return Ok(false);
        };
        let job = &mut slot.job;
        if job.status != JobStatus::Processing {
            return Ok(false);
        }

        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.result = Some(result);
        job.processed = Some(processed);
        job.last_error = None;
        job.completed_at = Some(now);
        job.processing_started_at = None;
        job.worker_id = None;
        job.updated_at = now;
        Ok(true)
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<Option<JobStatus>, QueueError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.settle_failure(id, error.to_string(), Utc::now()))
    }

    async fn recover_stale(&self, timeout: Duration) -> Result<u64, QueueError> {
        let cutoff = cutoff(timeout)?;
        let mut inner = self.inner.lock().await;

        let stale: Vec<(JobId, String)> = inner
            .jobs
            .values()
            .map(|slot| &slot.job)
            .filter(|job| job.status == JobStatus::Processing)
            .filter(|job| job.processing_started_at.is_some_and(|t| t < cutoff))
            .map(|job| (job.id, job.worker_id.clone().unwrap_or_default()))
            .collect();

        let now = Utc::now();
        let mut recovered = 0;
        for (id, worker_id) in stale {
            let error = format!("processing timed out (worker {worker_id})");
            if inner.settle_failure(id, error, now).is_some() {
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn pending_count(&self) -> Result<i64, QueueError> {
        Ok(self.inner.lock().await.pending.len() as i64)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(&id).map(|slot| slot.job.clone()))
    }

    async fn list_recent(
        &self,
        limit: i64,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, QueueError> {
        let inner = self.inner.lock().await;
        let mut slots: Vec<&Slot> = inner
            .jobs
            .values()
            .filter(|slot| status.is_none_or(|s| slot.job.status == s))
            .collect();
        slots.sort_by(|a, b| b.seq.cmp(&a.seq));
        Ok(slots
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|slot| slot.job.clone())
            .collect())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let inner = self.inner.lock().await;
        let mut stats = QueueStats::default();

        for status in JobStatus::ALL {
            let jobs: Vec<&Job> = inner
                .jobs
                .values()
                .map(|slot| &slot.job)
                .filter(|job| job.status == status)
                .collect();
            if jobs.is_empty() {
                continue;
            }

            let count = jobs.len() as i64;
            let attempts: i64 = jobs.iter().map(|job| job.attempts as i64).sum();
            stats.by_status.push((
                status,
                StatusStats {
                    count,
                    oldest: jobs.iter().map(|job| job.created_at).min(),
                    newest: jobs.iter().map(|job| job.created_at).max(),
                    avg_attempts: attempts as f64 / count as f64,
                },
            ));
            stats.total += count;
        }
        Ok(stats)
    }

    async fn purge_completed(&self, older_than: Duration) -> Result<u64, QueueError> {
        let cutoff = cutoff(older_than)?;
        let mut inner = self.inner.lock().await;
        let before = inner.jobs.len();
        inner.jobs.retain(|_, slot| {
            !(slot.job.status == JobStatus::Completed
                && slot.job.completed_at.is_some_and(|t| t < cutoff))
        });
        Ok((before - inner.jobs.len()) as u64)
    }

    async fn delete(&self, id: JobId) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let slot = inner.jobs.remove(&id).ok_or(QueueError::NotFound)?;
        inner.pending.remove(&(slot.seq, id));
        Ok(())
    }

    async fn retry_dead(&self, id: JobId) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .jobs
            .get_mut(&id)
            .filter(|slot| slot.job.status == JobStatus::Dead)
            .ok_or(QueueError::NotFound)?;

        let job = &mut slot.job;
        job.status = JobStatus::Pending;
        job.attempts = 0;
        job.last_error = None;
        job.processing_started_at = None;
        job.worker_id = None;
        job.updated_at = Utc::now();
        let key = (slot.seq, id);
        inner.pending.insert(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::Tier;

    fn new_job(payload: &str, max_attempts: i32) -> NewJob {
        NewJob::new(payload, ResourceContext::capture(None, Tier::Eco))
            .with_max_attempts(max_attempts)
    }

    fn processed() -> ResourceContext {
        ResourceContext::capture(None, Tier::Large)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_hand_out_a_single_job_once() {
        let store = MemoryStore::new();
        let id = store.enqueue(new_job("only", 3)).await.unwrap();

        let mut handles = Vec::new();
        for n in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim(&format!("w{n}")).await.unwrap()
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            if let Some(job) = handle.await.unwrap() {
                winners.push(job);
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].id, id);
        assert_eq!(winners[0].attempts, 1);
    }

    #[tokio::test]
    async fn claim_is_oldest_first_and_stamps_worker() {
        let store = MemoryStore::new();
        let first = store.enqueue(new_job("a", 3)).await.unwrap();
        let second = store.enqueue(new_job("b", 3)).await.unwrap();

        let job = store.claim("w1").await.unwrap().unwrap();
        assert_eq!(job.id, first);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.worker_id.as_deref(), Some("w1"));
        assert!(job.processing_started_at.is_some());

        assert_eq!(store.claim("w2").await.unwrap().unwrap().id, second);
        assert!(store.claim("w3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn always_failing_job_dies_after_max_attempts() {
        let store = MemoryStore::new();
        let id = store.enqueue(new_job("boom", 3)).await.unwrap();

        let mut last_attempts = 0;
        for expected in [JobStatus::Pending, JobStatus::Pending, JobStatus::Dead] {
            let job = store.claim("w").await.unwrap().unwrap();
            assert_eq!(job.attempts, last_attempts + 1);
            last_attempts = job.attempts;
            assert_eq!(store.fail(id, "boom").await.unwrap(), Some(expected));
        }

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Dead);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.last_error.as_deref(), Some("boom"));
        assert!(job.worker_id.is_none());
        assert!(job.processing_started_at.is_none());
        assert!(store.claim("w").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_job_is_retried_then_completes() {
        let store = MemoryStore::new();
        let id = store.enqueue(new_job("flaky", 3)).await.unwrap();

        store.claim("w").await.unwrap().unwrap();
        assert_eq!(
            store.fail(id, "transient").await.unwrap(),
            Some(JobStatus::Pending)
        );
        assert_eq!(store.pending_count().await.unwrap(), 1);

        let job = store.claim("w").await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.last_error.as_deref(), Some("transient"));

        assert!(store.complete(id, json!({"ok": true}), processed()).await.unwrap());
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"ok": true})));
        assert_eq!(job.processed.and_then(|p| p.tier), Some(Tier::Large));
        assert!(job.completed_at.is_some());
        assert!(job.worker_id.is_none());
    }

    #[tokio::test]
    async fn second_completion_is_a_no_op() {
        let store = MemoryStore::new();
        let id = store.enqueue(new_job("x", 3)).await.unwrap();
        store.claim("w").await.unwrap();

        assert!(store.complete(id, json!(1), processed()).await.unwrap());
        assert!(!store.complete(id, json!(2), processed()).await.unwrap());
        assert_eq!(store.get(id).await.unwrap().unwrap().result, Some(json!(1)));
        assert_eq!(store.fail(id, "late").await.unwrap(), None);
    }

    #[tokio::test]
    async fn stale_processing_jobs_are_reclaimed() {
        let store = MemoryStore::new();
        let retry = store.enqueue(new_job("retry", 3)).await.unwrap();
        let last = store.enqueue(new_job("last", 1)).await.unwrap();
        store.claim("w1").await.unwrap();
        store.claim("w2").await.unwrap();

        assert_eq!(store.recover_stale(Duration::from_secs(60)).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.recover_stale(Duration::from_millis(5)).await.unwrap(), 2);

        let job = store.get(retry).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.worker_id.is_none());
        assert!(job.processing_started_at.is_none());
        assert_eq!(
            job.last_error.as_deref(),
            Some("processing timed out (worker w1)")
        );

        let job = store.get(last).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Dead);

        // The first holder reports late; the job has moved on.
        assert!(!store.complete(retry, json!(null), processed()).await.unwrap());
    }

    #[tokio::test]
    async fn purge_removes_only_old_completed_jobs() {
        let store = MemoryStore::new();
        let old = store.enqueue(new_job("old", 3)).await.unwrap();
        let dead = store.enqueue(new_job("dead", 1)).await.unwrap();
        store.claim("w").await.unwrap();
        store.complete(old, json!(null), processed()).await.unwrap();
        store.claim("w").await.unwrap();
        store.fail(dead, "boom").await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        let fresh = store.enqueue(new_job("fresh", 3)).await.unwrap();
        let pending = store.enqueue(new_job("pending", 3)).await.unwrap();
        store.claim("w").await.unwrap();
        store.complete(fresh, json!(null), processed()).await.unwrap();

        assert_eq!(store.purge_completed(Duration::from_secs(86_400)).await.unwrap(), 0);
        assert_eq!(store.purge_completed(Duration::from_millis(20)).await.unwrap(), 1);

        assert!(store.get(old).await.unwrap().is_none());
        assert!(store.get(fresh).await.unwrap().is_some());
        assert!(store.get(dead).await.unwrap().is_some());
        assert!(store.get(pending).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn retry_dead_resets_attempts() {
        let store = MemoryStore::new();
        let id = store.enqueue(new_job("x", 1)).await.unwrap();

        assert!(matches!(store.retry_dead(id).await, Err(QueueError::NotFound)));

        store.claim("w").await.unwrap();
        store.fail(id, "boom").await.unwrap();
        store.retry_dead(id).await.unwrap();

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.last_error.is_none());
        assert_eq!(store.claim("w").await.unwrap().unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn delete_unindexes_pending_job() {
        let store = MemoryStore::new();
        let id = store.enqueue(new_job("x", 3)).await.unwrap();
        store.delete(id).await.unwrap();

        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert!(store.claim("w").await.unwrap().is_none());
        assert!(matches!(store.delete(id).await, Err(QueueError::NotFound)));
    }

    #[tokio::test]
    async fn stats_and_listing_group_by_status() {
        let store = MemoryStore::new();
        let a = store.enqueue(new_job("a", 3)).await.unwrap();
        let b = store.enqueue(new_job("b", 1)).await.unwrap();
        store.enqueue(new_job("c", 3)).await.unwrap();
        store.claim("w").await.unwrap();
        store.complete(a, json!(null), processed()).await.unwrap();
        store.claim("w").await.unwrap();
        store.fail(b, "boom").await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.count(JobStatus::Pending), 1);
        assert_eq!(stats.count(JobStatus::Completed), 1);
        assert_eq!(stats.count(JobStatus::Dead), 1);
        assert_eq!(stats.count(JobStatus::Processing), 0);

        let recent = store.list_recent(2, None).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].payload, "c");

        let dead = store.list_dead(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, b);
    }

    #[tokio::test]
    async fn enqueue_rejects_non_positive_max_attempts() {
        let store = MemoryStore::new();
        let err = store.enqueue(new_job("x", 0)).await.unwrap_err();
        assert!(matches!(err, QueueError::Configuration(_)));
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }
}
