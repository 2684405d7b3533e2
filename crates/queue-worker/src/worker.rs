use std::{sync::Arc, time::Duration};

use queue_core::{
    EnergyPolicy, JobId, JobProcessor, JobStatus, JobStore, QueueError, ResourceContext,
    StatusSource, Tier,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Outcome of a single worker iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Nothing pending.
    Idle,
    /// Work is pending but the policy says to wait.
    Deferred { pending: i64 },
    /// Another worker claimed the pending job first.
    Missed,
    Completed(JobId),
    Retrying(JobId),
    Dead(JobId),
    /// The job left `processing` before we reported (stale recovery got it).
    Lost(JobId),
}

impl Tick {
    /// Whether the worker should poll again immediately.
    pub fn did_work(&self) -> bool {
        !matches!(self, Tick::Idle | Tick::Deferred { .. } | Tick::Missed)
    }
}

pub struct QueueWorker {
    id: String,
    store: Arc<dyn JobStore>,
    signal: Arc<dyn StatusSource>,
    processor: Arc<dyn JobProcessor>,
    policy: EnergyPolicy,
    poll_interval: Duration,
    error_backoff: Duration,
}

impl QueueWorker {
    pub fn new(
        id: impl Into<String>,
        store: Arc<dyn JobStore>,
        signal: Arc<dyn StatusSource>,
        processor: Arc<dyn JobProcessor>,
        policy: EnergyPolicy,
    ) -> Self {
        Self {
            id: id.into(),
            store,
            signal,
            processor,
            policy,
            poll_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(10),
        }
    }

    pub fn with_intervals(mut self, poll_interval: Duration, error_backoff: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.error_backoff = error_backoff;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs one iteration: check depth, consult the policy, claim at most one
    /// job, process it and report the outcome. Processor errors are recorded
    /// on the job; only store errors are returned.
    pub async fn tick(&self) -> Result<Tick, QueueError> {
        let pending = self.store.pending_count().await?;
        if pending == 0 {
            return Ok(Tick::Idle);
        }

        let decision = self.policy.decide(self.signal.current().await);
        if !decision.process_now {
            tracing::debug!(worker_id=%self.id, pending, "energy conditions unfavourable, waiting");
            return Ok(Tick::Deferred { pending });
        }

        let Some(job) = self.store.claim(&self.id).await? else {
            return Ok(Tick::Missed);
        };
        let job_id = job.id;
        tracing::info!(
            worker_id=%self.id,
            job_id=%job_id,
            attempt=job.attempts,
            tier=%decision.tier,
            submitted_tier=%job.submitted_tier(),
            "processing queued job"
        );

        match self.process(job.payload, decision.tier).await {
            Ok(result) => {
                let processed = ResourceContext::capture(decision.status.as_ref(), decision.tier);
                if self.store.complete(job_id, result, processed).await? {
                    tracing::info!(worker_id=%self.id, job_id=%job_id, "job completed");
                    Ok(Tick::Completed(job_id))
                } else {
                    tracing::warn!(worker_id=%self.id, job_id=%job_id, "job reclaimed before completion was recorded");
                    Ok(Tick::Lost(job_id))
                }
            }
            Err(e) => {
                let message = format!("{e:#}");
                tracing::warn!(worker_id=%self.id, job_id=%job_id, error=%message, "job processing failed");
                match self.store.fail(job_id, &message).await? {
                    Some(JobStatus::Dead) => {
                        tracing::error!(job_id=%job_id, attempts=job.attempts, "job moved to dead letter after max attempts");
                        Ok(Tick::Dead(job_id))
                    }
                    Some(_) => Ok(Tick::Retrying(job_id)),
                    None => Ok(Tick::Lost(job_id)),
                }
            }
        }
    }

    /// Runs the processor on its own task so a panic is reported as a
    /// failed attempt instead of unwinding through the loop.
    async fn process(&self, payload: String, tier: Tier) -> anyhow::Result<Value> {
        let processor = self.processor.clone();
        match tokio::spawn(async move { processor.process(&payload, tier).await }).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                let panic = e.into_panic();
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                anyhow::bail!("processor panicked: {reason}")
            }
            Err(e) => anyhow::bail!("processor task aborted: {e}"),
        }
    }

    /// Polls until `shutdown` fires. A job in flight is always allowed to
    /// finish; cancellation is only observed between iterations.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            worker_id=%self.id,
            poll_interval_ms=self.poll_interval.as_millis() as u64,
            "queue worker started"
        );

        loop {
            let pause = match self.tick().await {
                Ok(tick) if tick.did_work() => None,
                Ok(_) => Some(self.poll_interval),
                Err(e) => {
                    tracing::warn!(worker_id=%self.id, error=%e, "queue worker iteration failed, backing off");
                    Some(self.error_backoff)
                }
            };

            if shutdown.is_cancelled() {
                break;
            }
            if let Some(pause) = pause {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        tracing::info!(worker_id=%self.id, "queue worker stopped");
    }
}
