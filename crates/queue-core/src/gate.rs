use std::sync::Arc;

use serde::Serialize;

use crate::{
    EnergyPolicy, JobId, JobProcessor, JobStore, NewJob, QueueError, ResourceContext,
    ResourceStatus, StatusSource, Tier,
};

/// What happened to a freshly submitted payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Submission {
    Processed {
        result: serde_json::Value,
        tier: Tier,
        energy: Option<ResourceStatus>,
    },
    Queued {
        job_id: JobId,
        tier: Tier,
        /// Queue depth right after enqueue; `None` if it could not be read.
        pending: Option<i64>,
        energy: Option<ResourceStatus>,
    },
}

/// Entry point for new work: runs it now when the policy allows, otherwise
/// persists it for a worker to pick up later.
#[derive(Clone)]
pub struct SubmissionGate {
    policy: EnergyPolicy,
    store: Arc<dyn JobStore>,
    signal: Arc<dyn StatusSource>,
    processor: Arc<dyn JobProcessor>,
    max_attempts: Option<i32>,
}

impl SubmissionGate {
    pub fn new(
        policy: EnergyPolicy,
        store: Arc<dyn JobStore>,
        signal: Arc<dyn StatusSource>,
        processor: Arc<dyn JobProcessor>,
    ) -> Self {
        Self {
            policy,
            store,
            signal,
            processor,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub async fn submit(&self, payload: &str) -> Result<Submission, QueueError> {
        let status = self.signal.current().await;
        let decision = self.policy.decide(status);

        if decision.process_now {
            tracing::info!(tier=%decision.tier, "processing submission immediately");
            let result = self
                .processor
                .process(payload, decision.tier)
                .await
                .map_err(|e| QueueError::Processing(format!("{e:#}")))?;
            return Ok(Submission::Processed {
                result,
                tier: decision.tier,
                energy: decision.status,
            });
        }

        let submitted = ResourceContext::capture(decision.status.as_ref(), decision.tier);
        let mut job = NewJob::new(payload, submitted);
        job.max_attempts = self.max_attempts;

        let job_id = self.store.enqueue(job).await?;
        // The job is already durable here, so a failed count must not fail the submit.
        let pending = match self.store.pending_count().await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(job_id=%job_id, error=%e, "could not read queue depth after enqueue");
                None
            }
        };
        tracing::info!(job_id=%job_id, tier=%decision.tier, pending=?pending, "deferred submission");

        Ok(Submission::Queued {
            job_id,
            tier: decision.tier,
            pending,
            energy: decision.status,
        })
    }
}
