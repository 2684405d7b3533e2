use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::QueueError;

pub type JobId = Uuid;

pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Observable job states.
///
/// A failed attempt is re-evaluated into `Pending` or `Dead` inside the same
/// store operation, so no "failed" state is ever persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Dead,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "dead" => Ok(JobStatus::Dead),
            other => Err(QueueError::Internal(format!("unknown job status: {other}"))),
        }
    }
}

/// Cost/quality mode handed to the processor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Eco,
    Fast,
    Large,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Eco => "eco",
            Tier::Fast => "fast",
            Tier::Large => "large",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eco" => Ok(Tier::Eco),
            "fast" => Ok(Tier::Fast),
            "large" => Ok(Tier::Large),
            other => Err(QueueError::Internal(format!("unknown tier: {other}"))),
        }
    }
}

/// A reading of the external resource signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub price: Option<f64>,
    pub renewable_available: Option<bool>,
    pub fetched_at: DateTime<Utc>,
}

impl ResourceStatus {
    pub fn new(price: Option<f64>, renewable_available: Option<bool>) -> Self {
        Self {
            price,
            renewable_available,
            fetched_at: Utc::now(),
        }
    }
}

/// Snapshot of the signal and chosen tier, stored on the job at enqueue and
/// again at completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContext {
    pub price: Option<f64>,
    pub renewable_available: Option<bool>,
    pub tier: Option<Tier>,
}

impl ResourceContext {
    pub fn capture(status: Option<&ResourceStatus>, tier: Tier) -> Self {
        Self {
            price: status.and_then(|s| s.price),
            renewable_available: status.and_then(|s| s.renewable_available),
            tier: Some(tier),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub payload: String,
    pub status: JobStatus,

    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,

    pub submitted: ResourceContext,
    pub processed: Option<ResourceContext>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub worker_id: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl Job {
    /// Tier chosen when the job was submitted, falling back to `Eco`.
    pub fn submitted_tier(&self) -> Tier {
        self.submitted.tier.unwrap_or(Tier::Eco)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub payload: String,
    pub submitted: ResourceContext,
    /// Defaults to [`DEFAULT_MAX_ATTEMPTS`].
    pub max_attempts: Option<i32>,
}

impl NewJob {
    pub fn new(payload: impl Into<String>, submitted: ResourceContext) -> Self {
        Self {
            payload: payload.into(),
            submitted,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Resolves the attempt ceiling, rejecting values below one.
    pub fn resolved_max_attempts(&self) -> Result<i32, QueueError> {
        let max_attempts = self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts < 1 {
            return Err(QueueError::Configuration(format!(
                "max_attempts must be at least 1, got {max_attempts}"
            )));
        }
        Ok(max_attempts)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusStats {
    pub count: i64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub avg_attempts: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub by_status: Vec<(JobStatus, StatusStats)>,
    pub total: i64,
}

impl QueueStats {
    pub fn count(&self, status: JobStatus) -> i64 {
        self.by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, stats)| stats.count)
            .unwrap_or(0)
    }
}
