//! Core types for an admission-controlled durable job queue: the job record
//! and its state machine, the [`JobStore`] contract, the [`EnergyPolicy`]
//! that decides between running now and deferring, and the
//! [`SubmissionGate`] that applies it to new work.

mod error;
mod gate;
mod job;
mod memory;
mod policy;
mod processor;
mod store;

pub use error::QueueError;
pub use gate::{Submission, SubmissionGate};
pub use job::{
    DEFAULT_MAX_ATTEMPTS, Job, JobId, JobStatus, NewJob, QueueStats, ResourceContext,
    ResourceStatus, StatusStats, Tier,
};
pub use memory::MemoryStore;
pub use policy::{DEFAULT_PRICE_THRESHOLD, EnergyPolicy, PolicyDecision};
pub use processor::{FixedStatus, JobProcessor, StatusSource};
pub use store::JobStore;
