// Job Store Port (Interface)

use crate::domain::{Job, JobId, JobStatus, NewJob, Outcome};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Job counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub claimed: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.claimed + self.processing + self.completed + self.failed
    }

    pub fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Claimed => self.claimed += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
        }
    }
}

/// Repository of Job records; owns the state machine and the exclusive-claim primitive
///
/// Implementations must be safe to share between any number of workers. `claim`
/// and `reclaim_expired` never let two owners hold the same job, and
/// `finalize` from the same owner twice is a no-op returning the stored job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Allocate an id and store a new PENDING job
    async fn create(&self, new_job: NewJob) -> Result<Job>;

    /// Find job by ID
    async fn get(&self, id: &str) -> Result<Option<Job>>;

    /// Atomically move the oldest eligible PENDING job to CLAIMED under a fresh owner token
    ///
    /// `candidate_workflows = None` means any workflow. Never blocks waiting for work.
    async fn claim(&self, candidate_workflows: Option<&[String]>) -> Result<Option<Job>>;

    /// CLAIMED -> PROCESSING
    async fn mark_processing(&self, id: &str, owner_token: &str) -> Result<Job>;

    /// Renew the lease of a CLAIMED or PROCESSING job
    async fn heartbeat(&self, id: &str, owner_token: &str) -> Result<()>;

    /// Move a held job to COMPLETED or FAILED and release its owner token
    async fn finalize(&self, id: &str, owner_token: &str, outcome: Outcome) -> Result<Job>;

    /// Return held jobs whose last progress predates `now - lease` to PENDING
    async fn reclaim_expired(&self, lease: Duration) -> Result<Vec<JobId>>;

    /// Count jobs by status
    async fn stats(&self) -> Result<QueueStats>;

    /// Delete terminal jobs finished more than `older_than` ago
    async fn purge_finished(&self, older_than: Duration) -> Result<u64>;
}

/// Saturating conversion of a lease or retention window to epoch-ms arithmetic
pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
