// Job Queue - ordered, filterable view over the store's PENDING set
// Also the in-process JobSource that local workers pull from

use crate::domain::{Job, Outcome, WorkflowFilter};
use crate::error::{AppError, Result};
use crate::port::{JobSource, JobStore};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub use crate::domain::JobHandle;

#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Claim the oldest PENDING job the filter admits, if any (never blocks)
    pub async fn next(&self, filter: &WorkflowFilter) -> Result<Option<JobHandle>> {
        let candidates = filter.candidates();
        let Some(job) = self.store.claim(candidates.as_deref()).await? else {
            return Ok(None);
        };

        let owner_token = job.owner_token.clone().ok_or_else(|| {
            AppError::Internal(format!("claimed job {} carries no owner token", job.id))
        })?;
        debug!(job_id = %job.id, workflow = %job.workflow, attempt = job.attempts, "Job claimed");

        Ok(Some(JobHandle { job, owner_token }))
    }
}

#[async_trait]
impl JobSource for JobQueue {
    async fn claim(&self, filter: &WorkflowFilter) -> Result<Option<JobHandle>> {
        self.next(filter).await
    }

    async fn start(&self, id: &str, owner_token: &str) -> Result<Job> {
        self.store.mark_processing(id, owner_token).await
    }

    async fn heartbeat(&self, id: &str, owner_token: &str) -> Result<()> {
        self.store.heartbeat(id, owner_token).await
    }

    async fn finalize(&self, id: &str, owner_token: &str, outcome: Outcome) -> Result<Job> {
        self.store.finalize(id, owner_token, outcome).await
    }
}
