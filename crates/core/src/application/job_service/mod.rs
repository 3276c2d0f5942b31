// Job Service - Producer and remote-worker use cases

pub mod create;


pub use create::{validate_request, CreateJobRequest};

use crate::application::queue::{JobHandle, JobQueue};
use crate::domain::{Job, Outcome, WorkflowFilter};
use crate::error::{AppError, Result};
use crate::port::{JobStore, QueueStats};
use std::sync::Arc;

/// Entry point for everything outside the in-process worker fleet
pub struct JobService {
    store: Arc<dyn JobStore>,
    queue: JobQueue,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            queue: JobQueue::new(Arc::clone(&store)),
            store,
        }
    }

    /// Validate and create a PENDING job
    pub async fn create(&self, req: CreateJobRequest) -> Result<Job> {
        create::execute(self.store.as_ref(), req).await
    }

    pub async fn get(&self, id: &str) -> Result<Job> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", id)))
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.store.stats().await
    }

    /// Pull-style claim for out-of-process workers
    pub async fn fetch(&self, filter: &WorkflowFilter) -> Result<Option<JobHandle>> {
        self.queue.next(filter).await
    }

    pub async fn start(&self, id: &str, owner_token: &str) -> Result<Job> {
        self.store.mark_processing(id, owner_token).await
    }

    pub async fn heartbeat(&self, id: &str, owner_token: &str) -> Result<()> {
        self.store.heartbeat(id, owner_token).await
    }

    pub async fn finalize(&self, id: &str, owner_token: &str, outcome: Outcome) -> Result<Job> {
        self.store.finalize(id, owner_token, outcome).await
    }
}
