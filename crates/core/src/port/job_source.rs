// Job Source Port - where a worker claims jobs and reports their progress
// In-process: the Job Store via JobQueue. Out-of-process: a remote Kiln over RPC.

use crate::domain::{Job, JobHandle, Outcome, WorkflowFilter};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait JobSource: Send + Sync {
    /// Claim the next job the filter admits; `None` when nothing is pending
    async fn claim(&self, filter: &WorkflowFilter) -> Result<Option<JobHandle>>;

    /// CLAIMED -> PROCESSING
    async fn start(&self, id: &str, owner_token: &str) -> Result<Job>;

    /// Renew the lease of a held job
    async fn heartbeat(&self, id: &str, owner_token: &str) -> Result<()>;

    async fn finalize(&self, id: &str, owner_token: &str, outcome: Outcome) -> Result<Job>;
}
