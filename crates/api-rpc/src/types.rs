//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use kiln_core::domain::{Job, JobError, JobOutput, JobStatus, OwnerToken};
use kiln_core::error::AppError;
use kiln_core::port::time_provider::{from_rfc3339, to_rfc3339};
use kiln_core::port::QueueStats;
use serde::{Deserialize, Serialize};

/// job.create.v1 - Create a job
#[derive(Debug, Deserialize)]
pub struct CreateJobParams {
    pub workflow: String,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
    #[serde(default)]
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub workflow: String,
    pub created_at: Option<String>,
}

/// job.get.v1 - Get a job
#[derive(Debug, Deserialize)]
pub struct GetJobParams {
    pub job_id: String,
}

/// Public view of a job (owner token is never exposed here)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: String,
    pub workflow: String,
    pub status: JobStatus,
    pub input: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<JobOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    pub attempts: i32,
    pub created_at: Option<String>,
    pub claimed_at: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            created_at: to_rfc3339(job.created_at),
            claimed_at: job.claimed_at.and_then(to_rfc3339),
            started_at: job.started_at.and_then(to_rfc3339),
            finished_at: job.finished_at.and_then(to_rfc3339),
            job_id: job.id,
            workflow: job.workflow,
            status: job.status,
            input: job.input,
            output: job.output,
            error: job.error,
            callback_url: job.callback_target,
            attempts: job.attempts,
        }
    }
}

impl JobView {
    /// Rebuild the job a remote Kiln described; `owner_token` is the claim's token, if held
    pub fn into_job(self, owner_token: Option<OwnerToken>) -> Result<Job, AppError> {
        let created_at = self
            .created_at
            .as_deref()
            .and_then(from_rfc3339)
            .ok_or_else(|| {
                AppError::Validation(format!("job {} has no valid created_at", self.job_id))
            })?;
        let at = |value: Option<String>| value.as_deref().and_then(from_rfc3339);

        Ok(Job {
            id: self.job_id,
            workflow: self.workflow,
            status: self.status,
            input: self.input,
            output: self.output,
            error: self.error,
            callback_target: self.callback_url,
            created_at,
            claimed_at: at(self.claimed_at),
            started_at: at(self.started_at),
            finished_at: at(self.finished_at),
            heartbeat_at: None,
            owner_token,
            finalized_by: None,
            attempts: self.attempts,
        })
    }
}

/// queue.fetch.v1 - Claim the next job (`workflows` omitted = any)
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FetchParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflows: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub job: Option<JobView>,
    pub owner_token: Option<String>,
}

/// job.start.v1 / job.heartbeat.v1
#[derive(Debug, Serialize, Deserialize)]
pub struct OwnedJobParams {
    pub job_id: String,
    pub owner_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub job_id: String,
    pub renewed: bool,
}

/// job.finalize.v1 - exactly one of `output` / `error`, matching `status`
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeParams {
    pub job_id: String,
    pub owner_token: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JobOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

/// admin.stats.v1 - Queue counts per status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub pending: u64,
    pub claimed: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
    pub uptime_seconds: u64,
    pub version: String,
}

impl StatsResponse {
    pub fn new(stats: QueueStats, uptime_seconds: u64) -> Self {
        Self {
            pending: stats.pending,
            claimed: stats.claimed,
            processing: stats.processing,
            completed: stats.completed,
            failed: stats.failed,
            total: stats.total(),
            uptime_seconds,
            version: kiln_core::VERSION.to_string(),
        }
    }
}
