// Job Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Job ID (UUID v4)
pub type JobId = String;

/// Opaque token proving exclusive ownership of a claimed job
pub type OwnerToken = String;

/// Job lifecycle status
///
/// `PENDING -> CLAIMED -> PROCESSING -> {COMPLETED | FAILED}`, plus the lease
/// expiry back-edge `CLAIMED | PROCESSING -> PENDING`. A job that fails before
/// the processor starts goes straight from `CLAIMED` to `FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Claimed,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Claimed,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Claimed => "CLAIMED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Held by a worker (owner token present)
    pub fn is_held(&self) -> bool {
        matches!(self, JobStatus::Claimed | JobStatus::Processing)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Claimed)
                | (Claimed, Processing)
                | (Claimed, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Claimed, Pending)
                | (Processing, Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job input: string-keyed JSON object, interpreted only by the resolved processor
pub type JobInput = serde_json::Map<String, serde_json::Value>;

/// Result locators of a completed job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl JobOutput {
    pub fn with_urls(urls: Vec<String>) -> Self {
        Self {
            urls,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Machine-readable failure class of a FAILED job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    ValidationError,
    RoutingError,
    TransferError,
    ProcessorError,
    /// Compute succeeded but storing the results did not
    PublishError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ValidationError => "ValidationError",
            FailureKind::RoutingError => "RoutingError",
            FailureKind::TransferError => "TransferError",
            FailureKind::ProcessorError => "ProcessorError",
            FailureKind::PublishError => "PublishError",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure record of a FAILED job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: FailureKind,
    /// Finer-grained cause reported by the failing component (e.g. `engine_unavailable`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl JobError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            format!("{} without details", kind)
        } else {
            message
        };
        Self {
            kind,
            code: None,
            message,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Terminal result handed to `finalize`
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(JobOutput),
    Failed(JobError),
}

impl Outcome {
    pub fn status(&self) -> JobStatus {
        match self {
            Outcome::Completed(_) => JobStatus::Completed,
            Outcome::Failed(_) => JobStatus::Failed,
        }
    }
}

/// Parameters of a job to be created
#[derive(Debug, Clone)]
pub struct NewJob {
    pub workflow: String,
    pub input: JobInput,
    pub callback_target: Option<String>,
}

impl NewJob {
    pub fn new(workflow: impl Into<String>, input: JobInput) -> Self {
        Self {
            workflow: workflow.into(),
            input,
            callback_target: None,
        }
    }

    pub fn with_callback(mut self, target: impl Into<String>) -> Self {
        self.callback_target = Some(target.into());
        self
    }
}

/// Job Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub workflow: String,
    pub status: JobStatus,

    pub input: JobInput,
    pub output: Option<JobOutput>,
    pub error: Option<JobError>,
    pub callback_target: Option<String>,

    // Epoch ms
    pub created_at: i64,
    pub claimed_at: Option<i64>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub heartbeat_at: Option<i64>,

    pub owner_token: Option<OwnerToken>,
    /// Token of the owner that finalized the job (for idempotent re-finalize)
    pub finalized_by: Option<OwnerToken>,
    /// Number of times the job has been claimed
    pub attempts: i32,
}

impl Job {
    /// Create a new PENDING job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `new_job` - Workflow, input and optional callback target
    pub fn new(id: impl Into<String>, created_at: i64, new_job: NewJob) -> Result<Self> {
        if new_job.workflow.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "workflow must not be empty".to_string(),
            ));
        }
        Ok(Self {
            id: id.into(),
            workflow: new_job.workflow,
            status: JobStatus::Pending,
            input: new_job.input,
            output: None,
            error: None,
            callback_target: new_job.callback_target,
            created_at,
            claimed_at: None,
            started_at: None,
            finished_at: None,
            heartbeat_at: None,
            owner_token: None,
            finalized_by: None,
            attempts: 0,
        })
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    fn check_owner(&self, owner_token: &str) -> Result<()> {
        match &self.owner_token {
            Some(current) if current == owner_token => Ok(()),
            _ => Err(DomainError::OwnershipMismatch {
                job_id: self.id.clone(),
                status: self.status.to_string(),
            }),
        }
    }

    /// Latest progress timestamp used for lease accounting
    pub fn last_progress_at(&self) -> Option<i64> {
        [self.heartbeat_at, self.started_at, self.claimed_at]
            .into_iter()
            .flatten()
            .max()
    }

    /// PENDING -> CLAIMED under a fresh owner token
    pub fn claim(&mut self, owner_token: impl Into<String>, now_millis: i64) -> Result<()> {
        self.transition(JobStatus::Claimed)?;
        self.owner_token = Some(owner_token.into());
        self.claimed_at = Some(now_millis.max(self.created_at));
        self.attempts += 1;
        Ok(())
    }

    /// CLAIMED -> PROCESSING
    ///
    /// Any job not CLAIMED by `owner_token` is an ownership failure.
    pub fn start(&mut self, owner_token: &str, now_millis: i64) -> Result<()> {
        if self.status != JobStatus::Claimed {
            return Err(DomainError::OwnershipMismatch {
                job_id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        self.check_owner(owner_token)?;
        self.transition(JobStatus::Processing)?;
        let floor = self.claimed_at.unwrap_or(self.created_at);
        self.started_at = Some(now_millis.max(floor));
        Ok(())
    }

    /// Renew the lease of a held job
    pub fn heartbeat(&mut self, owner_token: &str, now_millis: i64) -> Result<()> {
        self.check_owner(owner_token)?;
        if !self.status.is_held() {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: "HEARTBEAT".to_string(),
            });
        }
        let floor = self.last_progress_at().unwrap_or(self.created_at);
        self.heartbeat_at = Some(now_millis.max(floor));
        Ok(())
    }

    /// Move a held job to its terminal state
    ///
    /// Returns `Ok(false)` when the same owner already finalized the job, in
    /// which case nothing is modified.
    pub fn finish(&mut self, owner_token: &str, outcome: Outcome, now_millis: i64) -> Result<bool> {
        if self.status.is_terminal() && self.finalized_by.as_deref() == Some(owner_token) {
            return Ok(false);
        }
        self.check_owner(owner_token)?;
        self.transition(outcome.status())?;
        match outcome {
            Outcome::Completed(output) => self.output = Some(output),
            Outcome::Failed(error) => self.error = Some(error),
        }
        let floor = self.last_progress_at().unwrap_or(self.created_at);
        self.finished_at = Some(now_millis.max(floor));
        self.finalized_by = self.owner_token.take();
        Ok(true)
    }

    /// Lease expiry back-edge: CLAIMED | PROCESSING -> PENDING
    ///
    /// Attempt-scoped timestamps are cleared so the next claim starts a clean attempt.
    pub fn release(&mut self) -> Result<()> {
        self.transition(JobStatus::Pending)?;
        self.owner_token = None;
        self.claimed_at = None;
        self.started_at = None;
        self.heartbeat_at = None;
        Ok(())
    }

    /// True when the job is held and its lease began before `cutoff_millis`
    pub fn is_lease_expired(&self, cutoff_millis: i64) -> bool {
        self.status.is_held()
            && self
                .last_progress_at()
                .map(|at| at < cutoff_millis)
                .unwrap_or(true)
    }
}

/// A claimed job together with the token that proves ownership
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub job: Job,
    pub owner_token: OwnerToken,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending_job() -> Job {
        let input = json!({"source_url": "https://x/s.jpg"})
            .as_object()
            .cloned()
            .unwrap();
        Job::new("job-1", 1_000, NewJob::new("face_swap", input)).unwrap()
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = pending_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.owner_token.is_none());
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn test_empty_workflow_rejected() {
        let err = Job::new("job-1", 0, NewJob::new("  ", JobInput::new())).unwrap_err();
        assert!(matches!(err, DomainError::ValidationError(_)));
    }

    #[test]
    fn test_full_lifecycle() {
        let mut job = pending_job();
        job.claim("owner-a", 2_000).unwrap();
        assert_eq!(job.status, JobStatus::Claimed);
        assert_eq!(job.claimed_at, Some(2_000));

        job.start("owner-a", 3_000).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.started_at, Some(3_000));

        let changed = job
            .finish(
                "owner-a",
                Outcome::Completed(JobOutput::with_urls(vec!["https://cdn/x.png".into()])),
                4_000,
            )
            .unwrap();
        assert!(changed);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.finished_at, Some(4_000));
        assert!(job.owner_token.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_claimed_job_can_fail_but_not_complete() {
        // Routing and input failures happen before the processor starts
        let mut job = pending_job();
        job.claim("owner-a", 2_000).unwrap();
        let err = job
            .finish("owner-a", Outcome::Completed(JobOutput::default()), 2_500)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert_eq!(job.status, JobStatus::Claimed);

        let failure = JobError::new(FailureKind::RoutingError, "no processor");
        assert!(job.finish("owner-a", Outcome::Failed(failure), 3_000).unwrap());
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.started_at.is_none());
        assert_eq!(job.finished_at, Some(3_000));
    }

    #[test]
    fn test_start_with_wrong_owner() {
        let mut job = pending_job();
        job.claim("owner-a", 2_000).unwrap();
        let err = job.start("owner-b", 3_000).unwrap_err();
        assert!(matches!(err, DomainError::OwnershipMismatch { .. }));
        assert_eq!(job.status, JobStatus::Claimed);
    }

    #[test]
    fn test_claim_requires_pending() {
        let mut job = pending_job();
        job.claim("owner-a", 2_000).unwrap();
        let err = job.claim("owner-b", 2_500).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert_eq!(job.owner_token.as_deref(), Some("owner-a"));
    }

    #[test]
    fn test_finish_twice_same_owner_is_noop() {
        let mut job = pending_job();
        job.claim("owner-a", 2_000).unwrap();
        job.start("owner-a", 3_000).unwrap();
        let failure = JobError::new(FailureKind::ProcessorError, "engine exploded");
        job.finish("owner-a", Outcome::Failed(failure.clone()), 4_000)
            .unwrap();

        let changed = job
            .finish(
                "owner-a",
                Outcome::Completed(JobOutput::default()),
                5_000,
            )
            .unwrap();
        assert!(!changed);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error, Some(failure));
        assert!(job.output.is_none());
        assert_eq!(job.finished_at, Some(4_000));
    }

    #[test]
    fn test_finish_by_other_owner_after_terminal() {
        let mut job = pending_job();
        job.claim("owner-a", 2_000).unwrap();
        job.finish(
            "owner-a",
            Outcome::Failed(JobError::new(FailureKind::RoutingError, "no processor")),
            2_500,
        )
        .unwrap();
        let err = job
            .finish("owner-b", Outcome::Completed(JobOutput::default()), 3_000)
            .unwrap_err();
        assert!(matches!(err, DomainError::OwnershipMismatch { .. }));
    }

    #[test]
    fn test_release_clears_attempt() {
        let mut job = pending_job();
        job.claim("owner-a", 2_000).unwrap();
        job.start("owner-a", 3_000).unwrap();
        job.release().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.owner_token.is_none());
        assert!(job.claimed_at.is_none());
        assert!(job.started_at.is_none());

        job.claim("owner-b", 9_000).unwrap();
        assert_eq!(job.attempts, 2);
    }

    #[test]
    fn test_terminal_cannot_be_released() {
        let mut job = pending_job();
        job.claim("owner-a", 2_000).unwrap();
        job.finish(
            "owner-a",
            Outcome::Failed(JobError::new(FailureKind::RoutingError, "x")),
            2_100,
        )
        .unwrap();
        assert!(job.release().is_err());
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let mut job = pending_job();
        // Clock skew: "now" earlier than creation
        job.claim("owner-a", 500).unwrap();
        assert_eq!(job.claimed_at, Some(1_000));
        job.start("owner-a", 900).unwrap();
        assert_eq!(job.started_at, Some(1_000));
    }

    #[test]
    fn test_lease_expiry_uses_latest_progress() {
        let mut job = pending_job();
        job.claim("owner-a", 2_000).unwrap();
        assert!(job.is_lease_expired(2_001));
        job.heartbeat("owner-a", 5_000).unwrap();
        assert!(!job.is_lease_expired(4_000));
        assert!(job.is_lease_expired(5_001));
    }

    #[test]
    fn test_empty_error_message_is_filled() {
        let err = JobError::new(FailureKind::TransferError, "");
        assert!(!err.message.is_empty());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(JobStatus::Processing).unwrap(),
            json!("PROCESSING")
        );
        assert_eq!(
            serde_json::to_value(FailureKind::TransferError).unwrap(),
            json!("TransferError")
        );
        assert_eq!(JobStatus::parse("COMPLETED"), Some(JobStatus::Completed));
        assert_eq!(JobStatus::parse("DONE"), None);
    }
}
