// Callback Delivery Port

use crate::domain::{Job, JobError, JobId, JobOutput, JobStatus};
use crate::port::time_provider::to_rfc3339;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed JSON body POSTed to a callback target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JobOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl CallbackPayload {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            output: job.output.clone(),
            error: job.error.clone(),
            started_at: job.started_at.and_then(to_rfc3339),
            finished_at: job.finished_at.and_then(to_rfc3339),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("Callback target rejected notification: HTTP {0}")]
    Rejected(u16),

    #[error("Callback transport failed: {0}")]
    Transport(String),

    #[error("Callback timed out")]
    Timeout,
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        match self {
            DeliveryError::Rejected(status) => *status >= 500 || *status == 429,
            DeliveryError::Transport(_) | DeliveryError::Timeout => true,
        }
    }
}

#[async_trait]
pub trait CallbackNotifier: Send + Sync {
    async fn notify(&self, target: &str, payload: &CallbackPayload) -> Result<(), DeliveryError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Records every notification; optionally fails all of them
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<(String, CallbackPayload)>>,
        failure: Mutex<Option<DeliveryError>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing(error: DeliveryError) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                failure: Mutex::new(Some(error)),
            }
        }

        pub fn sent(&self) -> Vec<(String, CallbackPayload)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CallbackNotifier for RecordingNotifier {
        async fn notify(
            &self,
            target: &str,
            payload: &CallbackPayload,
        ) -> Result<(), DeliveryError> {
            self.sent
                .lock()
                .unwrap()
                .push((target.to_string(), payload.clone()));
            match self.failure.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }
}
