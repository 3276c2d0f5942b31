//! RPC Method Handlers
//!
//! Thin adapters from JSON-RPC parameters to `JobService` use cases.

use crate::error::to_rpc_error;
use crate::types::{
    CreateJobParams, CreateJobResponse, FetchParams, FetchResponse, FinalizeParams,
    GetJobParams, HeartbeatResponse, JobView, OwnedJobParams, StatsResponse,
};
use jsonrpsee::types::ErrorObjectOwned;
use kiln_core::application::{CreateJobRequest, JobService};
use kiln_core::domain::{JobError, JobStatus, Outcome, WorkflowFilter};
use kiln_core::error::AppError;
use kiln_core::port::time_provider::to_rfc3339;
use std::sync::Arc;
use tracing::{debug, error};

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    service: Arc<JobService>,
    start_time: std::time::Instant,
}

impl RpcHandler {
    pub fn new(service: Arc<JobService>) -> Self {
        Self {
            service,
            start_time: std::time::Instant::now(),
        }
    }

    /// job.create.v1
    pub async fn create(
        &self,
        params: CreateJobParams,
    ) -> Result<CreateJobResponse, ErrorObjectOwned> {
        let req = CreateJobRequest {
            workflow: params.workflow,
            input: params
                .input
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
            callback_url: params.callback_url,
        };

        let job = self.service.create(req).await.map_err(to_rpc_error)?;
        debug!(job_id = %job.id, workflow = %job.workflow, "Job created via RPC");

        Ok(CreateJobResponse {
            created_at: to_rfc3339(job.created_at),
            job_id: job.id,
            status: job.status,
            workflow: job.workflow,
        })
    }

    /// job.get.v1
    pub async fn get(&self, params: GetJobParams) -> Result<JobView, ErrorObjectOwned> {
        let job = self.service.get(&params.job_id).await.map_err(to_rpc_error)?;
        Ok(job.into())
    }

    /// queue.fetch.v1
    pub async fn fetch(&self, params: FetchParams) -> Result<FetchResponse, ErrorObjectOwned> {
        let filter = WorkflowFilter::allow(params.workflows.unwrap_or_default());
        let handle = self.service.fetch(&filter).await.map_err(to_rpc_error)?;

        Ok(match handle {
            Some(handle) => FetchResponse {
                job: Some(handle.job.into()),
                owner_token: Some(handle.owner_token),
            },
            None => FetchResponse {
                job: None,
                owner_token: None,
            },
        })
    }

    /// job.start.v1
    pub async fn start(&self, params: OwnedJobParams) -> Result<JobView, ErrorObjectOwned> {
        let job = self
            .service
            .start(&params.job_id, &params.owner_token)
            .await
            .map_err(|e| self.loud(&params.job_id, e))?;
        Ok(job.into())
    }

    /// job.heartbeat.v1
    pub async fn heartbeat(
        &self,
        params: OwnedJobParams,
    ) -> Result<HeartbeatResponse, ErrorObjectOwned> {
        self.service
            .heartbeat(&params.job_id, &params.owner_token)
            .await
            .map_err(|e| self.loud(&params.job_id, e))?;
        Ok(HeartbeatResponse {
            job_id: params.job_id,
            renewed: true,
        })
    }

    /// job.finalize.v1
    pub async fn finalize(&self, params: FinalizeParams) -> Result<JobView, ErrorObjectOwned> {
        let outcome = outcome_of(params.status, params.output, params.error).map_err(to_rpc_error)?;
        let job = self
            .service
            .finalize(&params.job_id, &params.owner_token, outcome)
            .await
            .map_err(|e| self.loud(&params.job_id, e))?;
        Ok(job.into())
    }

    /// admin.stats.v1
    pub async fn stats(&self) -> Result<StatsResponse, ErrorObjectOwned> {
        let stats = self.service.stats().await.map_err(to_rpc_error)?;
        Ok(StatsResponse::new(stats, self.start_time.elapsed().as_secs()))
    }

    /// Ownership violations from remote workers are logged at error level
    fn loud(&self, job_id: &str, err: AppError) -> ErrorObjectOwned {
        if let AppError::Ownership(msg) = &err {
            error!(job_id = %job_id, error = %msg, "Remote worker lost ownership of job");
        }
        to_rpc_error(err)
    }
}

fn outcome_of(
    status: JobStatus,
    output: Option<kiln_core::domain::JobOutput>,
    error: Option<JobError>,
) -> Result<Outcome, AppError> {
    match (status, error) {
        (JobStatus::Completed, None) => Ok(Outcome::Completed(output.unwrap_or_default())),
        (JobStatus::Completed, Some(_)) => Err(AppError::Validation(
            "a COMPLETED outcome cannot carry an error".to_string(),
        )),
        (JobStatus::Failed, Some(err)) if output.is_none() => {
            let mut normalized = JobError::new(err.kind, err.message);
            normalized.code = err.code;
            Ok(Outcome::Failed(normalized))
        }
        (JobStatus::Failed, Some(_)) => Err(AppError::Validation(
            "a FAILED outcome cannot carry an output".to_string(),
        )),
        (JobStatus::Failed, None) => Err(AppError::Validation(
            "a FAILED outcome requires an error".to_string(),
        )),
        (other, _) => Err(AppError::Validation(format!(
            "finalize status must be COMPLETED or FAILED, got {}",
            other
        ))),
    }
}
