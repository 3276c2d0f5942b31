//! Remote Job Source
//!
//! Lets a worker process pull jobs from one or more Kiln servers over
//! JSON-RPC instead of opening the Job Store itself. Claims try each
//! endpoint in turn; lifecycle calls go back to the endpoint that issued
//! the claim.

use crate::error::from_rpc_error;
use crate::types::{
    FetchParams, FetchResponse, FinalizeParams, HeartbeatResponse, JobView, OwnedJobParams,
};
use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ObjectParams;
use jsonrpsee::core::ClientError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use kiln_core::domain::{Job, JobHandle, JobId, JobStatus, Outcome, WorkflowFilter};
use kiln_core::error::{AppError, Result};
use kiln_core::port::JobSource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

struct Endpoint {
    url: String,
    client: HttpClient,
}

impl Endpoint {
    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let mut object = ObjectParams::new();
        if let serde_json::Value::Object(fields) = serde_json::to_value(params)? {
            for (key, value) in fields {
                object.insert(&key, value)?;
            }
        }
        self.client
            .request(method, object)
            .await
            .map_err(|e| self.map_error(method, e))
    }

    fn map_error(&self, method: &str, err: ClientError) -> AppError {
        match err {
            ClientError::Call(obj) => from_rpc_error(obj.code(), obj.message()),
            other => AppError::Internal(format!("{} {} failed: {}", self.url, method, other)),
        }
    }
}

pub struct RpcJobSource {
    endpoints: Vec<Endpoint>,
    /// Endpoint the next claim starts from
    cursor: AtomicUsize,
    /// Endpoint that issued each job still held by this process
    held: Mutex<HashMap<JobId, usize>>,
}

impl RpcJobSource {
    pub fn new<I, S>(urls: I, request_timeout: Duration) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints = urls
            .into_iter()
            .map(|url| {
                let url = url.into().trim_end_matches('/').to_string();
                let client = HttpClientBuilder::default()
                    .request_timeout(request_timeout)
                    .build(&url)
                    .map_err(|e| {
                        AppError::Config(format!("invalid task API URL {}: {}", url, e))
                    })?;
                Ok(Endpoint { url, client })
            })
            .collect::<Result<Vec<_>>>()?;

        if endpoints.is_empty() {
            return Err(AppError::Config(
                "at least one task API URL is required".to_string(),
            ));
        }
        Ok(Self {
            endpoints,
            cursor: AtomicUsize::new(0),
            held: Mutex::new(HashMap::new()),
        })
    }

    pub fn urls(&self) -> Vec<&str> {
        self.endpoints.iter().map(|e| e.url.as_str()).collect()
    }

    async fn endpoint_for(&self, id: &str) -> Result<&Endpoint> {
        let index = self.held.lock().await.get(id).copied().ok_or_else(|| {
            AppError::Ownership(format!("job {} is not held by this worker", id))
        })?;
        Ok(&self.endpoints[index])
    }

    async fn fetch_from(&self, index: usize, filter: &WorkflowFilter) -> Result<Option<JobHandle>> {
        let endpoint = &self.endpoints[index];
        let params = FetchParams {
            workflows: filter.candidates(),
        };
        let response: FetchResponse = endpoint.call("queue.fetch.v1", &params).await?;

        match (response.job, response.owner_token) {
            (Some(view), Some(token)) => {
                let job = view.into_job(Some(token.clone()))?;
                Ok(Some(JobHandle {
                    job,
                    owner_token: token,
                }))
            }
            (None, _) => Ok(None),
            (Some(view), None) => Err(AppError::Internal(format!(
                "{} returned job {} without an owner token",
                endpoint.url, view.job_id
            ))),
        }
    }

    async fn release(&self, id: &str) {
        self.held.lock().await.remove(id);
    }
}

#[async_trait]
impl JobSource for RpcJobSource {
    async fn claim(&self, filter: &WorkflowFilter) -> Result<Option<JobHandle>> {
        let count = self.endpoints.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % count;
        let mut last_error = None;
        let mut answered = false;

        for offset in 0..count {
            let index = (start + offset) % count;
            let url = &self.endpoints[index].url;
            match self.fetch_from(index, filter).await {
                Ok(Some(handle)) => {
                    info!(
                        source = %url,
                        job_id = %handle.job.id,
                        workflow = %handle.job.workflow,
                        "Job claimed from remote source"
                    );
                    self.held.lock().await.insert(handle.job.id.clone(), index);
                    return Ok(Some(handle));
                }
                Ok(None) => {
                    debug!(source = %url, "No job available");
                    answered = true;
                }
                Err(e) => {
                    debug!(source = %url, error = %e, "Task source unavailable, trying next");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(None),
        }
    }

    async fn start(&self, id: &str, owner_token: &str) -> Result<Job> {
        let endpoint = self.endpoint_for(id).await?;
        let params = OwnedJobParams {
            job_id: id.to_string(),
            owner_token: owner_token.to_string(),
        };
        let view: JobView = endpoint.call("job.start.v1", &params).await?;
        view.into_job(Some(owner_token.to_string()))
    }

    async fn heartbeat(&self, id: &str, owner_token: &str) -> Result<()> {
        let endpoint = self.endpoint_for(id).await?;
        let params = OwnedJobParams {
            job_id: id.to_string(),
            owner_token: owner_token.to_string(),
        };
        let result: Result<HeartbeatResponse> = endpoint.call("job.heartbeat.v1", &params).await;
        match result {
            Ok(_) => Ok(()),
            Err(e @ AppError::Ownership(_)) | Err(e @ AppError::NotFound(_)) => {
                self.release(id).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn finalize(&self, id: &str, owner_token: &str, outcome: Outcome) -> Result<Job> {
        let endpoint = self.endpoint_for(id).await?;
        let (status, output, error) = match outcome {
            Outcome::Completed(output) => (JobStatus::Completed, Some(output), None),
            Outcome::Failed(error) => (JobStatus::Failed, None, Some(error)),
        };
        let params = FinalizeParams {
            job_id: id.to_string(),
            owner_token: owner_token.to_string(),
            status,
            output,
            error,
        };

        let result: Result<JobView> = endpoint.call("job.finalize.v1", &params).await;
        match result {
            Ok(view) => {
                self.release(id).await;
                view.into_job(None)
            }
            Err(e @ AppError::Ownership(_)) | Err(e @ AppError::NotFound(_)) => {
                self.release(id).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
