// Worker - Job dispatch loop
// fetch job -> route -> fetch inputs -> invoke processor -> publish outputs -> report

pub mod constants;
mod panic_guard;
mod shutdown;

use constants::*;
pub use panic_guard::{execute_guarded, panic_message, PanicGuardResult};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::registry::ProcessorRegistry;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::application::transfer::BatchTransfer;
use crate::domain::{FailureKind, Job, JobError, JobHandle, JobOutput, Outcome, WorkflowFilter};
use crate::error::{AppError, Result};
use crate::port::{
    CallbackNotifier, CallbackPayload, JobSource, ProcessorErrorKind, ProcessorRequest,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Per-worker settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub filter: WorkflowFilter,
    pub poll_interval: Duration,
    pub error_sleep: Duration,
    pub heartbeat_interval: Duration,
    pub processor_timeout: Duration,
    /// Process-wide callback target used when a job carries none
    pub default_callback: Option<String>,
    pub callback_retry: RetryPolicy,
    /// Also notify when a job enters PROCESSING
    pub callback_on_start: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            filter: WorkflowFilter::Any,
            poll_interval: IDLE_SLEEP_DURATION,
            error_sleep: ERROR_RECOVERY_SLEEP_DURATION,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            processor_timeout: DEFAULT_PROCESSOR_TIMEOUT,
            default_callback: None,
            callback_retry: RetryPolicy::new(
                DEFAULT_CALLBACK_RETRIES,
                Duration::from_secs(1),
                Duration::from_secs(4),
            ),
            callback_on_start: false,
        }
    }
}

/// Collaborators shared by every worker in a process
#[derive(Clone)]
pub struct WorkerDeps {
    /// Local queue over the Job Store, or a remote Kiln
    pub source: Arc<dyn JobSource>,
    pub registry: Arc<ProcessorRegistry>,
    pub notifier: Arc<dyn CallbackNotifier>,
}

/// Worker processes jobs from the queue, one at a time
pub struct Worker {
    name: String,
    source: Arc<dyn JobSource>,
    registry: Arc<ProcessorRegistry>,
    transfer: BatchTransfer,
    notifier: Arc<dyn CallbackNotifier>,
    config: WorkerConfig,
}

impl Worker {
    /// Create a worker; `transfer` is owned so each worker has its own concurrency ceilings
    pub fn new(
        name: impl Into<String>,
        deps: WorkerDeps,
        transfer: BatchTransfer,
        config: WorkerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            source: deps.source,
            registry: deps.registry,
            transfer,
            notifier: deps.notifier,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run worker loop with graceful shutdown support
    ///
    /// Shutdown is observed between jobs and while idle; a job in flight runs to completion.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(worker = %self.name, filter = %self.config.filter, "Worker started");
        loop {
            if shutdown.is_shutdown() {
                info!(worker = %self.name, "Worker shutting down");
                break;
            }
            match self.process_next_job().await {
                Ok(true) => {}
                Ok(false) => {
                    // No job available, sleep briefly (or wait for shutdown)
                    tokio::select! {
                        _ = sleep(self.config.poll_interval) => {},
                        _ = shutdown.wait() => {
                            info!(worker = %self.name, "Worker interrupted during idle");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(worker = %self.name, error = %e, "Worker error");
                    tokio::select! {
                        _ = sleep(self.config.error_sleep) => {},
                        _ = shutdown.wait() => {
                            info!(worker = %self.name, "Worker interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
        }
        info!(worker = %self.name, "Worker stopped");
        Ok(())
    }

    /// Claim and process the next job (returns true if a job was claimed)
    pub async fn process_next_job(&self) -> Result<bool> {
        let handle = match self.source.claim(&self.config.filter).await? {
            Some(h) => h,
            None => return Ok(false),
        };
        let job_id = handle.job.id.clone();
        info!(
            worker = %self.name,
            job_id = %job_id,
            workflow = %handle.job.workflow,
            attempt = handle.job.attempts,
            "Processing job"
        );

        // The heartbeat only ends when the lease is lost
        let outcome = tokio::select! {
            outcome = self.drive(&handle) => outcome,
            lost = self.keep_alive(&handle) => Err(lost),
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(AppError::Ownership(msg)) => {
                error!(
                    worker = %self.name,
                    job_id = %job_id,
                    error = %msg,
                    "Lost ownership of job, abandoning without finalize"
                );
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        let job = match self
            .source
            .finalize(&job_id, &handle.owner_token, outcome)
            .await
        {
            Ok(job) => job,
            Err(AppError::Ownership(msg)) => {
                error!(
                    worker = %self.name,
                    job_id = %job_id,
                    error = %msg,
                    "Finalize rejected: job was reclaimed by another owner"
                );
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        match &job.error {
            None => info!(worker = %self.name, job_id = %job_id, "Job completed"),
            Some(err) => warn!(
                worker = %self.name,
                job_id = %job_id,
                kind = %err.kind,
                code = err.code.as_deref().unwrap_or(""),
                error = %err.message,
                "Job failed"
            ),
        }

        self.report(&job).await;
        Ok(true)
    }

    /// Route, fetch, invoke and publish; returns the outcome to finalize
    ///
    /// `Err` only for store failures (ownership, database); every job-level
    /// failure is an `Outcome::Failed`.
    async fn drive(&self, handle: &JobHandle) -> Result<Outcome> {
        let job = &handle.job;

        // ROUTE
        let Some(processor) = self.registry.resolve(&job.workflow) else {
            return Ok(Outcome::Failed(JobError::new(
                FailureKind::RoutingError,
                format!("no processor registered for workflow '{}'", job.workflow),
            )));
        };

        // FETCH_INPUTS
        let refs = match processor.input_refs(&job.input) {
            Ok(refs) => refs,
            Err(e) => {
                return Ok(Outcome::Failed(
                    JobError::new(FailureKind::ProcessorError, e.message)
                        .with_code(e.kind.as_code()),
                ))
            }
        };

        let mut resources = HashMap::new();
        if !refs.is_empty() {
            let mut fetched = self
                .transfer
                .fetch_many(refs.iter().map(|r| r.url.clone()))
                .await;

            let failures: Vec<String> = refs
                .iter()
                .filter_map(|r| match fetched.get(&r.url) {
                    Some(Ok(_)) => None,
                    Some(Err(e)) => Some(format!("{} ({}): {}", r.key, r.url, e)),
                    None => Some(format!("{} ({}): not fetched", r.key, r.url)),
                })
                .collect();
            if !failures.is_empty() {
                return Ok(Outcome::Failed(JobError::new(
                    FailureKind::TransferError,
                    failures.join("; "),
                )));
            }

            for (url, result) in fetched.drain() {
                if let Ok(bytes) = result {
                    resources.insert(url, bytes);
                }
            }
        }

        // INVOKE_PROCESSOR
        let started = self
            .source
            .start(&job.id, &handle.owner_token)
            .await?;
        if self.config.callback_on_start {
            self.report(&started).await;
        }

        let request = ProcessorRequest {
            job_id: job.id.clone(),
            workflow: job.workflow.clone(),
            input: job.input.clone(),
            resources,
        };
        let task_processor = Arc::clone(&processor);
        let invocation = execute_guarded(
            async move { task_processor.run(request).await },
            self.config.processor_timeout,
        )
        .await;

        let output = match invocation {
            PanicGuardResult::Success(Ok(output)) => output,
            PanicGuardResult::Success(Err(e)) => {
                return Ok(Outcome::Failed(
                    JobError::new(FailureKind::ProcessorError, e.message)
                        .with_code(e.kind.as_code()),
                ))
            }
            PanicGuardResult::Panicked(msg) => {
                return Ok(Outcome::Failed(
                    JobError::new(
                        FailureKind::ProcessorError,
                        format!("processor '{}' panicked: {}", processor.name(), msg),
                    )
                    .with_code(ProcessorErrorKind::Panicked.as_code()),
                ))
            }
            PanicGuardResult::TimedOut(after) => {
                return Ok(Outcome::Failed(
                    JobError::new(
                        FailureKind::ProcessorError,
                        format!(
                            "processor '{}' did not finish within {}s",
                            processor.name(),
                            after.as_secs()
                        ),
                    )
                    .with_code(ProcessorErrorKind::Timeout.as_code()),
                ))
            }
        };

        if output.is_empty() {
            return Ok(Outcome::Failed(
                JobError::new(
                    FailureKind::ProcessorError,
                    format!("processor '{}' produced no output", processor.name()),
                )
                .with_code(ProcessorErrorKind::EmptyOutput.as_code()),
            ));
        }

        // PUBLISH_OUTPUTS
        let mut urls = output.urls;
        if !output.artifacts.is_empty() {
            let published = self.transfer.publish_many(&job.id, output.artifacts).await;
            let mut failures = Vec::new();
            for (name, result) in published {
                match result {
                    Ok(url) => urls.push(url),
                    Err(e) => failures.push(format!("{}: {}", name, e)),
                }
            }
            if !failures.is_empty() {
                return Ok(Outcome::Failed(JobError::new(
                    FailureKind::PublishError,
                    failures.join("; "),
                )));
            }
        }

        Ok(Outcome::Completed(JobOutput {
            urls,
            metadata: output.metadata,
        }))
    }

    /// Renew the lease until ownership is lost; returns that error
    async fn keep_alive(&self, handle: &JobHandle) -> AppError {
        loop {
            sleep(self.config.heartbeat_interval).await;
            match self
                .source
                .heartbeat(&handle.job.id, &handle.owner_token)
                .await
            {
                Ok(()) => debug!(worker = %self.name, job_id = %handle.job.id, "Lease renewed"),
                Err(e @ AppError::Ownership(_)) | Err(e @ AppError::NotFound(_)) => {
                    return AppError::Ownership(e.to_string())
                }
                Err(e) => {
                    warn!(worker = %self.name, job_id = %handle.job.id, error = %e, "Heartbeat failed")
                }
            }
        }
    }

    /// Best-effort callback; never changes job state
    async fn report(&self, job: &Job) {
        let target = match job
            .callback_target
            .as_deref()
            .or(self.config.default_callback.as_deref())
        {
            Some(target) => target,
            None => {
                debug!(job_id = %job.id, "No callback target, skipping notification");
                return;
            }
        };

        let payload = CallbackPayload::from_job(job);
        let mut attempt = 0u32;
        loop {
            match self.notifier.notify(target, &payload).await {
                Ok(()) => {
                    debug!(job_id = %job.id, status = %job.status, target = %target, "Callback delivered");
                    return;
                }
                Err(e) if e.is_transient() => match self.config.callback_retry.decide(attempt, &job.id) {
                    RetryDecision::Retry(delay) => {
                        debug!(job_id = %job.id, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Retrying callback");
                        sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp => {
                        warn!(job_id = %job.id, target = %target, error = %e, "Callback delivery failed");
                        return;
                    }
                },
                Err(e) => {
                    warn!(job_id = %job.id, target = %target, error = %e, "Callback delivery failed");
                    return;
                }
            }
        }
    }
}
