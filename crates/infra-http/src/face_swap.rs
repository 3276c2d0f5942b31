// Face Swap Processor
// Health check, then multipart submission of source/target bytes

use crate::engine::{ensure_success, extension_for, response_content_type, transport_error};
use async_trait::async_trait;
use kiln_core::application::{RetryDecision, RetryPolicy};
use kiln_core::domain::JobInput;
use kiln_core::port::processor::is_remote_url;
use kiln_core::port::{
    Artifact, InputRef, Processor, ProcessorError, ProcessorOutput, ProcessorRequest,
};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const SOURCE_FIELD: &str = "source_url";
const TARGET_FIELD: &str = "target_url";

#[derive(Debug, Clone)]
pub struct FaceSwapConfig {
    pub base_url: String,
    pub health_timeout: Duration,
    pub request_timeout: Duration,
    /// Retries on transient engine errors (connect failure, 5xx, timeout)
    pub retry: RetryPolicy,
    pub default_resolution: String,
    pub default_model: String,
}

impl FaceSwapConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            health_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(300),
            retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(4)),
            default_resolution: "1024x1024".to_string(),
            default_model: "inswapper_128_fp16".to_string(),
        }
    }
}

pub struct FaceSwapProcessor {
    client: reqwest::Client,
    config: FaceSwapConfig,
}

impl FaceSwapProcessor {
    pub fn new(config: FaceSwapConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn check_health(&self) -> Result<(), ProcessorError> {
        let response = self
            .client
            .get(format!("{}/health", self.config.base_url))
            .timeout(self.config.health_timeout)
            .send()
            .await
            .map_err(|e| transport_error("health", e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProcessorError::unavailable(format!(
                "face swap engine unhealthy (HTTP {})",
                response.status().as_u16()
            )))
        }
    }

    async fn swap_once(
        &self,
        source: &[u8],
        target: &[u8],
        resolution: &str,
        model: &str,
    ) -> Result<(Vec<u8>, String), ProcessorError> {
        let form = reqwest::multipart::Form::new()
            .part(
                "source",
                reqwest::multipart::Part::bytes(source.to_vec()).file_name("source"),
            )
            .part(
                "target",
                reqwest::multipart::Part::bytes(target.to_vec()).file_name("target"),
            )
            .text("resolution", resolution.to_string())
            .text("model", model.to_string());

        let response = self
            .client
            .post(format!("{}/swap", self.config.base_url))
            .timeout(self.config.request_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error("swap", e))?;
        let response = ensure_success("swap", response).await?;
        let content_type =
            response_content_type(&response).unwrap_or_else(|| "image/png".to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error("swap", e))?;
        Ok((bytes.to_vec(), content_type))
    }
}

fn required_url<'a>(input: &'a JobInput, key: &str) -> Result<&'a str, ProcessorError> {
    input
        .get(key)
        .and_then(Value::as_str)
        .filter(|url| is_remote_url(url))
        .ok_or_else(|| ProcessorError::invalid_input(format!("'{}' must be an http(s) URL", key)))
}

fn str_or<'a>(input: &'a JobInput, key: &str, default: &'a str) -> &'a str {
    input.get(key).and_then(Value::as_str).unwrap_or(default)
}

#[async_trait]
impl Processor for FaceSwapProcessor {
    fn name(&self) -> &str {
        "face_swap"
    }

    fn input_refs(&self, input: &JobInput) -> Result<Vec<InputRef>, ProcessorError> {
        [SOURCE_FIELD, TARGET_FIELD]
            .into_iter()
            .map(|key| {
                required_url(input, key).map(|url| InputRef {
                    key: key.to_string(),
                    url: url.to_string(),
                })
            })
            .collect()
    }

    async fn run(&self, request: ProcessorRequest) -> Result<ProcessorOutput, ProcessorError> {
        let source = request.resource(required_url(&request.input, SOURCE_FIELD)?)?;
        let target = request.resource(required_url(&request.input, TARGET_FIELD)?)?;
        let resolution = str_or(&request.input, "resolution", &self.config.default_resolution);
        let model = str_or(&request.input, "model", &self.config.default_model);

        let mut attempt = 0u32;
        let (bytes, content_type) = loop {
            let result = match self.check_health().await {
                Ok(()) => self.swap_once(source, target, resolution, model).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(done) => break done,
                Err(e) if e.is_transient() => match self.config.retry.decide(attempt, &request.job_id) {
                    RetryDecision::Retry(delay) => {
                        warn!(
                            job_id = %request.job_id,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Face swap attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp => return Err(e),
                },
                Err(e) => return Err(e),
            }
        };

        debug!(job_id = %request.job_id, size = bytes.len(), "Face swap finished");
        let name = format!("face_swap.{}", extension_for(&content_type));
        let mut output = ProcessorOutput::artifacts(vec![Artifact::new(name, bytes, content_type)]);
        output
            .metadata
            .insert("model".to_string(), Value::String(model.to_string()));
        output
            .metadata
            .insert("resolution".to_string(), Value::String(resolution.to_string()));
        Ok(output)
    }
}
