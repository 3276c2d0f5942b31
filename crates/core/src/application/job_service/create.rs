// Create Job Use Case

use crate::domain::{Job, NewJob};
use crate::error::{AppError, Result};
use crate::port::processor::is_remote_url;
use crate::port::JobStore;
use serde::{Deserialize, Serialize};

/// Maximum workflow name length
pub const MAX_WORKFLOW_LEN: usize = 128;

/// Maximum nesting depth of the input payload
pub const MAX_INPUT_DEPTH: usize = 32;

/// Create request as accepted from producers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub workflow: String,

    #[serde(default = "empty_object")]
    pub input: serde_json::Value,

    #[serde(default)]
    pub callback_url: Option<String>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Reject malformed requests before a job exists
pub fn validate_request(req: &CreateJobRequest) -> Result<()> {
    if req.workflow.is_empty() {
        return Err(AppError::Validation("workflow must not be empty".to_string()));
    }
    if req.workflow.len() > MAX_WORKFLOW_LEN {
        return Err(AppError::Validation(format!(
            "workflow too long ({} > {} chars)",
            req.workflow.len(),
            MAX_WORKFLOW_LEN
        )));
    }
    if !req
        .workflow
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
    {
        return Err(AppError::Validation(format!(
            "workflow '{}' must be alphanumeric with _ - . : only",
            req.workflow
        )));
    }

    if !req.input.is_object() {
        return Err(AppError::Validation("input must be a JSON object".to_string()));
    }
    let depth = json_depth(&req.input);
    if depth > MAX_INPUT_DEPTH {
        return Err(AppError::Validation(format!(
            "input nested too deep ({} > {})",
            depth, MAX_INPUT_DEPTH
        )));
    }

    if let Some(url) = &req.callback_url {
        if !is_remote_url(url) {
            return Err(AppError::Validation(format!(
                "callback_url must be an http(s) URL, got '{}'",
                url
            )));
        }
    }
    Ok(())
}

fn json_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        serde_json::Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Execute create use case
pub async fn execute(store: &dyn JobStore, req: CreateJobRequest) -> Result<Job> {
    validate_request(&req)?;

    let serde_json::Value::Object(input) = req.input else {
        return Err(AppError::Validation("input must be a JSON object".to_string()));
    };
    let mut new_job = NewJob::new(req.workflow, input);
    new_job.callback_target = req.callback_url;

    store.create(new_job).await
}
