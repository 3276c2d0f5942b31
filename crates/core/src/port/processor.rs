// Processor Port
// Capability that performs the AI computation for one workflow kind

use crate::domain::{JobId, JobInput};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Remote resource referenced by a job's input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRef {
    /// Input field the URL came from (`target_url`, `image_urls[1]`)
    pub key: String,
    pub url: String,
}

/// Locally produced result to be published
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl Artifact {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes,
            content_type: content_type.into(),
        }
    }
}

/// Everything a processor gets for one invocation
#[derive(Debug, Clone)]
pub struct ProcessorRequest {
    pub job_id: JobId,
    pub workflow: String,
    pub input: JobInput,
    /// Fetched input bytes keyed by URL
    pub resources: HashMap<String, Vec<u8>>,
}

impl ProcessorRequest {
    pub fn resource(&self, url: &str) -> Result<&[u8], ProcessorError> {
        self.resources.get(url).map(Vec::as_slice).ok_or_else(|| {
            ProcessorError::invalid_input(format!("resource {} was not fetched", url))
        })
    }

    /// Required string field of the input
    pub fn str_field(&self, key: &str) -> Result<&str, ProcessorError> {
        self.input
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProcessorError::invalid_input(format!("missing string field '{}'", key)))
    }
}

/// What a processor hands back: bytes to publish and/or already-public locators
#[derive(Debug, Clone, Default)]
pub struct ProcessorOutput {
    pub artifacts: Vec<Artifact>,
    pub urls: Vec<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ProcessorOutput {
    pub fn artifacts(artifacts: Vec<Artifact>) -> Self {
        Self {
            artifacts,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty() && self.urls.is_empty()
    }
}

/// Processor error class, preserved as `error.code` on the failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorErrorKind {
    InvalidInput,
    EngineUnavailable,
    EngineRejected,
    Timeout,
    EmptyOutput,
    Panicked,
}

impl ProcessorErrorKind {
    pub fn as_code(&self) -> &'static str {
        match self {
            ProcessorErrorKind::InvalidInput => "invalid_input",
            ProcessorErrorKind::EngineUnavailable => "engine_unavailable",
            ProcessorErrorKind::EngineRejected => "engine_rejected",
            ProcessorErrorKind::Timeout => "timeout",
            ProcessorErrorKind::EmptyOutput => "empty_output",
            ProcessorErrorKind::Panicked => "panicked",
        }
    }
}

impl fmt::Display for ProcessorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct ProcessorError {
    pub kind: ProcessorErrorKind,
    pub message: String,
}

impl ProcessorError {
    pub fn new(kind: ProcessorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ProcessorErrorKind::InvalidInput, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ProcessorErrorKind::EngineUnavailable, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ProcessorErrorKind::EngineRejected, message)
    }

    /// Worth retrying against the engine
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ProcessorErrorKind::EngineUnavailable | ProcessorErrorKind::Timeout
        )
    }
}

/// Processor trait
///
/// Implementations must be safe to invoke concurrently for different jobs.
///
/// Implementations:
/// - ComfyUiProcessor: image-generation workflow engine (infra-http)
/// - FaceSwapProcessor: face-swap engine (infra-http)
#[async_trait]
pub trait Processor: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Remote resources that must be fetched before `run`
    ///
    /// Default: every http(s) string under a key ending in `_url`, and every
    /// http(s) element of an array under a key ending in `_urls`.
    fn input_refs(&self, input: &JobInput) -> Result<Vec<InputRef>, ProcessorError> {
        Ok(scan_url_refs(input))
    }

    async fn run(&self, request: ProcessorRequest) -> Result<ProcessorOutput, ProcessorError>;
}

pub fn is_remote_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Collect `*_url` / `*_urls` references from the top level of an input payload
pub fn scan_url_refs(input: &JobInput) -> Vec<InputRef> {
    let mut refs = Vec::new();
    for (key, value) in input {
        if key.ends_with("_url") {
            if let Some(url) = value.as_str().filter(|s| is_remote_url(s)) {
                refs.push(InputRef {
                    key: key.clone(),
                    url: url.to_string(),
                });
            }
        } else if key.ends_with("_urls") {
            if let Some(items) = value.as_array() {
                for (i, item) in items.iter().enumerate() {
                    if let Some(url) = item.as_str().filter(|s| is_remote_url(s)) {
                        refs.push(InputRef {
                            key: format!("{}[{}]", key, i),
                            url: url.to_string(),
                        });
                    }
                }
            }
        }
    }
    refs
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Mock processor behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Return the given artifacts
        Succeed(Vec<Artifact>),
        /// Return already-public URLs only
        SucceedWithUrls(Vec<String>),
        /// Fail with a typed error
        Fail(ProcessorErrorKind, String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep, then return one artifact
        Slow(Duration),
    }

    /// Scripted processor for testing
    pub struct ScriptedProcessor {
        name: String,
        behavior: Arc<Mutex<MockBehavior>>,
        calls: Arc<Mutex<Vec<ProcessorRequest>>>,
    }

    impl ScriptedProcessor {
        pub fn new(name: impl Into<String>, behavior: MockBehavior) -> Self {
            Self {
                name: name.into(),
                behavior: Arc::new(Mutex::new(behavior)),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Succeeds with a single PNG artifact named `result.png`
        pub fn new_success(name: impl Into<String>) -> Self {
            Self::new(
                name,
                MockBehavior::Succeed(vec![Artifact::new(
                    "result.png",
                    b"png-bytes".to_vec(),
                    "image/png",
                )]),
            )
        }

        pub fn new_fail(
            name: impl Into<String>,
            kind: ProcessorErrorKind,
            message: impl Into<String>,
        ) -> Self {
            Self::new(name, MockBehavior::Fail(kind, message.into()))
        }

        pub fn new_panic_inducing(name: impl Into<String>, message: impl Into<String>) -> Self {
            Self::new(name, MockBehavior::Panic(message.into()))
        }

        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn requests(&self) -> Vec<ProcessorRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Processor for ScriptedProcessor {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(&self, request: ProcessorRequest) -> Result<ProcessorOutput, ProcessorError> {
            self.calls.lock().unwrap().push(request);
            let behavior = self.behavior.lock().unwrap().clone();

            match behavior {
                MockBehavior::Succeed(artifacts) => Ok(ProcessorOutput::artifacts(artifacts)),
                MockBehavior::SucceedWithUrls(urls) => Ok(ProcessorOutput {
                    urls,
                    ..ProcessorOutput::default()
                }),
                MockBehavior::Fail(kind, msg) => Err(ProcessorError::new(kind, msg)),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
                MockBehavior::Slow(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(ProcessorOutput::artifacts(vec![Artifact::new(
                        "slow.png",
                        b"slow".to_vec(),
                        "image/png",
                    )]))
                }
            }
        }
    }
}
