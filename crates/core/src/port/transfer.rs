// Transfer Ports - remote resource fetch and the shared transfer error

use async_trait::async_trait;
use thiserror::Error;

/// Per-item fetch/publish failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferError {
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<TransferError>,
    },
}

impl TransferError {
    /// Network timeouts, connection failures, 5xx and throttling responses
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::Timeout(_) | TransferError::Connect(_) | TransferError::Storage(_) => {
                true
            }
            TransferError::Status { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            TransferError::InvalidLocator(_) | TransferError::Exhausted { .. } => false,
        }
    }
}

/// Remote resource fetch (HTTP GET semantics, 2xx = success)
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransferError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    enum Script {
        Bytes(Vec<u8>),
        Fail(TransferError),
        /// Fail this many times, then serve the bytes
        Flaky(VecDeque<TransferError>, Vec<u8>),
    }

    /// Scripted fetcher counting calls per URL and peak concurrency
    pub struct MockFetcher {
        scripts: Mutex<HashMap<String, Script>>,
        calls: Mutex<HashMap<String, usize>>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl Default for MockFetcher {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockFetcher {
        pub fn new() -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                calls: Mutex::new(HashMap::new()),
                delay: Duration::ZERO,
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }
        }

        /// Hold every fetch for `delay` (to observe concurrency)
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn respond(self, url: &str, bytes: &[u8]) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(url.to_string(), Script::Bytes(bytes.to_vec()));
            self
        }

        pub fn fail(self, url: &str, error: TransferError) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(url.to_string(), Script::Fail(error));
            self
        }

        pub fn flaky(self, url: &str, failures: Vec<TransferError>, bytes: &[u8]) -> Self {
            self.scripts.lock().unwrap().insert(
                url.to_string(),
                Script::Flaky(failures.into(), bytes.to_vec()),
            );
            self
        }

        pub fn calls(&self, url: &str) -> usize {
            self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
        }

        pub fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }

        pub fn peak_in_flight(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceFetcher for MockFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransferError> {
            *self.calls.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let result = {
                let mut scripts = self.scripts.lock().unwrap();
                match scripts.get_mut(url) {
                    None => Err(TransferError::Status {
                        status: 404,
                        message: "not scripted".to_string(),
                    }),
                    Some(Script::Bytes(bytes)) => Ok(bytes.clone()),
                    Some(Script::Fail(err)) => Err(err.clone()),
                    Some(Script::Flaky(failures, bytes)) => match failures.pop_front() {
                        Some(err) => Err(err),
                        None => Ok(bytes.clone()),
                    },
                }
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }
}
