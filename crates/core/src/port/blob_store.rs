// Blob Store Port
// Any backend satisfying put/exists is interchangeable

use super::transfer::TransferError;
use async_trait::async_trait;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `key` and return a publicly resolvable locator
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<String, TransferError>;

    async fn exists(&self, key: &str) -> Result<bool, TransferError>;

    /// Locator a stored key resolves to (no I/O)
    fn locator(&self, key: &str) -> String;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory blob store with injectable failures
    pub struct MockBlobStore {
        base_url: String,
        blobs: Mutex<HashMap<String, (Vec<u8>, String)>>,
        /// Keys ending in one of these names fail on put
        failing: Mutex<HashSet<String>>,
        puts: Mutex<Vec<String>>,
        delays: Mutex<HashMap<String, Duration>>,
    }

    impl MockBlobStore {
        pub fn new(base_url: impl Into<String>) -> Self {
            Self {
                base_url: base_url.into(),
                blobs: Mutex::new(HashMap::new()),
                failing: Mutex::new(HashSet::new()),
                puts: Mutex::new(Vec::new()),
                delays: Mutex::new(HashMap::new()),
            }
        }

        pub fn fail_name(&self, name: &str) {
            self.failing.lock().unwrap().insert(name.to_string());
        }

        /// Delay puts of keys ending in `name`
        pub fn delay_name(&self, name: &str, delay: Duration) {
            self.delays.lock().unwrap().insert(name.to_string(), delay);
        }

        pub fn get(&self, key: &str) -> Option<Vec<u8>> {
            self.blobs.lock().unwrap().get(key).map(|(b, _)| b.clone())
        }

        /// Keys in put order (including failed attempts)
        pub fn puts(&self) -> Vec<String> {
            self.puts.lock().unwrap().clone()
        }

        fn name_matches(set: &HashSet<String>, key: &str) -> bool {
            set.iter().any(|name| key.ends_with(&format!("/{}", name)) || key == name)
        }
    }

    #[async_trait]
    impl BlobStore for MockBlobStore {
        async fn put(
            &self,
            key: &str,
            bytes: Vec<u8>,
            content_type: &str,
        ) -> Result<String, TransferError> {
            self.puts.lock().unwrap().push(key.to_string());

            let delay = self
                .delays
                .lock()
                .unwrap()
                .iter()
                .find(|(name, _)| key.ends_with(name.as_str()))
                .map(|(_, d)| *d);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if Self::name_matches(&self.failing.lock().unwrap(), key) {
                return Err(TransferError::Status {
                    status: 403,
                    message: format!("write to {} denied", key),
                });
            }
            self.blobs
                .lock()
                .unwrap()
                .insert(key.to_string(), (bytes, content_type.to_string()));
            Ok(self.locator(key))
        }

        async fn exists(&self, key: &str) -> Result<bool, TransferError> {
            Ok(self.blobs.lock().unwrap().contains_key(key))
        }

        fn locator(&self, key: &str) -> String {
            format!("{}/{}", self.base_url.trim_end_matches('/'), key)
        }
    }
}
