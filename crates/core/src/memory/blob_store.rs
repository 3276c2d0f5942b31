// In-process Blob Store (single process, lost on restart)

use crate::port::{BlobStore, TransferError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

pub struct InMemoryBlobStore {
    base_url: String,
    blobs: RwLock<HashMap<String, StoredBlob>>,
}

impl InMemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            blobs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<StoredBlob> {
        self.blobs.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, TransferError> {
        if key.is_empty() {
            return Err(TransferError::InvalidLocator("empty key".to_string()));
        }
        self.blobs.write().await.insert(
            key.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(self.locator(key))
    }

    async fn exists(&self, key: &str) -> Result<bool, TransferError> {
        Ok(self.blobs.read().await.contains_key(key))
    }

    fn locator(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}
