// Local Blob Store
// Files under a root directory, exposed through a base URL served elsewhere

use async_trait::async_trait;
use kiln_core::port::{BlobStore, TransferError};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

pub struct LocalBlobStore {
    root: PathBuf,
    base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, TransferError> {
        let relative = Path::new(key);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !clean {
            return Err(TransferError::InvalidLocator(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.partial", name, Uuid::new_v4().simple()))
}

fn storage_error(err: std::io::Error) -> TransferError {
    TransferError::Storage(err.to_string())
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, TransferError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(storage_error)?;
        }

        // Write then rename so readers never see a partial file; each writer
        // stages under its own name
        let staging = staging_path(&path);
        if let Err(e) = tokio::fs::write(&staging, &bytes).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(storage_error(e));
        }
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(storage_error(e));
        }

        debug!(key = %key, size = bytes.len(), content_type = %content_type, "Blob stored");
        Ok(self.locator(key))
    }

    async fn exists(&self, key: &str) -> Result<bool, TransferError> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path).await.map_err(storage_error)
    }

    fn locator(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}
