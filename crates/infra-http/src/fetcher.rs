// HTTP Resource Fetcher (plain GET, 2xx = success)

use crate::engine::truncate;
use async_trait::async_trait;
use kiln_core::port::processor::is_remote_url;
use kiln_core::port::{ResourceFetcher, TransferError};
use std::time::Duration;

pub struct HttpResourceFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpResourceFetcher {
    /// `timeout` bounds one whole request (connect + body)
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), timeout)
    }

    /// Reuse an existing client (connection pooling)
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

pub(crate) fn classify(err: reqwest::Error, timeout: Duration) -> TransferError {
    if err.is_timeout() {
        TransferError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
    } else if err.is_builder() {
        TransferError::InvalidLocator(err.to_string())
    } else {
        TransferError::Connect(err.to_string())
    }
}

#[async_trait]
impl ResourceFetcher for HttpResourceFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransferError> {
        if !is_remote_url(url) {
            return Err(TransferError::InvalidLocator(url.to_string()));
        }

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransferError::Status {
                status: status.as_u16(),
                message: truncate(&body),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify(e, self.timeout))?;
        Ok(bytes.to_vec())
    }
}
