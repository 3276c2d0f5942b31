// Batch Transfer Engine
// Bounded-concurrency fetch of remote inputs and publish of results

use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::port::{Artifact, BlobStore, ResourceFetcher, TransferError};
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Concurrency ceilings, retry policy and per-attempt timeouts
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub fetch_concurrency: usize,
    pub publish_concurrency: usize,
    pub retry: RetryPolicy,
    pub fetch_timeout: Duration,
    pub publish_timeout: Duration,
    /// First path segment of published keys
    pub key_prefix: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: 10,
            publish_concurrency: 4,
            retry: RetryPolicy::default(),
            fetch_timeout: Duration::from_secs(60),
            publish_timeout: Duration::from_secs(60),
            key_prefix: "results".to_string(),
        }
    }
}

/// Per-URL fetch results
pub type FetchResults = HashMap<String, Result<Vec<u8>, TransferError>>;

/// Per-item publish results, in input order
pub type PublishResults = Vec<(String, Result<String, TransferError>)>;

pub struct BatchTransfer {
    fetcher: Arc<dyn ResourceFetcher>,
    blob_store: Arc<dyn BlobStore>,
    config: TransferConfig,
    fetch_slots: Semaphore,
    publish_slots: Semaphore,
}

impl BatchTransfer {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        blob_store: Arc<dyn BlobStore>,
        config: TransferConfig,
    ) -> Self {
        Self {
            fetch_slots: Semaphore::new(config.fetch_concurrency.max(1)),
            publish_slots: Semaphore::new(config.publish_concurrency.max(1)),
            fetcher,
            blob_store,
            config,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Fetch every distinct URL once; one item's failure never aborts the others
    pub async fn fetch_many<I, S>(&self, urls: I) -> FetchResults
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let unique: BTreeSet<String> = urls.into_iter().map(Into::into).collect();

        let transfers = unique.into_iter().map(|url| async move {
            let fetcher = &self.fetcher;
            let result = self
                .with_retry(
                    &url,
                    &self.fetch_slots,
                    self.config.fetch_timeout,
                    || fetcher.fetch(&url),
                )
                .await;
            if let Err(e) = &result {
                warn!(url = %url, error = %e, "Fetch failed");
            }
            (url, result)
        });

        join_all(transfers).await.into_iter().collect()
    }

    /// Publish artifacts under `{key_prefix}/{scope}/{name}`
    ///
    /// A key already present in the blob store (from an earlier attempt of the
    /// same job) is not uploaded again; its locator is returned as is.
    pub async fn publish_many(&self, scope: &str, items: Vec<Artifact>) -> PublishResults {
        let transfers = items.into_iter().map(|artifact| async move {
            let result = match self.object_key(scope, &artifact.name) {
                Ok(key) => self.publish_one(&key, &artifact).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                warn!(scope = %scope, name = %artifact.name, error = %e, "Publish failed");
            }
            (artifact.name, result)
        });

        join_all(transfers).await
    }

    async fn publish_one(&self, key: &str, artifact: &Artifact) -> Result<String, TransferError> {
        let blob_store = &self.blob_store;
        self.with_retry(key, &self.publish_slots, self.config.publish_timeout, || async move {
            if blob_store.exists(key).await? {
                debug!(key = %key, "Artifact already published, skipping upload");
                return Ok(blob_store.locator(key));
            }
            blob_store
                .put(key, artifact.bytes.clone(), &artifact.content_type)
                .await
        })
        .await
    }

    fn object_key(&self, scope: &str, name: &str) -> Result<String, TransferError> {
        let valid = |s: &str| {
            !s.is_empty() && !s.contains("..") && !s.starts_with('/') && !s.contains('\\')
        };
        if !valid(scope) || !valid(name) {
            return Err(TransferError::InvalidLocator(format!("{}/{}", scope, name)));
        }
        Ok(format!(
            "{}/{}/{}",
            self.config.key_prefix.trim_end_matches('/'),
            scope,
            name
        ))
    }

    /// Run one item to completion: a slot per attempt, per-attempt timeout,
    /// backoff between transient failures
    async fn with_retry<T, F, Fut>(
        &self,
        item: &str,
        slots: &Semaphore,
        timeout: Duration,
        mut op: F,
    ) -> Result<T, TransferError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransferError>>,
    {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let mut attempt = 0u32;

        loop {
            let result = {
                let _permit = slots
                    .acquire()
                    .await
                    .map_err(|_| TransferError::Storage("transfer slots closed".to_string()))?;
                match tokio::time::timeout(timeout, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(TransferError::Timeout(timeout_ms)),
                }
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err),
            };

            match self.config.retry.decide(attempt, item) {
                RetryDecision::Retry(delay) => {
                    debug!(
                        item = %item,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient transfer failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => {
                    return Err(TransferError::Exhausted {
                        attempts: attempt + 1,
                        last: Box::new(err),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::blob_store::mocks::MockBlobStore;
    use crate::port::transfer::mocks::MockFetcher;

    fn fast_config() -> TransferConfig {
        TransferConfig {
            retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4)),
            fetch_timeout: Duration::from_millis(500),
            publish_timeout: Duration::from_millis(500),
            ..TransferConfig::default()
        }
    }

    fn engine(fetcher: Arc<MockFetcher>, blobs: Arc<MockBlobStore>, config: TransferConfig) -> BatchTransfer {
        BatchTransfer::new(fetcher, blobs, config)
    }

    fn unavailable() -> TransferError {
        TransferError::Status {
            status: 503,
            message: "busy".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fetch_many_deduplicates() {
        let fetcher = Arc::new(
            MockFetcher::new()
                .respond("https://x/a.jpg", b"a")
                .respond("https://x/b.jpg", b"b"),
        );
        let transfer = engine(fetcher.clone(), Arc::new(MockBlobStore::new("mem://")), fast_config());

        let results = transfer
            .fetch_many(["https://x/a.jpg", "https://x/b.jpg", "https://x/a.jpg"])
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(fetcher.calls("https://x/a.jpg"), 1);
        assert_eq!(fetcher.calls("https://x/b.jpg"), 1);
        assert_eq!(results["https://x/a.jpg"].as_deref().unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_fetch_retries_transient_then_succeeds() {
        let fetcher = Arc::new(MockFetcher::new().flaky(
            "https://x/a.jpg",
            vec![unavailable(), TransferError::Connect("reset".into())],
            b"a",
        ));
        let transfer = engine(fetcher.clone(), Arc::new(MockBlobStore::new("mem://")), fast_config());

        let results = transfer.fetch_many(["https://x/a.jpg"]).await;
        assert!(results["https://x/a.jpg"].is_ok());
        assert_eq!(fetcher.calls("https://x/a.jpg"), 3);
    }

    #[tokio::test]
    async fn test_fetch_exhausts_and_isolates_failure() {
        let fetcher = Arc::new(
            MockFetcher::new()
                .respond("https://x/ok.jpg", b"ok")
                .fail("https://x/down.jpg", unavailable()),
        );
        let transfer = engine(fetcher.clone(), Arc::new(MockBlobStore::new("mem://")), fast_config());

        let results = transfer
            .fetch_many(["https://x/ok.jpg", "https://x/down.jpg"])
            .await;

        assert!(results["https://x/ok.jpg"].is_ok());
        match &results["https://x/down.jpg"] {
            Err(TransferError::Exhausted { attempts, .. }) => assert_eq!(*attempts, 4),
            other => panic!("expected exhausted, got {:?}", other),
        }
        // 1 try + 3 retries
        assert_eq!(fetcher.calls("https://x/down.jpg"), 4);
    }

    #[tokio::test]
    async fn test_fetch_permanent_error_not_retried() {
        let fetcher = Arc::new(MockFetcher::new().fail(
            "https://x/gone.jpg",
            TransferError::Status {
                status: 404,
                message: "not found".into(),
            },
        ));
        let transfer = engine(fetcher.clone(), Arc::new(MockBlobStore::new("mem://")), fast_config());

        let results = transfer.fetch_many(["https://x/gone.jpg"]).await;
        assert!(matches!(
            results["https://x/gone.jpg"],
            Err(TransferError::Status { status: 404, .. })
        ));
        assert_eq!(fetcher.calls("https://x/gone.jpg"), 1);
    }

    #[tokio::test]
    async fn test_fetch_timeout_counts_as_failed_attempt() {
        let fetcher = Arc::new(
            MockFetcher::new()
                .with_delay(Duration::from_millis(200))
                .respond("https://x/slow.jpg", b"slow"),
        );
        let config = TransferConfig {
            retry: RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)),
            fetch_timeout: Duration::from_millis(20),
            ..fast_config()
        };
        let transfer = engine(fetcher.clone(), Arc::new(MockBlobStore::new("mem://")), config);

        let results = transfer.fetch_many(["https://x/slow.jpg"]).await;
        match &results["https://x/slow.jpg"] {
            Err(TransferError::Exhausted { attempts, last }) => {
                assert_eq!(*attempts, 2);
                assert!(matches!(**last, TransferError::Timeout(20)));
            }
            other => panic!("expected exhausted timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_concurrency_is_bounded() {
        let urls: Vec<String> = (0..12).map(|i| format!("https://x/{}.jpg", i)).collect();
        let mut fetcher = MockFetcher::new().with_delay(Duration::from_millis(20));
        for url in &urls {
            fetcher = fetcher.respond(url, b"x");
        }
        let fetcher = Arc::new(fetcher);
        let config = TransferConfig {
            fetch_concurrency: 3,
            ..fast_config()
        };
        let transfer = engine(fetcher.clone(), Arc::new(MockBlobStore::new("mem://")), config);

        let results = transfer.fetch_many(urls.clone()).await;
        assert!(results.values().all(|r| r.is_ok()));
        assert!(fetcher.peak_in_flight() <= 3);
        assert_eq!(fetcher.total_calls(), 12);
    }

    #[tokio::test]
    async fn test_publish_preserves_order_with_partial_failure() {
        let blobs = Arc::new(MockBlobStore::new("https://cdn.example.com"));
        blobs.fail_name("n1.png");
        // n2 finishes first
        blobs.delay_name("n1.png", Duration::from_millis(30));
        let transfer = engine(Arc::new(MockFetcher::new()), blobs.clone(), fast_config());

        let results = transfer
            .publish_many(
                "job-1",
                vec![
                    Artifact::new("n1.png", b"one".to_vec(), "image/png"),
                    Artifact::new("n2.png", b"two".to_vec(), "image/png"),
                ],
            )
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "n1.png");
        assert!(results[0].1.is_err());
        assert_eq!(results[1].0, "n2.png");
        assert_eq!(
            results[1].1.as_deref().unwrap(),
            "https://cdn.example.com/results/job-1/n2.png"
        );
        assert_eq!(blobs.get("results/job-1/n2.png").unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_publish_skips_existing_key() {
        let blobs = Arc::new(MockBlobStore::new("mem://blobs"));
        blobs
            .put("results/job-1/out.png", b"first".to_vec(), "image/png")
            .await
            .unwrap();
        let transfer = engine(Arc::new(MockFetcher::new()), blobs.clone(), fast_config());

        let results = transfer
            .publish_many("job-1", vec![Artifact::new("out.png", b"second".to_vec(), "image/png")])
            .await;

        assert_eq!(results[0].1.as_deref().unwrap(), "mem://blobs/results/job-1/out.png");
        assert_eq!(blobs.puts().len(), 1);
        assert_eq!(blobs.get("results/job-1/out.png").unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_publish_rejects_path_escape() {
        let blobs = Arc::new(MockBlobStore::new("mem://blobs"));
        let transfer = engine(Arc::new(MockFetcher::new()), blobs.clone(), fast_config());

        let results = transfer
            .publish_many("job-1", vec![Artifact::new("../../etc/passwd", vec![], "text/plain")])
            .await;
        assert!(matches!(results[0].1, Err(TransferError::InvalidLocator(_))));
        assert!(blobs.puts().is_empty());
    }
}
