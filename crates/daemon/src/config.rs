//! Daemon configuration
//!
//! Read once at startup from the environment (optionally seeded from `.env`)
//! and passed down explicitly.

use anyhow::{bail, Context, Result};
use kiln_core::application::{RetryPolicy, TransferConfig};
use kiln_core::application::worker::constants::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_LEASE_DURATION, DEFAULT_PROCESSOR_TIMEOUT,
    DEFAULT_REAP_INTERVAL, IDLE_SLEEP_DURATION,
};
use kiln_core::domain::WorkflowFilter;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "~/.kiln/jobs.db";
const DEFAULT_BLOB_DIR: &str = "~/.kiln/blobs";
const DEFAULT_BLOB_BASE_URL: &str = "http://127.0.0.1:9641/blobs";
const DEFAULT_COMFYUI_URL: &str = "http://127.0.0.1:8188";
const DEFAULT_FACE_SWAP_URL: &str = "http://127.0.0.1:8000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    Memory,
    /// No local store: workers pull from other Kiln servers over JSON-RPC
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub store: StoreKind,
    pub db_path: PathBuf,
    pub rpc_host: String,
    pub rpc_port: u16,
    /// Kiln servers polled in turn when `store` is `Remote`
    pub task_api_urls: Vec<String>,
    pub task_api_timeout: Duration,

    pub workers: usize,
    pub filter: WorkflowFilter,
    pub poll_interval: Duration,
    pub lease: Duration,
    pub reap_interval: Duration,
    pub heartbeat_interval: Duration,
    pub processor_timeout: Duration,
    pub transfer: TransferConfig,

    pub callback_url: Option<String>,
    pub callback_timeout: Duration,
    pub callback_on_start: bool,

    pub blob_dir: PathBuf,
    pub blob_base_url: String,
    pub comfyui_url: String,
    pub face_swap_url: String,
    pub retention: Duration,

    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
}

impl DaemonConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup (tests pass a map)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let store = match env.string("KILN_STORE").as_deref() {
            None | Some("sqlite") => StoreKind::Sqlite,
            Some("memory") => StoreKind::Memory,
            Some("remote") => StoreKind::Remote,
            Some(other) => bail!(
                "KILN_STORE must be 'sqlite', 'memory' or 'remote', got '{}'",
                other
            ),
        };
        let log_format = match env.string("KILN_LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => bail!("KILN_LOG_FORMAT must be 'pretty' or 'json', got '{}'", other),
        };

        let retry = RetryPolicy::new(
            env.parse("KILN_TRANSFER_RETRIES", 3u32)?,
            Duration::from_millis(env.parse("KILN_RETRY_BASE_MS", 1000u64)?),
            Duration::from_millis(env.parse("KILN_RETRY_MAX_MS", 8000u64)?),
        );
        let transfer = TransferConfig {
            fetch_concurrency: env.parse("KILN_FETCH_CONCURRENCY", 10usize)?,
            publish_concurrency: env.parse("KILN_PUBLISH_CONCURRENCY", 4usize)?,
            retry,
            fetch_timeout: env.secs("KILN_FETCH_TIMEOUT_SECS", Duration::from_secs(60))?,
            publish_timeout: env.secs("KILN_PUBLISH_TIMEOUT_SECS", Duration::from_secs(60))?,
            ..TransferConfig::default()
        };

        let config = Self {
            store,
            db_path: env.path("KILN_DB_PATH", DEFAULT_DB_PATH),
            rpc_host: env.string("KILN_RPC_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            rpc_port: env.parse("KILN_RPC_PORT", 9640u16)?,
            task_api_urls: env
                .string("KILN_TASK_API_URLS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|url| !url.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            task_api_timeout: env.secs("KILN_TASK_API_TIMEOUT_SECS", Duration::from_secs(10))?,

            workers: env.parse("KILN_WORKERS", 1usize)?,
            filter: WorkflowFilter::parse(&env.string("KILN_ALLOWED_WORKFLOWS").unwrap_or_default()),
            poll_interval: Duration::from_millis(env.parse(
                "KILN_POLL_INTERVAL_MS",
                IDLE_SLEEP_DURATION.as_millis() as u64,
            )?),
            lease: env.secs("KILN_LEASE_SECS", DEFAULT_LEASE_DURATION)?,
            reap_interval: env.secs("KILN_REAP_INTERVAL_SECS", DEFAULT_REAP_INTERVAL)?,
            heartbeat_interval: env.secs("KILN_HEARTBEAT_SECS", DEFAULT_HEARTBEAT_INTERVAL)?,
            processor_timeout: env.secs("KILN_PROCESSOR_TIMEOUT_SECS", DEFAULT_PROCESSOR_TIMEOUT)?,
            transfer,

            callback_url: env.string("KILN_CALLBACK_URL"),
            callback_timeout: env.secs("KILN_CALLBACK_TIMEOUT_SECS", Duration::from_secs(10))?,
            callback_on_start: env.parse("KILN_CALLBACK_ON_START", false)?,

            blob_dir: env.path("KILN_BLOB_DIR", DEFAULT_BLOB_DIR),
            blob_base_url: env
                .string("KILN_BLOB_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BLOB_BASE_URL.to_string()),
            comfyui_url: env
                .string("KILN_COMFYUI_URL")
                .unwrap_or_else(|| DEFAULT_COMFYUI_URL.to_string()),
            face_swap_url: env
                .string("KILN_FACE_SWAP_URL")
                .unwrap_or_else(|| DEFAULT_FACE_SWAP_URL.to_string()),
            retention: Duration::from_secs(env.parse("KILN_RETENTION_DAYS", 7u64)? * 24 * 3600),

            log_format,
            log_dir: env.string("KILN_LOG_DIR").map(|dir| expand(&dir)),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("KILN_WORKERS must be at least 1");
        }
        for (key, value) in [
            ("KILN_POLL_INTERVAL_MS", self.poll_interval),
            ("KILN_LEASE_SECS", self.lease),
            ("KILN_REAP_INTERVAL_SECS", self.reap_interval),
            ("KILN_HEARTBEAT_SECS", self.heartbeat_interval),
            ("KILN_PROCESSOR_TIMEOUT_SECS", self.processor_timeout),
            ("KILN_FETCH_TIMEOUT_SECS", self.transfer.fetch_timeout),
            ("KILN_PUBLISH_TIMEOUT_SECS", self.transfer.publish_timeout),
            ("KILN_CALLBACK_TIMEOUT_SECS", self.callback_timeout),
            ("KILN_TASK_API_TIMEOUT_SECS", self.task_api_timeout),
        ] {
            if value.is_zero() {
                bail!("{} must be greater than zero", key);
            }
        }
        for (key, value) in [
            ("KILN_FETCH_CONCURRENCY", self.transfer.fetch_concurrency),
            ("KILN_PUBLISH_CONCURRENCY", self.transfer.publish_concurrency),
        ] {
            if value == 0 {
                bail!("{} must be at least 1", key);
            }
        }
        if self.store == StoreKind::Remote && self.task_api_urls.is_empty() {
            bail!("KILN_STORE=remote requires KILN_TASK_API_URLS");
        }
        if self.lease <= self.heartbeat_interval {
            bail!(
                "KILN_LEASE_SECS ({}s) must exceed KILN_HEARTBEAT_SECS ({}s)",
                self.lease.as_secs(),
                self.heartbeat_interval.as_secs()
            );
        }
        for (key, url) in [
            ("KILN_COMFYUI_URL", Some(&self.comfyui_url)),
            ("KILN_FACE_SWAP_URL", Some(&self.face_swap_url)),
            ("KILN_BLOB_BASE_URL", Some(&self.blob_base_url)),
            ("KILN_CALLBACK_URL", self.callback_url.as_ref()),
        ]
        .into_iter()
        .chain(
            self.task_api_urls
                .iter()
                .map(|url| ("KILN_TASK_API_URLS", Some(url))),
        ) {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    bail!("{} must be an http(s) URL, got '{}'", key, url);
                }
            }
        }
        Ok(())
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty trimmed value
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e| anyhow::anyhow!("{}", e))
                .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }

    fn path(&self, key: &str, default: &str) -> PathBuf {
        expand(&self.string(key).unwrap_or_else(|| default.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<DaemonConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DaemonConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.store, StoreKind::Sqlite);
        assert!(config.db_path.ends_with(".kiln/jobs.db"));
        assert!(!config.db_path.starts_with("~"));
        assert_eq!(config.rpc_port, 9640);
        assert_eq!(config.workers, 1);
        assert_eq!(config.filter, WorkflowFilter::Any);
        assert_eq!(config.lease, Duration::from_secs(300));
        assert_eq!(config.transfer.fetch_concurrency, 10);
        assert_eq!(config.transfer.publish_concurrency, 4);
        assert_eq!(config.transfer.retry, RetryPolicy::default());
        assert_eq!(config.retention, Duration::from_secs(7 * 24 * 3600));
        assert!(config.callback_url.is_none());
        assert!(!config.callback_on_start);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("KILN_STORE", "memory"),
            ("KILN_WORKERS", "4"),
            ("KILN_ALLOWED_WORKFLOWS", "face_swap, comfyui_portrait"),
            ("KILN_RETRY_BASE_MS", "250"),
            ("KILN_CALLBACK_URL", "https://hooks.example.com/kiln"),
            ("KILN_CALLBACK_ON_START", "true"),
            ("KILN_LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.workers, 4);
        assert!(config.filter.matches("face_swap"));
        assert!(!config.filter.matches("comfyui_other"));
        assert_eq!(config.transfer.retry.base_delay, Duration::from_millis(250));
        assert_eq!(
            config.callback_url.as_deref(),
            Some("https://hooks.example.com/kiln")
        );
        assert!(config.callback_on_start);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_values_fail_fast() {
        let err = load(&[("KILN_WORKERS", "many")]).unwrap_err();
        assert!(format!("{:#}", err).contains("KILN_WORKERS"));

        assert!(load(&[("KILN_WORKERS", "0")]).is_err());
        assert!(load(&[("KILN_STORE", "postgres")]).is_err());
        assert!(load(&[("KILN_CALLBACK_URL", "ftp://x")]).is_err());
        assert!(load(&[("KILN_LEASE_SECS", "10"), ("KILN_HEARTBEAT_SECS", "30")]).is_err());
    }

    #[test]
    fn test_zero_intervals_and_timeouts_fail_fast() {
        for key in [
            "KILN_POLL_INTERVAL_MS",
            "KILN_REAP_INTERVAL_SECS",
            "KILN_HEARTBEAT_SECS",
            "KILN_PROCESSOR_TIMEOUT_SECS",
            "KILN_FETCH_TIMEOUT_SECS",
            "KILN_PUBLISH_TIMEOUT_SECS",
            "KILN_CALLBACK_TIMEOUT_SECS",
            "KILN_TASK_API_TIMEOUT_SECS",
            "KILN_FETCH_CONCURRENCY",
            "KILN_PUBLISH_CONCURRENCY",
        ] {
            let err = load(&[(key, "0")]).unwrap_err();
            assert!(format!("{:#}", err).contains(key), "{}: {:#}", key, err);
        }
    }

    #[test]
    fn test_remote_store_needs_task_api_urls() {
        assert!(load(&[("KILN_STORE", "remote")]).is_err());
        assert!(load(&[
            ("KILN_STORE", "remote"),
            ("KILN_TASK_API_URLS", "http://a:9640, ftp://b")
        ])
        .is_err());

        let config = load(&[
            ("KILN_STORE", "remote"),
            ("KILN_TASK_API_URLS", "http://a:9640, https://b.example.com ,"),
        ])
        .unwrap();
        assert_eq!(config.store, StoreKind::Remote);
        assert_eq!(
            config.task_api_urls,
            vec!["http://a:9640".to_string(), "https://b.example.com".to_string()]
        );
        assert_eq!(config.task_api_timeout, Duration::from_secs(10));
    }
}
