//! Tracing setup: console (pretty or JSON) plus an optional daily log file

use crate::config::{DaemonConfig, LogFormat};
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "kiln=info";

/// Install the global subscriber; keep the returned guard alive to flush the file writer
pub fn init(config: &DaemonConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("invalid log filter")?;

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "kiln.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let base = tracing_subscriber::registry().with(env_filter).with(file_layer);
    match config.log_format {
        LogFormat::Json => base.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => base.with(fmt::layer().pretty()).try_init(),
    }
    .context("failed to install tracing subscriber")?;

    Ok(guard)
}
