// Maintenance - periodic purge of finished jobs

use crate::application::worker::ShutdownToken;
use crate::error::Result;
use crate::port::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

/// Maintenance scheduler
///
/// Deletes COMPLETED/FAILED jobs once they are older than the retention window.
pub struct MaintenanceScheduler {
    store: Arc<dyn JobStore>,
    retention: Duration,
    every: Duration,
}

impl MaintenanceScheduler {
    /// # Arguments
    /// * `store` - Job store to purge
    /// * `retention` - How long finished jobs stay queryable
    /// * `every` - How often to run
    pub fn new(store: Arc<dyn JobStore>, retention: Duration, every: Duration) -> Self {
        Self {
            store,
            retention,
            every,
        }
    }

    /// Run maintenance immediately
    pub async fn run_now(&self) -> Result<u64> {
        let purged = self.store.purge_finished(self.retention).await?;
        info!(
            purged,
            retention_days = self.retention.as_secs() / 86_400,
            "Maintenance completed"
        );
        Ok(purged)
    }

    /// Maintenance loop until shutdown
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.every.as_secs(),
            retention_days = self.retention.as_secs() / 86_400,
            "Maintenance scheduler started"
        );
        let mut tick = interval(self.every);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.run_now().await {
                        error!(error = %e, "Scheduled maintenance failed");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
        info!("Maintenance scheduler stopped");
    }
}
