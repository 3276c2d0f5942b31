// Lease recovery - returns abandoned jobs to PENDING
use crate::application::worker::ShutdownToken;
use crate::domain::JobId;
use crate::port::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

/// Periodically reclaims jobs whose owner stopped making progress
///
/// Safe to run in any number of processes at once: the store makes each
/// reclaim atomic with respect to claim and finalize.
pub struct LeaseReaper {
    store: Arc<dyn JobStore>,
    lease: Duration,
    scan_interval: Duration,
}

impl LeaseReaper {
    pub fn new(store: Arc<dyn JobStore>, lease: Duration, scan_interval: Duration) -> Self {
        Self {
            store,
            lease,
            scan_interval,
        }
    }

    /// One reclaim pass
    pub async fn run_once(&self) -> crate::error::Result<Vec<JobId>> {
        let reclaimed = self.store.reclaim_expired(self.lease).await?;
        if !reclaimed.is_empty() {
            info!(
                count = reclaimed.len(),
                lease_secs = self.lease.as_secs(),
                "Reclaimed jobs with expired leases"
            );
        }
        Ok(reclaimed)
    }

    /// Reclaim loop until shutdown (the first pass runs immediately, recovering
    /// jobs orphaned by a previous crash)
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(
            lease_secs = self.lease.as_secs(),
            interval_secs = self.scan_interval.as_secs(),
            "Lease reaper started"
        );
        let mut tick = interval(self.scan_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Lease reclaim failed");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
        info!("Lease reaper stopped");
    }
}
