// Worker constants (no magic values)
use std::time::Duration;

/// Sleep when no job is available
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Sleep after a store error before polling again
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(3);

/// Lease after which a held job without progress is reclaimed (5 minutes)
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(5 * 60);

/// Lease renewal period while a job is held
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Reclaim scan period
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound for a single processor invocation (10 minutes)
pub const DEFAULT_PROCESSOR_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Callback delivery attempts after the first
pub const DEFAULT_CALLBACK_RETRIES: u32 = 2;

/// Finished-job retention for housekeeping (7 days)
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Housekeeping period (1 hour)
pub const DEFAULT_HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(3600);
