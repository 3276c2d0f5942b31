// Application Layer - Use Cases and Business Logic

pub mod job_service;
pub mod maintenance;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod retry;
pub mod transfer;
pub mod worker;

// Re-exports
pub use job_service::{CreateJobRequest, JobService};
pub use maintenance::MaintenanceScheduler;
pub use queue::{JobHandle, JobQueue};
pub use recovery::LeaseReaper;
pub use registry::ProcessorRegistry;
pub use retry::{RetryDecision, RetryPolicy};
pub use transfer::{BatchTransfer, TransferConfig};
pub use worker::{
    shutdown_channel, ShutdownSender, ShutdownToken, Worker, WorkerConfig, WorkerDeps,
};
