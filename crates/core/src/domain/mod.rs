// Domain Layer - Pure business logic and entities

pub mod error;
pub mod job;
pub mod queue;

// Re-exports
pub use error::DomainError;
pub use job::{
    FailureKind, Job, JobError, JobHandle, JobId, JobInput, JobOutput, JobStatus, NewJob, Outcome,
    OwnerToken,
};
pub use queue::WorkflowFilter;
