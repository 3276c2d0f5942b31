// Port Layer - Interfaces for external dependencies

pub mod blob_store;
pub mod callback;
pub mod id_provider; // For deterministic testing
pub mod job_source;
pub mod job_store;
pub mod processor;
pub mod time_provider;
pub mod transfer;

// Re-exports
pub use blob_store::BlobStore;
pub use callback::{CallbackNotifier, CallbackPayload, DeliveryError};
pub use id_provider::IdProvider;
pub use job_source::JobSource;
pub use job_store::{JobStore, QueueStats};
pub use processor::{
    Artifact, InputRef, Processor, ProcessorError, ProcessorErrorKind, ProcessorOutput,
    ProcessorRequest,
};
pub use time_provider::TimeProvider;
pub use transfer::{ResourceFetcher, TransferError};
