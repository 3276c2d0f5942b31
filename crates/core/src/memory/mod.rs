// In-process implementations of core ports

pub mod blob_store;
pub mod job_store;

pub use blob_store::{InMemoryBlobStore, StoredBlob};
pub use job_store::InMemoryJobStore;
