// Kiln Infrastructure - HTTP Adapters
// Implements: ResourceFetcher, CallbackNotifier, Processor (ComfyUI, face swap), BlobStore (local dir)

pub mod blob_store;
pub mod callback;
pub mod comfyui;
mod engine;
pub mod face_swap;
pub mod fetcher;

pub use blob_store::LocalBlobStore;
pub use callback::HttpCallbackNotifier;
pub use comfyui::{ComfyUiConfig, ComfyUiProcessor};
pub use face_swap::{FaceSwapConfig, FaceSwapProcessor};
pub use fetcher::HttpResourceFetcher;
