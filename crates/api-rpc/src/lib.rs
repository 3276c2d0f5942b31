//! JSON-RPC API Layer
//!
//! JSON-RPC 2.0 server for Kiln: job creation and polling for producers,
//! pull-style claim and lifecycle calls for out-of-process workers. The
//! `client` module is the worker side of those calls.

pub mod client;
pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use client::RpcJobSource;
pub use jsonrpsee::server::ServerHandle;
pub use server::{RpcServer, RpcServerConfig};
