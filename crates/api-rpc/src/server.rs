//! JSON-RPC Server
//!
//! JSON-RPC 2.0 over HTTP (jsonrpsee), bound to a configurable TCP address.

use crate::handler::RpcHandler;
use crate::types::{CreateJobParams, FetchParams, FinalizeParams, GetJobParams, OwnedJobParams};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use kiln_core::application::JobService;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9640;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

/// Register one method whose params parse into `$params` and which calls `$method`
macro_rules! register {
    ($module:expr, $handler:expr, $name:literal, $params:ty, $method:ident) => {{
        let handler = Arc::clone(&$handler);
        $module
            .register_async_method($name, move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: $params = params.parse()?;
                    handler.$method(req).await
                }
            })
            .map_err(|e| e.to_string())?;
    }};
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, service: Arc<JobService>) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(service)),
        }
    }

    /// All methods, without a transport
    pub fn module(&self) -> Result<RpcModule<()>, String> {
        let mut module = RpcModule::new(());

        register!(module, self.handler, "job.create.v1", CreateJobParams, create);
        register!(module, self.handler, "job.get.v1", GetJobParams, get);

        // Params are optional here: no params means any workflow
        let handler = Arc::clone(&self.handler);
        module
            .register_async_method("queue.fetch.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: Option<FetchParams> = params.parse()?;
                    handler.fetch(req.unwrap_or_default()).await
                }
            })
            .map_err(|e| e.to_string())?;

        register!(module, self.handler, "job.start.v1", OwnedJobParams, start);
        register!(module, self.handler, "job.heartbeat.v1", OwnedJobParams, heartbeat);
        register!(module, self.handler, "job.finalize.v1", FinalizeParams, finalize);

        let handler = Arc::clone(&self.handler);
        module
            .register_async_method("admin.stats.v1", move |_, _, _| {
                let handler = handler.clone();
                async move { handler.stats().await }
            })
            .map_err(|e| e.to_string())?;

        Ok(module)
    }

    /// Bind and start serving; returns the bound address (port 0 picks a free one)
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let module = self.module()?;
        let handle = server.start(module);

        info!(addr = %local_addr, "JSON-RPC server started");
        Ok((local_addr, handle))
    }
}
