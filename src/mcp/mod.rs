//! MCP tool front-end over streamable HTTP

pub mod server;

use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use std::sync::Arc;

use crate::queue::GenerationQueue;

pub use server::{ImageToolServer, GENERATE_IMAGE_TOOL, SERVER_NAME};

/// Stateless streamable HTTP service, mounted by the router at `/mcp`
pub fn streamable_http_service(
    queue: Arc<GenerationQueue>,
) -> StreamableHttpService<ImageToolServer, LocalSessionManager> {
    StreamableHttpService::new(
        move || Ok(ImageToolServer::new(queue.clone())),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig {
            stateful_mode: false,
            ..Default::default()
        },
    )
}
