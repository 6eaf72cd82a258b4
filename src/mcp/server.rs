//! MCP server advertising the `generate-image` tool

use rmcp::{
    model::{
        Annotations, CallToolRequestParam, CallToolResult, Content, Implementation, JsonObject,
        ListToolsResult, PaginatedRequestParam, Role, ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
    ErrorData as McpError, RoleServer, ServerHandler,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::generation::encoding::PNG_MIME_TYPE;
use crate::generation::GenerationRequest;
use crate::queue::GenerationQueue;

pub const SERVER_NAME: &str = "z-image-turbo";
pub const GENERATE_IMAGE_TOOL: &str = "generate-image";

#[derive(Clone)]
pub struct ImageToolServer {
    queue: Arc<GenerationQueue>,
}

impl ImageToolServer {
    pub fn new(queue: Arc<GenerationQueue>) -> Self {
        Self { queue }
    }

    /// Tools advertised to clients
    pub fn tools(&self) -> Vec<Tool> {
        vec![Tool::new(
            GENERATE_IMAGE_TOOL,
            "Generate an image based on a text prompt.",
            Arc::new(generate_image_schema()),
        )]
    }

    /// Dispatch a tool call by name.
    ///
    /// Generation failures come back as a text content item with
    /// `is_error` set; only an unknown tool name is a protocol error.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, McpError> {
        if name != GENERATE_IMAGE_TOOL {
            warn!(tool = name, "Unknown tool requested");
            return Err(McpError::invalid_params(format!("Unknown tool: {}", name), None));
        }

        let request: GenerationRequest =
            match serde_json::from_value(Value::Object(arguments.unwrap_or_default())) {
                Ok(request) => request,
                Err(e) => return Ok(error_result(e)),
            };

        info!(tool = name, prompt = %request.prompt, "Tool call");
        match self.queue.submit(request).await {
            Ok(result) => Ok(CallToolResult::success(vec![image_content(result.image_base64)])),
            Err(e) => {
                warn!(error = %e, "Tool generation failed");
                Ok(error_result(e))
            }
        }
    }
}

impl ServerHandler for ImageToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Implementation::from_build_env()
            },
            instructions: Some("Call generate-image with a prompt to create a PNG image.".to_string()),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.tools()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.invoke(&request.name, request.arguments).await
    }
}

fn generate_image_schema() -> JsonObject {
    let schema = json!({
        "type": "object",
        "required": ["prompt"],
        "properties": {
            "prompt": {"type": "string", "description": "The text prompt to generate the image from"},
            "height": {"type": "integer", "default": 1024, "description": "Height of the image"},
            "width": {"type": "integer", "default": 1024, "description": "Width of the image"},
            "steps": {"type": "integer", "default": 8, "description": "Number of inference steps"},
            "guidance_scale": {"type": "number", "default": 0.0, "description": "Guidance scale"},
            "seed": {"type": "integer", "default": -1, "description": "Random seed"}
        }
    });
    match schema {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}

fn image_content(data: String) -> Content {
    let mut content = Content::image(data, PNG_MIME_TYPE);
    content.annotations = Some(Annotations {
        audience: Some(vec![Role::User]),
        priority: Some(1.0),
        ..Default::default()
    });
    content
}

fn error_result(error: impl std::fmt::Display) -> CallToolResult {
    CallToolResult::error(vec![Content::text(format!("Error generating image: {}", error))])
}
