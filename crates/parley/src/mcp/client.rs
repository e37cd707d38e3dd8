use rmcp::model::{
    CallToolRequestParam, Content as RmcpContent, RawContent, ResourceContents, Tool as RmcpTool,
};
use rmcp::service::{RunningService, ServiceExt};
use rmcp::transport::SseClientTransport;
use rmcp::RoleClient;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{McpError, McpResult};
use crate::models::content::Content;
use crate::models::tool::Tool;

#[derive(Debug, Clone)]
pub struct McpClientConfig {
    pub sse_url: String,
    pub timeout: Duration,
    pub log_requests: bool,
    pub log_responses: bool,
}

impl McpClientConfig {
    pub fn new(sse_url: impl Into<String>) -> Self {
        Self {
            sse_url: sse_url.into(),
            timeout: Duration::from_secs(60),
            log_requests: false,
            log_responses: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_logging(mut self, log_requests: bool, log_responses: bool) -> Self {
        self.log_requests = log_requests;
        self.log_responses = log_responses;
        self
    }
}

/// The result of a remote tool call, converted to agent content
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: Vec<Content>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(Content::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// An initialized session with one MCP server
pub struct McpClient {
    service: RunningService<RoleClient, ()>,
    server_name: String,
    config: McpClientConfig,
}

impl McpClient {
    /// Open the event stream and perform the initialize handshake
    pub async fn connect(config: &McpClientConfig) -> McpResult<Self> {
        let connection_error = |reason: String| McpError::Connection {
            url: config.sse_url.clone(),
            reason,
        };

        let handshake = async {
            let transport = SseClientTransport::start(config.sse_url.as_str())
                .await
                .map_err(|e| connection_error(e.to_string()))?;
            ().serve(transport)
                .await
                .map_err(|e| connection_error(e.to_string()))
        };
        let service = tokio::time::timeout(config.timeout, handshake)
            .await
            .map_err(|_| {
                connection_error(format!("timed out after {}s", config.timeout.as_secs()))
            })??;

        let server_name = match service.peer_info() {
            Some(init) => {
                info!(
                    server = %init.server_info.name,
                    protocol = ?init.protocol_version,
                    "connected to MCP server"
                );
                init.server_info.name.clone()
            }
            None => "unknown".to_string(),
        };

        Ok(Self {
            service,
            server_name,
            config: config.clone(),
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// All tools the server offers, across every page
    pub async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        if self.config.log_requests {
            debug!(server = %self.server_name, "MCP request: tools/list");
        }
        let tools = with_timeout(self.config.timeout, "tools/list", async {
            self.service
                .list_all_tools()
                .await
                .map_err(|e| McpError::Service(e.to_string()))
        })
        .await?;
        if self.config.log_responses {
            debug!(server = %self.server_name, count = tools.len(), "MCP response: tools/list");
        }
        Ok(tools.into_iter().map(convert_tool).collect())
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<ToolOutput> {
        if self.config.log_requests {
            debug!(
                server = %self.server_name,
                tool = %name,
                arguments = %arguments,
                "MCP request: tools/call"
            );
        }
        let result = with_timeout(self.config.timeout, "tools/call", async {
            self.service
                .call_tool(CallToolRequestParam {
                    name: name.to_string().into(),
                    arguments: arguments.as_object().cloned(),
                })
                .await
                .map_err(|e| McpError::Service(e.to_string()))
        })
        .await?;

        let output = ToolOutput {
            content: result.content.into_iter().filter_map(convert_content).collect(),
            is_error: result.is_error.unwrap_or(false),
        };
        if self.config.log_responses {
            debug!(
                server = %self.server_name,
                tool = %name,
                is_error = output.is_error,
                "MCP response: tools/call"
            );
        }
        Ok(output)
    }

    /// Cancel the session and wait for the transport to shut down
    pub async fn close(self) -> McpResult<()> {
        self.service
            .cancel()
            .await
            .map(|_| ())
            .map_err(|e| McpError::Service(e.to_string()))
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    what: &str,
    fut: impl Future<Output = McpResult<T>>,
) -> McpResult<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| McpError::Timeout(timeout.as_secs(), what.to_string()))?
}

fn convert_tool(tool: RmcpTool) -> Tool {
    Tool::new(
        tool.name.to_string(),
        tool.description.map(|d| d.to_string()).unwrap_or_default(),
        Value::Object(tool.input_schema.as_ref().clone()),
    )
}

/// Text, images and embedded text resources survive; everything else is dropped
fn convert_content(content: RmcpContent) -> Option<Content> {
    match content.raw {
        RawContent::Text(t) => Some(Content::text(t.text)),
        RawContent::Image(i) => Some(Content::image(i.data, i.mime_type)),
        RawContent::Resource(r) => match r.resource {
            ResourceContents::TextResourceContents { text, .. } => Some(Content::text(text)),
            ResourceContents::BlobResourceContents { .. } => None,
        },
        _ => None,
    }
}
