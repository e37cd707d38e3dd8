//! A small MCP server speaking the HTTP+SSE transport, with a single `add`
//! tool. Clients open `GET /sse`, receive an `endpoint` event naming their
//! message URL, then POST JSON-RPC messages there.

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::transport::sse_server::{SseServer, SseServerConfig};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const SERVER_NAME: &str = "stub-tool-server";

/// Parameters for the add tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddRequest {
    /// The first addend
    pub a: f64,
    /// The second addend
    pub b: f64,
}

#[derive(Clone)]
pub struct Adder {
    tool_router: ToolRouter<Self>,
}

impl Default for Adder {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_router]
impl Adder {
    pub fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Adds two numbers")]
    async fn add(
        &self,
        Parameters(request): Parameters<AddRequest>,
    ) -> Result<CallToolResult, McpError> {
        let sum = format_sum(request.a + request.b);
        info!(a = request.a, b = request.b, %sum, "add");
        Ok(CallToolResult::success(vec![Content::text(sum)]))
    }
}

#[tool_handler]
impl ServerHandler for Adder {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some("Call add to sum two numbers.".into()),
        }
    }
}

/// Whole sums print without a fractional part
fn format_sum(sum: f64) -> String {
    if sum.fract() == 0.0 {
        format!("{}", sum as i64)
    } else {
        sum.to_string()
    }
}

/// Serve the adder on an already bound listener. Cancelling the returned
/// token shuts down both the HTTP server and open sessions.
pub fn serve(listener: TcpListener) -> anyhow::Result<CancellationToken> {
    let bind = listener.local_addr()?;
    let (sse_server, router) = SseServer::new(SseServerConfig {
        bind,
        sse_path: "/sse".to_string(),
        post_path: "/message".to_string(),
        ct: CancellationToken::new(),
        sse_keep_alive: None,
    });

    let shutdown = sse_server.config.ct.child_token();
    tokio::spawn(async move {
        let server = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(e) = server.await {
            tracing::error!(error = %e, "stub tool server stopped");
        }
    });

    Ok(sse_server.with_service(Adder::new))
}
