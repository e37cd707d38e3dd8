//! A client for tool servers speaking the Model Context Protocol over the
//! HTTP + server-sent events transport, built on the rmcp SDK.
mod client;

pub use crate::errors::{McpError, McpResult};
pub use client::{McpClient, McpClientConfig, ToolOutput};
