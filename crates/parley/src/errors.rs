use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while handling a tool call. These are serialized into tool
/// responses so the model can read them.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("The tool name '{0}' is not of the form system__tool")]
    InvalidToolName(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Failures talking to the model runtime.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Server error: {0}")]
    Server(u16),

    #[error("Request failed: {status}\nPayload: {payload}")]
    Request { status: u16, payload: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ProviderError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout { timeout_secs }
        } else {
            ProviderError::Http(err)
        }
    }
}

/// Failures loading, embedding or retrieving documents.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures from an embedding store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Mismatched input: {0} embeddings for {1} segments")]
    Mismatch(usize, usize),

    #[error("Store request failed: {status}\nPayload: {payload}")]
    Request { status: u16, payload: String },

    #[error("Invalid store response: {0}")]
    InvalidResponse(String),

    #[error("Invalid store configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Failures managing an ephemeral container.
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Failed to run docker: {0}")]
    Docker(#[from] std::io::Error),

    #[error("docker {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("Container was not ready after {0}s")]
    NotReady(u64),
}

/// Failures talking to an MCP tool server.
#[derive(Error, Debug)]
pub enum McpError {
    #[error("Failed to connect to {url}: {reason}")]
    Connection { url: String, reason: String },

    #[error("Timed out after {0}s waiting for {1}")]
    Timeout(u64, String),

    #[error("MCP request failed: {0}")]
    Service(String),
}

pub type McpResult<T> = Result<T, McpError>;
