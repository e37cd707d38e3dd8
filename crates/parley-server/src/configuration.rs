use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use parley::embeddings::OLLAMA_EMBEDDING_MODEL;
use parley::mcp::McpClientConfig;
use parley::providers::{configs::OllamaProviderConfig, ollama};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaSettings {
    #[serde(default = "default_ollama_host")]
    pub base_url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
    /// Seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_true")]
    pub log_requests: bool,
    #[serde(default = "default_true")]
    pub log_responses: bool,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: default_ollama_host(),
            model: default_ollama_model(),
            timeout: default_timeout(),
            embedding_model: default_embedding_model(),
            temperature: None,
            log_requests: true,
            log_responses: true,
        }
    }
}

impl OllamaSettings {
    pub fn provider_config(&self) -> OllamaProviderConfig {
        OllamaProviderConfig {
            host: self.base_url.clone(),
            model: self.model.clone(),
            timeout: Duration::from_secs(self.timeout),
            temperature: self.temperature,
            max_tokens: None,
            log_requests: self.log_requests,
            log_responses: self.log_responses,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpSettings {
    #[serde(default = "default_mcp_sse_url")]
    pub sse_url: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            sse_url: default_mcp_sse_url(),
            timeout: default_timeout(),
        }
    }
}

impl McpSettings {
    pub fn client_config(&self) -> McpClientConfig {
        McpClientConfig::new(self.sse_url.clone())
            .with_timeout(Duration::from_secs(self.timeout))
            .with_logging(true, true)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RagSettings {
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,
    #[serde(default = "default_glob")]
    pub glob: String,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            documents_dir: default_documents_dir(),
            glob: default_glob(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemorySettings {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// A HuggingFace `tokenizer.json`; without one tokens are estimated
    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            tokenizer_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeaviateSettings {
    #[serde(default = "default_weaviate_image")]
    pub image: String,
    /// Seconds to wait for the container to become ready
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout: u64,
}

impl Default for WeaviateSettings {
    fn default() -> Self {
        Self {
            image: default_weaviate_image(),
            ready_timeout: default_ready_timeout(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub ollama: OllamaSettings,
    #[serde(default)]
    pub mcp: McpSettings,
    #[serde(default)]
    pub rag: RagSettings,
    #[serde(default)]
    pub memory: MemorySettings,
    #[serde(default)]
    pub weaviate: WeaviateSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("ollama.base_url", default_ollama_host())?
            .set_default("ollama.model", default_ollama_model())?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("PARLEY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // Handle both NotFound and missing field message variants
                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    60
}

fn default_ollama_host() -> String {
    ollama::OLLAMA_HOST.to_string()
}

fn default_ollama_model() -> String {
    ollama::OLLAMA_MODEL.to_string()
}

fn default_embedding_model() -> String {
    OLLAMA_EMBEDDING_MODEL.to_string()
}

fn default_mcp_sse_url() -> String {
    "http://localhost:3001/sse".to_string()
}

/// Resolved against the working directory, so deployments ship `documents/`
/// next to where the server runs
fn default_documents_dir() -> PathBuf {
    PathBuf::from("documents")
}

fn default_glob() -> String {
    "*.txt".to_string()
}

fn default_max_tokens() -> usize {
    1000
}

fn default_weaviate_image() -> String {
    "semitechnologies/weaviate:1.22.4".to_string()
}

fn default_ready_timeout() -> u64 {
    60
}
