use std::time::Duration;

use super::ollama::{OLLAMA_HOST, OLLAMA_MODEL};

#[derive(Debug, Clone)]
pub struct OllamaProviderConfig {
    pub host: String,
    pub model: String,
    pub timeout: Duration,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    pub log_requests: bool,
    pub log_responses: bool,
}

impl Default for OllamaProviderConfig {
    fn default() -> Self {
        Self {
            host: OLLAMA_HOST.to_string(),
            model: OLLAMA_MODEL.to_string(),
            timeout: Duration::from_secs(60),
            temperature: None,
            max_tokens: None,
            log_requests: false,
            log_responses: false,
        }
    }
}
