use anyhow::Result;
use parley::embeddings::{EmbeddingModel, OllamaEmbeddingModel};
use parley::providers::base::{ChatModel, StreamingChatModel};
use parley::providers::ollama::OllamaProvider;
use parley::token_counter::{HeuristicTokenEstimator, TokenCountEstimator, TokenCounter};
use std::sync::Arc;
use std::time::Duration;

use crate::configuration::Settings;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub chat_model: Arc<dyn ChatModel>,
    pub streaming_model: Arc<dyn StreamingChatModel>,
    pub embedding_model: Arc<dyn EmbeddingModel>,
    pub token_estimator: Arc<dyn TokenCountEstimator>,
}

impl AppState {
    /// Build the blocking and streaming model clients from settings
    pub fn new(settings: Settings) -> Result<Self> {
        let chat_model = OllamaProvider::new(settings.ollama.provider_config())?;
        // The streaming client shares configuration but keeps its own handle
        let streaming_model = OllamaProvider::new(settings.ollama.provider_config())?;
        let embedding_model = OllamaEmbeddingModel::new(
            settings.ollama.base_url.clone(),
            settings.ollama.embedding_model.clone(),
            Duration::from_secs(settings.ollama.timeout),
        )?;

        let token_estimator: Arc<dyn TokenCountEstimator> = match &settings.memory.tokenizer_path {
            Some(path) => Arc::new(TokenCounter::from_file(path)?),
            None => Arc::new(HeuristicTokenEstimator),
        };

        Ok(Self {
            settings: Arc::new(settings),
            chat_model: Arc::new(chat_model),
            streaming_model: Arc::new(streaming_model),
            embedding_model: Arc::new(embedding_model),
            token_estimator,
        })
    }
}
