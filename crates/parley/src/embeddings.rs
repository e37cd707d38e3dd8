//! Text embeddings.
//!
//! [`EmbeddingModel`] turns text into dense vectors; [`OllamaEmbeddingModel`]
//! calls the runtime's native `/api/embed` endpoint, which accepts a batch of
//! inputs in one request.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::errors::ProviderError;
use crate::providers::ollama::OLLAMA_HOST;

pub const OLLAMA_EMBEDDING_MODEL: &str = "all-minilm";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    pub fn vector(&self) -> &[f32] {
        &self.0
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    /// Cosine similarity in `[-1, 1]`; zero when either vector is all zeros
    /// or the dimensions differ
    pub fn cosine_similarity(&self, other: &Embedding) -> f64 {
        if self.0.len() != other.0.len() {
            return 0.0;
        }
        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;
        for (a, b) in self.0.iter().zip(&other.0) {
            let (a, b) = (*a as f64, *b as f64);
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(vector: Vec<f32>) -> Self {
        Embedding(vector)
    }
}

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed a batch of texts, one embedding per input in the same order
    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Embedding>, ProviderError>;

    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        let mut embeddings = self.embed_all(&[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| ProviderError::InvalidResponse("No embedding returned".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Clone)]
pub struct OllamaEmbeddingModel {
    client: Client,
    host: String,
    model: String,
    timeout: Duration,
}

impl OllamaEmbeddingModel {
    pub fn new(
        host: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            host: host.into(),
            model: model.into(),
            timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Default for OllamaEmbeddingModel {
    fn default() -> Self {
        Self {
            client: Client::new(),
            host: OLLAMA_HOST.to_string(),
            model: OLLAMA_EMBEDDING_MODEL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[async_trait]
impl EmbeddingModel for OllamaEmbeddingModel {
    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Embedding>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.host.trim_end_matches('/'));
        debug!(model = %self.model, inputs = texts.len(), "embedding request");

        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout.as_secs()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ProviderError::Server(status.as_u16()));
        }
        if status != StatusCode::OK {
            let payload = response.text().await.unwrap_or_default();
            return Err(ProviderError::Request {
                status: status.as_u16(),
                payload,
            });
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if body.embeddings.len() != texts.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }

        Ok(body.embeddings.into_iter().map(Embedding).collect())
    }
}
