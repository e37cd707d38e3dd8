use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use uuid::Uuid;

use super::document::{Metadata, TextSegment};
use super::store::{check_lengths, content_id, EmbeddingMatch, EmbeddingSearchRequest, EmbeddingStore};
use crate::embeddings::Embedding;
use crate::errors::StoreError;

const TEXT_PROPERTY: &str = "text";
const METADATA_PROPERTY: &str = "metadata";

/// An embedding store backed by a Weaviate instance, using its REST batch
/// API for writes and GraphQL `nearVector` queries for search
pub struct WeaviateEmbeddingStore {
    client: Client,
    base_url: String,
    object_class: String,
    avoid_dups: bool,
    consistency_level: String,
}

pub struct WeaviateEmbeddingStoreBuilder {
    scheme: String,
    host: Option<String>,
    object_class: String,
    avoid_dups: bool,
    consistency_level: String,
}

impl Default for WeaviateEmbeddingStoreBuilder {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: None,
            object_class: "Default".to_string(),
            avoid_dups: true,
            consistency_level: "QUORUM".to_string(),
        }
    }
}

impl WeaviateEmbeddingStoreBuilder {
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// `host:port` of the instance
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Class names must start with an uppercase letter
    pub fn object_class(mut self, object_class: impl Into<String>) -> Self {
        self.object_class = object_class.into();
        self
    }

    pub fn avoid_dups(mut self, avoid_dups: bool) -> Self {
        self.avoid_dups = avoid_dups;
        self
    }

    /// One of `ONE`, `QUORUM` or `ALL`
    pub fn consistency_level(mut self, level: impl Into<String>) -> Self {
        self.consistency_level = level.into();
        self
    }

    pub fn build(self) -> Result<WeaviateEmbeddingStore, StoreError> {
        let host = self
            .host
            .ok_or_else(|| StoreError::Config("host is required".to_string()))?;
        if !self
            .object_class
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_uppercase())
        {
            return Err(StoreError::Config(format!(
                "object class '{}' must start with an uppercase letter",
                self.object_class
            )));
        }
        let consistency_level = self.consistency_level.to_uppercase();
        if !matches!(consistency_level.as_str(), "ONE" | "QUORUM" | "ALL") {
            return Err(StoreError::Config(format!(
                "unknown consistency level '{}'",
                self.consistency_level
            )));
        }

        Ok(WeaviateEmbeddingStore {
            client: Client::new(),
            base_url: format!("{}://{}", self.scheme, host.trim_end_matches('/')),
            object_class: self.object_class,
            avoid_dups: self.avoid_dups,
            consistency_level,
        })
    }
}

impl WeaviateEmbeddingStore {
    pub fn builder() -> WeaviateEmbeddingStoreBuilder {
        WeaviateEmbeddingStoreBuilder::default()
    }

    fn object_id(&self, segment: &TextSegment) -> String {
        if self.avoid_dups {
            content_id(&segment.text)
        } else {
            Uuid::new_v4().to_string()
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, StoreError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let payload = response.text().await.unwrap_or_default();
            return Err(StoreError::Request {
                status: status.as_u16(),
                payload,
            });
        }
        response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }

    fn graphql_query(&self, request: &EmbeddingSearchRequest) -> String {
        let vector = serde_json::to_string(request.query_embedding.vector()).unwrap_or_default();
        let certainty = if request.min_score > 0.0 {
            format!(", certainty: {}", request.min_score)
        } else {
            String::new()
        };
        format!(
            "{{ Get {{ {class}(nearVector: {{ vector: {vector}{certainty} }}, limit: {limit}) \
             {{ {text} {metadata} _additional {{ id certainty }} }} }} }}",
            class = self.object_class,
            vector = vector,
            certainty = certainty,
            limit = request.max_results,
            text = TEXT_PROPERTY,
            metadata = METADATA_PROPERTY,
        )
    }
}

#[async_trait]
impl EmbeddingStore for WeaviateEmbeddingStore {
    async fn add_all(
        &self,
        embeddings: Vec<Embedding>,
        segments: Vec<TextSegment>,
    ) -> Result<Vec<String>, StoreError> {
        check_lengths(embeddings.len(), segments.len())?;
        if segments.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(segments.len());
        let objects: Vec<Value> = embeddings
            .into_iter()
            .zip(&segments)
            .map(|(embedding, segment)| {
                let id = self.object_id(segment);
                ids.push(id.clone());
                let metadata = serde_json::to_string(&segment.metadata).unwrap_or_default();
                json!({
                    "class": self.object_class,
                    "id": id,
                    "vector": embedding.0,
                    "properties": {
                        "text": segment.text,
                        "metadata": metadata,
                    }
                })
            })
            .collect();

        let path = format!(
            "/v1/batch/objects?consistency_level={}",
            self.consistency_level
        );
        let response = self.post(&path, &json!({ "objects": objects })).await?;

        // The batch endpoint answers 200 even when individual objects fail
        let errors: Vec<String> = response
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|object| object.pointer("/result/errors/error"))
            .filter_map(|errors| errors.as_array())
            .flatten()
            .filter_map(|error| error.get("message").and_then(|m| m.as_str()))
            .map(String::from)
            .collect();
        if !errors.is_empty() {
            return Err(StoreError::InvalidResponse(errors.join("; ")));
        }

        tracing::debug!(count = ids.len(), class = %self.object_class, "inserted objects");
        Ok(ids)
    }

    async fn search(
        &self,
        request: &EmbeddingSearchRequest,
    ) -> Result<Vec<EmbeddingMatch>, StoreError> {
        let query = self.graphql_query(request);
        let response = self.post("/v1/graphql", &json!({ "query": query })).await?;

        if let Some(errors) = response.get("errors").and_then(|e| e.as_array()) {
            let messages: Vec<&str> = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                .collect();
            return Err(StoreError::InvalidResponse(messages.join("; ")));
        }

        let objects = response
            .pointer(&format!("/data/Get/{}", self.object_class))
            .and_then(|o| o.as_array())
            .ok_or_else(|| StoreError::InvalidResponse(format!("Unexpected response {}", response)))?;

        let mut matches = Vec::with_capacity(objects.len());
        for object in objects {
            let text = object
                .get(TEXT_PROPERTY)
                .and_then(|t| t.as_str())
                .unwrap_or_default();
            let metadata: Metadata = object
                .get(METADATA_PROPERTY)
                .and_then(|m| m.as_str())
                .and_then(|m| serde_json::from_str(m).ok())
                .unwrap_or_default();
            let id = object
                .pointer("/_additional/id")
                .and_then(|id| id.as_str())
                .unwrap_or_default();
            let score = object
                .pointer("/_additional/certainty")
                .and_then(|c| c.as_f64())
                .unwrap_or_default();
            matches.push(EmbeddingMatch {
                id: id.to_string(),
                score,
                segment: TextSegment::new(text, metadata),
            });
        }
        Ok(matches)
    }
}
