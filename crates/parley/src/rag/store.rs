use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::RwLock;
use uuid::Uuid;

use super::document::TextSegment;
use crate::embeddings::Embedding;
use crate::errors::StoreError;

#[derive(Debug, Clone)]
pub struct EmbeddingSearchRequest {
    pub query_embedding: Embedding,
    pub max_results: usize,
    /// Matches scoring below this relevance are dropped
    pub min_score: f64,
}

impl EmbeddingSearchRequest {
    pub fn new(query_embedding: Embedding, max_results: usize) -> Self {
        Self {
            query_embedding,
            max_results,
            min_score: 0.0,
        }
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatch {
    pub id: String,
    /// Relevance in `[0, 1]`, higher is closer
    pub score: f64,
    pub segment: TextSegment,
}

#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Store segments with their embeddings, returning the assigned ids
    async fn add_all(
        &self,
        embeddings: Vec<Embedding>,
        segments: Vec<TextSegment>,
    ) -> Result<Vec<String>, StoreError>;

    /// Matches sorted by descending score
    async fn search(
        &self,
        request: &EmbeddingSearchRequest,
    ) -> Result<Vec<EmbeddingMatch>, StoreError>;

    async fn add(&self, embedding: Embedding, segment: TextSegment) -> Result<String, StoreError> {
        let mut ids = self.add_all(vec![embedding], vec![segment]).await?;
        ids.pop()
            .ok_or_else(|| StoreError::InvalidResponse("No id assigned".to_string()))
    }
}

/// Deterministic id for a segment text: a UUID built from its SHA-256 digest
pub fn content_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string()
}

pub(crate) fn check_lengths(embeddings: usize, segments: usize) -> Result<(), StoreError> {
    if embeddings != segments {
        return Err(StoreError::Mismatch(embeddings, segments));
    }
    Ok(())
}

struct Entry {
    id: String,
    embedding: Embedding,
    segment: TextSegment,
}

/// Brute-force cosine search over entries held in memory
#[derive(Default)]
pub struct InMemoryEmbeddingStore {
    entries: RwLock<Vec<Entry>>,
    avoid_dups: bool,
}

impl InMemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive ids from segment text so re-adding a text replaces its entry
    pub fn with_avoid_dups(mut self, avoid_dups: bool) -> Self {
        self.avoid_dups = avoid_dups;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_err<T>(_: T) -> StoreError {
        StoreError::InvalidResponse("In-memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl EmbeddingStore for InMemoryEmbeddingStore {
    async fn add_all(
        &self,
        embeddings: Vec<Embedding>,
        segments: Vec<TextSegment>,
    ) -> Result<Vec<String>, StoreError> {
        check_lengths(embeddings.len(), segments.len())?;
        let mut entries = self.entries.write().map_err(Self::lock_err)?;
        let mut ids = Vec::with_capacity(segments.len());

        for (embedding, segment) in embeddings.into_iter().zip(segments) {
            let id = if self.avoid_dups {
                content_id(&segment.text)
            } else {
                Uuid::new_v4().to_string()
            };
            let entry = Entry {
                id: id.clone(),
                embedding,
                segment,
            };
            match entries.iter_mut().find(|e| e.id == id) {
                Some(existing) => *existing = entry,
                None => entries.push(entry),
            }
            ids.push(id);
        }
        Ok(ids)
    }

    async fn search(
        &self,
        request: &EmbeddingSearchRequest,
    ) -> Result<Vec<EmbeddingMatch>, StoreError> {
        let entries = self.entries.read().map_err(Self::lock_err)?;
        let mut matches: Vec<EmbeddingMatch> = entries
            .iter()
            .map(|entry| {
                let cosine = entry.embedding.cosine_similarity(&request.query_embedding);
                EmbeddingMatch {
                    id: entry.id.clone(),
                    score: (cosine + 1.0) / 2.0,
                    segment: entry.segment.clone(),
                }
            })
            .filter(|m| m.score >= request.min_score)
            .collect();

        // Stable sort keeps insertion order among equal scores
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(request.max_results);
        Ok(matches)
    }
}
