use async_trait::async_trait;
use std::sync::Arc;

use super::document::TextSegment;
use super::store::{EmbeddingSearchRequest, EmbeddingStore};
use crate::embeddings::EmbeddingModel;
use crate::errors::RagError;

pub const DEFAULT_MAX_RESULTS: usize = 3;
pub const DEFAULT_MIN_SCORE: f64 = 0.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedContent {
    pub segment: TextSegment,
    pub score: Option<f64>,
}

/// Finds content relevant to a user query
#[async_trait]
pub trait ContentRetriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedContent>, RagError>;
}

pub struct EmbeddingStoreContentRetriever {
    model: Arc<dyn EmbeddingModel>,
    store: Arc<dyn EmbeddingStore>,
    max_results: usize,
    min_score: f64,
}

impl EmbeddingStoreContentRetriever {
    pub fn new(model: Arc<dyn EmbeddingModel>, store: Arc<dyn EmbeddingStore>) -> Self {
        Self {
            model,
            store,
            max_results: DEFAULT_MAX_RESULTS,
            min_score: DEFAULT_MIN_SCORE,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }
}

#[async_trait]
impl ContentRetriever for EmbeddingStoreContentRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedContent>, RagError> {
        let query_embedding = self.model.embed(query).await?;
        let request = EmbeddingSearchRequest::new(query_embedding, self.max_results)
            .with_min_score(self.min_score);
        let matches = self.store.search(&request).await?;
        tracing::debug!(query, matches = matches.len(), "retrieved content");

        Ok(matches
            .into_iter()
            .map(|m| RetrievedContent {
                segment: m.segment,
                score: Some(m.score),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::tests::LetterEmbeddingModel;
    use crate::rag::store::InMemoryEmbeddingStore;

    async fn populated_store(texts: &[&str]) -> Arc<InMemoryEmbeddingStore> {
        let store = Arc::new(InMemoryEmbeddingStore::new());
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let embeddings = LetterEmbeddingModel.embed_all(&owned).await.unwrap();
        store
            .add_all(
                embeddings,
                owned.into_iter().map(TextSegment::from_text).collect(),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_retrieves_closest_segments() {
        let store = populated_store(&["aaaa", "bbbb", "aaab", "zzzz", "abab"]).await;
        let retriever = EmbeddingStoreContentRetriever::new(Arc::new(LetterEmbeddingModel), store);

        let contents = retriever.retrieve("aaaa").await.unwrap();
        assert_eq!(contents.len(), DEFAULT_MAX_RESULTS);
        assert_eq!(contents[0].segment.text, "aaaa");
        assert_eq!(contents[1].segment.text, "aaab");
        assert_eq!(contents[2].segment.text, "abab");
    }

    #[tokio::test]
    async fn test_min_score_and_max_results() {
        let store = populated_store(&["aaaa", "bbbb"]).await;
        let retriever = EmbeddingStoreContentRetriever::new(Arc::new(LetterEmbeddingModel), store)
            .with_max_results(5)
            .with_min_score(0.9);

        let contents = retriever.retrieve("aaaa").await.unwrap();
        assert_eq!(contents.len(), 1);
        assert!(contents[0].score.unwrap() >= 0.9);
    }
}
