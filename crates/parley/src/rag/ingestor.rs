use std::sync::Arc;
use tracing::info;

use super::document::Document;
use super::splitter::RecursiveDocumentSplitter;
use super::store::EmbeddingStore;
use crate::embeddings::EmbeddingModel;
use crate::errors::RagError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestionResult {
    pub documents: usize,
    pub segments: usize,
    pub ids: Vec<String>,
}

/// Splits documents, embeds the segments and writes them to a store
pub struct EmbeddingStoreIngestor {
    splitter: RecursiveDocumentSplitter,
    model: Arc<dyn EmbeddingModel>,
    store: Arc<dyn EmbeddingStore>,
}

impl EmbeddingStoreIngestor {
    pub fn new(model: Arc<dyn EmbeddingModel>, store: Arc<dyn EmbeddingStore>) -> Self {
        Self {
            splitter: RecursiveDocumentSplitter::default(),
            model,
            store,
        }
    }

    pub fn with_splitter(mut self, splitter: RecursiveDocumentSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    pub async fn ingest(&self, documents: &[Document]) -> Result<IngestionResult, RagError> {
        let segments = self.splitter.split_all(documents);
        if segments.is_empty() {
            return Ok(IngestionResult {
                documents: documents.len(),
                ..Default::default()
            });
        }

        let texts: Vec<String> = segments.iter().map(|s| s.text.clone()).collect();
        let embeddings = self.model.embed_all(&texts).await?;
        let segment_count = segments.len();
        let ids = self.store.add_all(embeddings, segments).await?;

        info!(
            documents = documents.len(),
            segments = segment_count,
            "ingested documents"
        );
        Ok(IngestionResult {
            documents: documents.len(),
            segments: segment_count,
            ids,
        })
    }
}
