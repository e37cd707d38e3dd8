//! Retrieval-augmented generation: load documents, split them into segments,
//! embed and store the segments, then retrieve the closest ones for a query.
pub mod container;
pub mod document;
pub mod ingestor;
pub mod retriever;
pub mod splitter;
pub mod store;
pub mod weaviate;

pub use document::{Document, FileSystemDocumentLoader, Metadata, TextSegment};
pub use ingestor::{EmbeddingStoreIngestor, IngestionResult};
pub use retriever::{ContentRetriever, EmbeddingStoreContentRetriever, RetrievedContent};
pub use splitter::RecursiveDocumentSplitter;
pub use store::{
    EmbeddingMatch, EmbeddingSearchRequest, EmbeddingStore, InMemoryEmbeddingStore,
};
