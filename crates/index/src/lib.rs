pub mod cache;
pub mod embeddings;
pub mod memory_index;
pub mod passage;
pub mod qdrant_index;

pub use cache::EmbeddingCache;
pub use embeddings::EmbeddingClient;
pub use memory_index::MemoryIndex;
pub use passage::{RetrievedPassage, UNKNOWN_SOURCE};
pub use qdrant_index::QdrantRetriever;

use anyhow::Result;
use async_trait::async_trait;

/// Read-only similarity search over a prebuilt document index.
///
/// Implementations are loaded once at startup and shared between requests.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `k` passages, most relevant first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>>;

    /// Short label for logs and health output.
    fn describe(&self) -> &str;
}
