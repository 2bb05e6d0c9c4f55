use anyhow::{Context, Result};
use index::{EmbeddingCache, EmbeddingClient, MemoryIndex, QdrantRetriever, Retriever};
use query::{Pipeline, QueryLLM};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::{AppConfig, IndexBackend};
use crate::metrics::Metrics;
use crate::retry::RetryPolicy;

/// What the server can do with a question. Decided once at startup.
pub enum Backend {
    Ready(Arc<Pipeline>),
    Unavailable { reason: String },
}

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<Backend>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend: Arc::new(backend),
            metrics: Metrics::new(),
        }
    }
}

/// Open the index (with retries) and wire up the pipeline. Never fails: an
/// index that cannot be opened leaves the server up but unhealthy.
pub async fn connect_backend(config: &AppConfig) -> Backend {
    let policy = RetryPolicy::from_config(&config.retry);
    let retriever = policy
        .retry("open_index", || build_retriever(config))
        .await;

    let retriever = match retriever {
        Ok(retriever) => retriever,
        Err(e) => {
            error!(error = %format!("{:#}", e), "index unavailable, serving unhealthy");
            return Backend::Unavailable {
                reason: format!("{:#}", e),
            };
        }
    };

    let generator = match QueryLLM::new(config.generation.clone()) {
        Ok(generator) => generator,
        Err(e) => {
            error!(error = %format!("{:#}", e), "generation client unavailable");
            return Backend::Unavailable {
                reason: format!("{:#}", e),
            };
        }
    };

    info!(
        index = retriever.describe(),
        model = %config.generation.model,
        top_k = config.retrieval.top_k,
        "pipeline ready"
    );

    Backend::Ready(Arc::new(Pipeline::new(
        retriever,
        Arc::new(generator),
        config.retrieval.clone(),
    )))
}

async fn build_retriever(config: &AppConfig) -> Result<Arc<dyn Retriever>> {
    let index = &config.index;

    let mut embedding_client = EmbeddingClient::new(
        config.generation.base_url.clone(),
        index.embedding_model.clone(),
    );
    if index.embedding_cache_entries > 0 {
        embedding_client = embedding_client
            .with_cache(Arc::new(EmbeddingCache::new(index.embedding_cache_entries)));
    }

    let retriever: Arc<dyn Retriever> = match index.backend {
        IndexBackend::Qdrant => Arc::new(
            QdrantRetriever::connect(
                index.qdrant_url.clone(),
                index.collection.clone(),
                embedding_client,
            )
            .await
            .context("Failed to open Qdrant collection")?,
        ),
        IndexBackend::Memory => Arc::new(
            MemoryIndex::load(&index.snapshot_path, embedding_client)
                .await
                .context("Failed to load index snapshot")?,
        ),
    };

    Ok(retriever)
}
