use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::EmbeddingCache;

#[derive(Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
    cache: Option<Arc<EmbeddingCache>>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
            cache: None,
        }
    }

    /// Reuse embeddings for repeated queries.
    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Generate embedding for text
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(text)) {
            tracing::debug!(model = %self.model, "embedding cache hit");
            return Ok(hit);
        }

        let url = format!("{}/api/embeddings", self.base_url.trim_end_matches('/'));

        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send embedding request")?;

        if !response.status().is_success() {
            anyhow::bail!("Embedding request failed: {}", response.status());
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        if embedding_response.embedding.is_empty() {
            anyhow::bail!("Embedding model '{}' returned an empty vector", self.model);
        }

        if let Some(cache) = &self.cache {
            cache.insert(text, embedding_response.embedding.clone());
        }

        Ok(embedding_response.embedding)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}
