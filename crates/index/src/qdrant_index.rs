use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::embeddings::EmbeddingClient;
use crate::passage::RetrievedPassage;
use crate::Retriever;

/// Similarity search against a prebuilt Qdrant collection over its REST API.
pub struct QdrantRetriever {
    base_url: String,
    client: reqwest::Client,
    embedding_client: EmbeddingClient,
    collection_name: String,
    label: String,
}

#[derive(Deserialize)]
struct CollectionInfo {
    result: CollectionResult,
}

#[derive(Deserialize)]
struct CollectionResult {
    collections: Vec<Collection>,
}

#[derive(Deserialize)]
struct Collection {
    name: String,
}

#[derive(Serialize)]
struct SearchRequest {
    vector: Vec<f32>,
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f64,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

impl QdrantRetriever {
    /// Connect to an existing collection. Fails if the collection is missing,
    /// since the index is built offline and never created here.
    pub async fn connect(
        base_url: String,
        collection_name: String,
        embedding_client: EmbeddingClient,
    ) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::new();

        let url = format!("{}/collections", base_url);
        let response = client
            .get(&url)
            .send()
            .await
            .context("Failed to reach Qdrant")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to list collections: {}", response.status());
        }

        let info: CollectionInfo = response
            .json()
            .await
            .context("Failed to parse Qdrant collection list")?;
        let exists = info
            .result
            .collections
            .iter()
            .any(|c| c.name == collection_name);

        if !exists {
            anyhow::bail!("Collection '{}' does not exist", collection_name);
        }

        tracing::info!(collection = %collection_name, "connected to Qdrant collection");

        Ok(Self {
            label: format!("qdrant:{}", collection_name),
            base_url,
            client,
            embedding_client,
            collection_name,
        })
    }
}

#[async_trait]
impl Retriever for QdrantRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>> {
        let vector = self
            .embedding_client
            .embed(query)
            .await
            .context("Failed to embed query")?;

        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection_name
        );
        let body = SearchRequest {
            vector,
            limit: k,
            with_payload: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to send search request to Qdrant")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Qdrant search failed ({}): {}", status, error_text);
        }

        let result: SearchResponse = response
            .json()
            .await
            .context("Failed to parse Qdrant response")?;

        let passages = result
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload?;
                let text = payload.get("text").and_then(Value::as_str)?;
                let source = payload
                    .get("source")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Some(RetrievedPassage::new(text, source, point.score))
            })
            .collect();

        Ok(passages)
    }

    fn describe(&self) -> &str {
        &self.label
    }
}
