use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use crate::embeddings::EmbeddingClient;
use crate::passage::RetrievedPassage;
use crate::Retriever;

/// Snapshot written by the ingestion job.
#[derive(Deserialize)]
struct Snapshot {
    passages: Vec<StoredPassage>,
}

#[derive(Debug, Deserialize)]
struct StoredPassage {
    text: String,
    #[serde(default)]
    source: Option<String>,
    embedding: Vec<f32>,
}

/// Read-only, in-process vector index loaded once from a JSON snapshot.
///
/// Scoring is brute-force cosine similarity and runs on the blocking pool so
/// concurrent requests keep being served while a search is in progress.
pub struct MemoryIndex {
    passages: Arc<Vec<StoredPassage>>,
    dimension: usize,
    embedding_client: EmbeddingClient,
    label: String,
}

impl MemoryIndex {
    pub async fn load(path: &Path, embedding_client: EmbeddingClient) -> Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read index snapshot: {:?}", path))?;
        let mut index = Self::from_json(&json, embedding_client)?;
        index.label = format!("memory:{}", path.display());
        Ok(index)
    }

    pub fn from_json(json: &str, embedding_client: EmbeddingClient) -> Result<Self> {
        let snapshot: Snapshot =
            serde_json::from_str(json).context("Failed to parse index snapshot")?;

        let dimension = match snapshot.passages.first() {
            Some(first) => first.embedding.len(),
            None => anyhow::bail!("Index snapshot contains no passages"),
        };
        if dimension == 0 {
            anyhow::bail!("Index snapshot has empty embeddings");
        }
        if let Some(pos) = snapshot
            .passages
            .iter()
            .position(|p| p.embedding.len() != dimension)
        {
            anyhow::bail!(
                "Passage {} has dimension {}, expected {}",
                pos,
                snapshot.passages[pos].embedding.len(),
                dimension
            );
        }

        tracing::info!(
            passages = snapshot.passages.len(),
            dimension,
            "loaded in-memory index"
        );

        Ok(Self {
            passages: Arc::new(snapshot.passages),
            dimension,
            embedding_client,
            label: "memory".to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

#[async_trait]
impl Retriever for MemoryIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>> {
        let vector = self
            .embedding_client
            .embed(query)
            .await
            .context("Failed to embed query")?;

        if vector.len() != self.dimension {
            anyhow::bail!(
                "Query embedding has dimension {}, index expects {}",
                vector.len(),
                self.dimension
            );
        }

        let passages = Arc::clone(&self.passages);
        tokio::task::spawn_blocking(move || rank(&passages, &vector, k))
            .await
            .context("Ranking task failed")
    }

    fn describe(&self) -> &str {
        &self.label
    }
}

/// Top `k` passages by cosine similarity, best first. Ties keep snapshot order.
fn rank(passages: &[StoredPassage], query: &[f32], k: usize) -> Vec<RetrievedPassage> {
    let mut scored: Vec<(usize, f64)> = passages
        .iter()
        .enumerate()
        .map(|(i, p)| (i, cosine_similarity(query, &p.embedding)))
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(i, score)| {
            let p = &passages[i];
            RetrievedPassage::new(p.text.clone(), p.source.clone(), score)
        })
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
