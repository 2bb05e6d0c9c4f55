use anyhow::{Context, Result};
use query::{GenerationConfig, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub generation: GenerationConfig,
    pub retrieval: PipelineConfig,
    pub index: IndexConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Qdrant, // Prebuilt collection served over Qdrant's REST API
    Memory, // JSON snapshot loaded into process memory
}

impl FromStr for IndexBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("unknown index backend '{}' (expected qdrant or memory)", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    pub qdrant_url: String,
    pub collection: String,
    pub snapshot_path: PathBuf,
    /// Embeddings come from the same Ollama server as generation.
    pub embedding_model: String,
    pub embedding_cache_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0:8000".to_string(),
            },
            generation: GenerationConfig::default(),
            retrieval: PipelineConfig::default(),
            index: IndexConfig {
                backend: IndexBackend::Qdrant,
                qdrant_url: "http://localhost:6333".to_string(),
                collection: "legal_chunks".to_string(),
                snapshot_path: PathBuf::from("data/index.json"),
                embedding_model: "all-minilm".to_string(),
                embedding_cache_entries: 1000,
            },
            retry: RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 1000,
                max_backoff_ms: 10000,
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns. Empty values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("BIND_ADDR") {
            config.server.bind_addr = v;
        }

        let generation = &mut config.generation;
        if let Some(v) = get("OLLAMA_URL") {
            generation.base_url = v;
        }
        generation.api_key = get("OLLAMA_API_KEY");
        if let Some(v) = get("OLLAMA_MODEL") {
            generation.model = v;
        }
        parse_into(&get, "GENERATION_TIMEOUT_SECS", &mut generation.timeout_secs)?;
        parse_into(&get, "TEMPERATURE", &mut generation.temperature)?;
        parse_into(&get, "TOP_P", &mut generation.top_p)?;
        parse_into(&get, "REPEAT_PENALTY", &mut generation.repeat_penalty)?;
        parse_into(&get, "MAX_TOKENS", &mut generation.max_tokens)?;

        let retrieval = &mut config.retrieval;
        parse_into(&get, "TOP_K", &mut retrieval.top_k)?;
        parse_into(&get, "MAX_CONTEXT_CHARS", &mut retrieval.max_context_chars)?;
        parse_into(&get, "THINK_FRAME_INTERVAL", &mut retrieval.think_frame_interval)?;

        let index = &mut config.index;
        parse_into(&get, "INDEX_BACKEND", &mut index.backend)?;
        if let Some(v) = get("QDRANT_URL") {
            index.qdrant_url = v;
        }
        if let Some(v) = get("QDRANT_COLLECTION") {
            index.collection = v;
        }
        if let Some(v) = get("INDEX_PATH") {
            index.snapshot_path = PathBuf::from(v);
        }
        if let Some(v) = get("EMBEDDING_MODEL") {
            index.embedding_model = v;
        }
        parse_into(&get, "EMBEDDING_CACHE_ENTRIES", &mut index.embedding_cache_entries)?;

        parse_into(&get, "INDEX_CONNECT_RETRIES", &mut config.retry.max_retries)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            anyhow::bail!("TOP_K must be at least 1");
        }
        if self.retrieval.max_context_chars == 0 {
            anyhow::bail!("MAX_CONTEXT_CHARS must be at least 1");
        }
        if self.retrieval.think_frame_interval == 0 {
            anyhow::bail!("THINK_FRAME_INTERVAL must be at least 1");
        }
        if self.generation.timeout_secs == 0 {
            anyhow::bail!("GENERATION_TIMEOUT_SECS must be at least 1");
        }
        Ok(())
    }
}

fn parse_into<T>(get: &impl Fn(&str) -> Option<String>, key: &str, field: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = get(key) {
        *field = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_match_deployment() {
        let config = from_pairs(&[]).unwrap();

        assert_eq!(config.server.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.generation.base_url, "http://localhost:11434");
        assert_eq!(config.generation.model, "qwen3:0.6b");
        assert_eq!(config.generation.api_key, None);
        assert_eq!(config.generation.timeout_secs, 120);
        assert_eq!(config.generation.max_tokens, 200);
        assert_eq!(config.retrieval.top_k, 1);
        assert_eq!(config.retrieval.max_context_chars, 800);
        assert_eq!(config.retrieval.think_frame_interval, 50);
        assert_eq!(config.index.backend, IndexBackend::Qdrant);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("OLLAMA_URL", "https://ollama.internal"),
            ("OLLAMA_API_KEY", "secret"),
            ("TOP_K", "3"),
            ("TEMPERATURE", "0.2"),
            ("INDEX_BACKEND", "Memory"),
            ("INDEX_PATH", "/srv/legal/index.json"),
            ("EMBEDDING_CACHE_ENTRIES", "0"),
        ])
        .unwrap();

        assert_eq!(config.generation.base_url, "https://ollama.internal");
        assert_eq!(config.generation.api_key.as_deref(), Some("secret"));
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.generation.temperature, 0.2);
        assert_eq!(config.index.backend, IndexBackend::Memory);
        assert_eq!(config.index.snapshot_path, PathBuf::from("/srv/legal/index.json"));
        assert_eq!(config.index.embedding_cache_entries, 0);
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = from_pairs(&[("OLLAMA_API_KEY", ""), ("TOP_K", "  ")]).unwrap();
        assert_eq!(config.generation.api_key, None);
        assert_eq!(config.retrieval.top_k, 1);
    }

    #[test]
    fn test_bad_number_names_variable() {
        let err = from_pairs(&[("MAX_CONTEXT_CHARS", "lots")]).unwrap_err();
        assert!(format!("{:#}", err).contains("MAX_CONTEXT_CHARS"));
    }

    #[test]
    fn test_unknown_backend() {
        let err = from_pairs(&[("INDEX_BACKEND", "neo4j")]).unwrap_err();
        assert!(format!("{:#}", err).contains("unknown index backend"));
    }

    #[test]
    fn test_validate_rejects_zeroes() {
        for key in [
            "TOP_K",
            "MAX_CONTEXT_CHARS",
            "THINK_FRAME_INTERVAL",
            "GENERATION_TIMEOUT_SECS",
        ] {
            let err = from_pairs(&[(key, "0")]).unwrap_err();
            assert!(err.to_string().contains(key), "{}", key);
        }
    }
}
