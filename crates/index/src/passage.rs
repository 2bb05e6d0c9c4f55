use serde::{Deserialize, Serialize};

/// Source label used when the index carries no provenance for a passage.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// One unit of retrieved text. The score is whatever the backend reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub text: String,
    pub source: String,
    pub score: f64,
}

impl RetrievedPassage {
    pub fn new(text: impl Into<String>, source: Option<String>, score: f64) -> Self {
        Self {
            text: text.into(),
            source: source.unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
            score,
        }
    }
}
