use extract::KnowledgeGraph;
use index::RetrievedPassage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const NO_MATCH_RESPONSE: &str =
    "Sorry, I cannot answer that based on the available documents.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Thinking,
    Response,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSource {
    pub source: String,
    pub text: String,
    pub score: f64,
}

impl From<&RetrievedPassage> for ContextSource {
    fn from(passage: &RetrievedPassage) -> Self {
        Self {
            source: passage.source.clone(),
            text: passage.text.clone(),
            score: passage.score,
        }
    }
}

/// Full snapshot of a request's state. Each frame replaces the previous one.
///
/// Sources and graph are computed once per request and shared by every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolFrame {
    pub phase: Phase,
    pub think: String,
    pub response: String,
    pub context_sources: Arc<Vec<ContextSource>>,
    pub knowledge_graph: Arc<KnowledgeGraph>,
}

impl ProtocolFrame {
    /// Terminal frame for a question the index has nothing on.
    pub fn no_match() -> Self {
        Self {
            phase: Phase::Response,
            think: String::new(),
            response: NO_MATCH_RESPONSE.to_string(),
            context_sources: Arc::new(Vec::new()),
            knowledge_graph: Arc::new(KnowledgeGraph::default()),
        }
    }

    pub fn is_final(&self) -> bool {
        self.phase == Phase::Response
    }

    /// One line of the newline-delimited JSON wire format.
    pub fn to_json_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}
