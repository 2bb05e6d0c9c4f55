use anyhow::{Context, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::PipelineError;

/// Normalized event from the generation backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    TextDelta(String),
    ThinkingDelta(String),
    Done,
}

pub type EventStream = BoxStream<'static, Result<StreamEvent, PipelineError>>;

/// Opens a token stream for a rendered prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Fails before yielding anything if the backend rejects the request.
    async fn stream(&self, prompt: &str) -> Result<EventStream, PipelineError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub max_tokens: u32,
    /// Bound on waiting for response headers and for each body chunk.
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            model: "qwen3:0.6b".to_string(),
            temperature: 0.0,
            top_p: 0.9,
            repeat_penalty: 1.1,
            max_tokens: 200,
            timeout_secs: 120,
        }
    }
}

/// Streaming client for Ollama's `/api/generate`.
#[derive(Clone)]
pub struct QueryLLM {
    config: GenerationConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    temperature: f32,
    top_p: f32,
    repeat_penalty: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl QueryLLM {
    pub fn new(config: GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build generation HTTP client")?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }
}

#[async_trait]
impl Generator for QueryLLM {
    async fn stream(&self, prompt: &str) -> Result<EventStream, PipelineError> {
        let url = format!("{}/api/generate", self.config.base_url.trim_end_matches('/'));
        let timeout_secs = self.config.timeout_secs;

        let request = OllamaRequest {
            model: &self.config.model,
            prompt,
            stream: true,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            repeat_penalty: self.config.repeat_penalty,
            max_tokens: self.config.max_tokens,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = tokio::time::timeout(Duration::from_secs(timeout_secs), builder.send())
            .await
            .map_err(|_| PipelineError::UpstreamTimeout(timeout_secs))?
            .map_err(|e| PipelineError::transport(e, timeout_secs))?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(%status, model = %self.config.model, "generation backend rejected request");
            return Err(PipelineError::Upstream {
                status: status.as_u16(),
            });
        }

        Ok(decode_events(response.bytes_stream(), Duration::from_secs(timeout_secs)).boxed())
    }
}

/// Turn a raw NDJSON body into events.
///
/// Closes right after the first `Done`; whatever the backend sends afterwards
/// is never read. Waiting longer than `idle` for a chunk fails the stream.
pub fn decode_events<S, B>(
    body: S,
    idle: Duration,
) -> impl Stream<Item = Result<StreamEvent, PipelineError>> + Send + 'static
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    try_stream! {
        let mut body = Box::pin(body);
        let mut lines = LineBuffer::default();
        let mut finished = false;

        while !finished {
            let next = tokio::time::timeout(idle, body.next())
                .await
                .map_err(|_| PipelineError::UpstreamTimeout(idle.as_secs()))?;
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| PipelineError::transport(e, idle.as_secs()))?;

            'lines: for line in lines.push(chunk.as_ref()) {
                for event in parse_line(&line) {
                    finished = event == StreamEvent::Done;
                    yield event;
                    if finished {
                        break 'lines;
                    }
                }
            }
        }

        if !finished {
            if let Some(line) = lines.finish() {
                for event in parse_line(&line) {
                    let done = event == StreamEvent::Done;
                    yield event;
                    if done {
                        break;
                    }
                }
            }
        }
    }
}

/// Expand one NDJSON line into events: thinking, then text, then done.
/// Blank and unparsable lines produce nothing.
pub fn parse_line(line: &str) -> Vec<StreamEvent> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    let chunk: OllamaChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed upstream line");
            return Vec::new();
        }
    };

    if let Some(error) = &chunk.error {
        tracing::warn!(%error, "generation backend reported an error");
    }

    let mut events = Vec::with_capacity(3);
    if let Some(thinking) = chunk.thinking.filter(|t| !t.is_empty()) {
        events.push(StreamEvent::ThinkingDelta(thinking));
    }
    if let Some(text) = chunk.response.filter(|t| !t.is_empty()) {
        events.push(StreamEvent::TextDelta(text));
    }
    if chunk.done {
        events.push(StreamEvent::Done);
    }
    events
}

/// Longest upstream line kept. Ollama lines are small JSON objects; anything
/// past this is treated as malformed and skipped up to the next newline.
const MAX_LINE_BYTES: usize = 1 << 20;

/// Splits a byte stream on `\n`, holding partial lines (and partial UTF-8
/// sequences) until the rest arrives.
#[derive(Debug)]
struct LineBuffer {
    pending: Vec<u8>,
    max_line: usize,
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    fn with_limit(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            if self.discarding {
                self.discarding = false;
            } else if self.pending.len() + pos > self.max_line {
                tracing::debug!(
                    bytes = self.pending.len() + pos,
                    "skipping oversized upstream line"
                );
                self.pending.clear();
            } else {
                self.pending.extend_from_slice(&rest[..pos]);
                lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                self.pending.clear();
            }
            rest = &rest[pos + 1..];
        }

        if !self.discarding {
            if self.pending.len() + rest.len() > self.max_line {
                tracing::debug!(
                    bytes = self.pending.len() + rest.len(),
                    "skipping oversized upstream line"
                );
                self.pending.clear();
                self.discarding = true;
            } else {
                self.pending.extend_from_slice(rest);
            }
        }

        lines
    }

    fn finish(self) -> Option<String> {
        if self.discarding || self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }
}

/// Running totals over a whole generation stream. Never reset.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    think: String,
    answer: String,
    think_chars: usize,
}

impl Transcript {
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ThinkingDelta(text) => {
                self.think.push_str(text);
                self.think_chars += text.chars().count();
            }
            StreamEvent::TextDelta(text) => self.answer.push_str(text),
            StreamEvent::Done => {}
        }
    }

    pub fn think(&self) -> &str {
        &self.think
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Length of the thinking text in characters.
    pub fn think_chars(&self) -> usize {
        self.think_chars
    }

    pub fn has_answer(&self) -> bool {
        !self.answer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn body(chunks: &[&str]) -> impl Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send + 'static {
        let chunks: Vec<_> = chunks
            .iter()
            .map(|c| Ok::<_, reqwest::Error>(c.as_bytes().to_vec()))
            .collect();
        stream::iter(chunks)
    }

    async fn collect(chunks: &[&str]) -> Vec<StreamEvent> {
        decode_events(body(chunks), Duration::from_secs(5))
            .map(|e| e.unwrap())
            .collect()
            .await
    }

    #[test]
    fn test_parse_line_order() {
        let events = parse_line(r#"{"thinking":"hmm","response":"Yes","done":true}"#);
        assert_eq!(
            events,
            vec![
                StreamEvent::ThinkingDelta("hmm".to_string()),
                StreamEvent::TextDelta("Yes".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[test]
    fn test_parse_line_skips_noise() {
        assert!(parse_line("").is_empty());
        assert!(parse_line("   ").is_empty());
        assert!(parse_line("{not json").is_empty());
        assert!(parse_line("42").is_empty());
        assert!(parse_line(r#"{"response":"","done":false}"#).is_empty());
        assert!(parse_line(r#"{"response":null}"#).is_empty());
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let events = collect(&[
            "{\"respon",
            "se\":\"Sec\"}\n{\"response\":\"tion 379\"}\n",
            "{\"done\":true}\n",
        ])
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("Sec".to_string()),
                StreamEvent::TextDelta("tion 379".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_multibyte_split_across_chunks() {
        let line = "{\"response\":\"धारा\"}\n".as_bytes().to_vec();
        let (head, tail) = line.split_at(15);
        let chunks = vec![
            Ok::<_, reqwest::Error>(head.to_vec()),
            Ok(tail.to_vec()),
        ];

        let events: Vec<_> = decode_events(stream::iter(chunks), Duration::from_secs(5))
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events, vec![StreamEvent::TextDelta("धारा".to_string())]);
    }

    #[tokio::test]
    async fn test_stops_after_done() {
        let events = collect(&[
            "{\"response\":\"A\"}\n{\"done\":true}\n{\"response\":\"ignored\"}\n{\"done\":true}\n",
        ])
        .await;

        assert_eq!(
            events,
            vec![StreamEvent::TextDelta("A".to_string()), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn test_malformed_lines_do_not_abort() {
        let events = collect(&["garbage\n\n{\"thinking\":\"x\"}\n{oops\n{\"done\":true}\n"]).await;

        assert_eq!(
            events,
            vec![StreamEvent::ThinkingDelta("x".to_string()), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let events = collect(&["{\"response\":\"A\"}\n{\"done\":true}"]).await;
        assert_eq!(
            events,
            vec![StreamEvent::TextDelta("A".to_string()), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn test_ends_without_done() {
        let events = collect(&["{\"response\":\"partial\"}\n"]).await;
        assert_eq!(events, vec![StreamEvent::TextDelta("partial".to_string())]);
    }

    #[tokio::test]
    async fn test_idle_body_times_out() {
        let stalled = stream::pending::<Result<Vec<u8>, reqwest::Error>>();
        let mut events = Box::pin(decode_events(stalled, Duration::from_millis(20)));

        let first = events.next().await.unwrap();
        assert!(matches!(first, Err(PipelineError::UpstreamTimeout(_))));
        assert!(events.next().await.is_none());
    }

    #[test]
    fn test_oversized_line_is_skipped() {
        let mut lines = LineBuffer::with_limit(16);

        assert!(lines.push(b"{\"response\":\"aaaaaaaa").is_empty());
        assert!(lines.push(b"aaaaaaaaaaaaaaaa").is_empty());
        assert!(lines.pending.is_empty());

        let kept = lines.push(b"aaaa\"}\n{\"done\":true}\n");
        assert_eq!(kept, vec![r#"{"done":true}"#.to_string()]);
    }

    #[test]
    fn test_oversized_line_in_one_chunk() {
        let mut lines = LineBuffer::with_limit(8);
        let kept = lines.push(b"0123456789abcdef\nshort\n");
        assert_eq!(kept, vec!["short".to_string()]);
        assert!(lines.finish().is_none());
    }

    #[test]
    fn test_unterminated_oversized_tail_is_dropped() {
        let mut lines = LineBuffer::with_limit(8);
        assert_eq!(lines.push(b"ok\n0123456789"), vec!["ok".to_string()]);
        assert!(lines.finish().is_none());
    }

    #[test]
    fn test_transcript_accumulates() {
        let mut transcript = Transcript::default();
        transcript.apply(&StreamEvent::ThinkingDelta("ab".to_string()));
        transcript.apply(&StreamEvent::ThinkingDelta("धा".to_string()));
        assert!(!transcript.has_answer());

        transcript.apply(&StreamEvent::TextDelta("Yes.".to_string()));
        transcript.apply(&StreamEvent::Done);

        assert_eq!(transcript.think(), "abधा");
        assert_eq!(transcript.think_chars(), 4);
        assert_eq!(transcript.answer(), "Yes.");
        assert!(transcript.has_answer());
    }
}
