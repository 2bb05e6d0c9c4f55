use async_stream::try_stream;
use extract::KnowledgeGraph;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use index::Retriever;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::build_context;
use crate::error::PipelineError;
use crate::frame::{ContextSource, Phase, ProtocolFrame};
use crate::llm::{EventStream, Generator, StreamEvent, Transcript};
use crate::prompt::build_answer_prompt;

pub type FrameStream = BoxStream<'static, Result<ProtocolFrame, PipelineError>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Passages retrieved per question.
    pub top_k: usize,
    pub max_context_chars: usize,
    /// Thinking characters between progress frames.
    pub think_frame_interval: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: 1,
            max_context_chars: 800,
            think_frame_interval: 50,
        }
    }
}

/// An accepted question: how many passages backed it and the frames to send.
pub struct Answer {
    pub passages: usize,
    pub frames: FrameStream,
}

impl Answer {
    pub fn is_no_match(&self) -> bool {
        self.passages == 0
    }
}

/// Retrieval → context → citation graph → streamed generation.
pub struct Pipeline {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            retriever,
            generator,
            config,
        }
    }

    pub fn retriever_name(&self) -> &str {
        self.retriever.describe()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run retrieval and open the generation stream.
    ///
    /// Everything that can fail before the first frame fails here, so callers
    /// can still answer with a plain error. Later failures arrive as the last
    /// item of the returned stream.
    pub async fn submit(&self, question: &str) -> Result<Answer, PipelineError> {
        let passages = self
            .retriever
            .search(question, self.config.top_k)
            .await
            .map_err(PipelineError::Retrieval)?;

        if passages.is_empty() {
            info!(retriever = self.retriever.describe(), "no passages matched");
            return Ok(Answer {
                passages: 0,
                frames: stream::once(async { Ok::<_, PipelineError>(ProtocolFrame::no_match()) })
                    .boxed(),
            });
        }

        let context = build_context(&passages, self.config.max_context_chars);
        let graph = extract::extract(&context);
        info!(
            passages = passages.len(),
            context_chars = context.chars().count(),
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "context assembled"
        );

        let template = FrameTemplate {
            sources: Arc::new(passages.iter().map(ContextSource::from).collect()),
            graph: Arc::new(graph),
        };

        let prompt = build_answer_prompt(&context);
        let events = self.generator.stream(&prompt).await?;

        Ok(Answer {
            passages: passages.len(),
            frames: frames(events, template, self.config.think_frame_interval).boxed(),
        })
    }
}

/// Parts shared by every frame of one request.
struct FrameTemplate {
    sources: Arc<Vec<ContextSource>>,
    graph: Arc<KnowledgeGraph>,
}

impl FrameTemplate {
    fn frame(&self, phase: Phase, think: &str, response: &str) -> ProtocolFrame {
        ProtocolFrame {
            phase,
            think: think.trim().to_string(),
            response: response.trim().to_string(),
            context_sources: Arc::clone(&self.sources),
            knowledge_graph: Arc::clone(&self.graph),
        }
    }

    fn thinking(&self, transcript: &Transcript) -> ProtocolFrame {
        self.frame(Phase::Thinking, transcript.think(), "")
    }

    fn response(&self, transcript: &Transcript) -> ProtocolFrame {
        self.frame(Phase::Response, transcript.think(), transcript.answer())
    }
}

/// Emits a thinking frame each time the thinking length passes another
/// multiple of the interval. Large deltas that jump several multiples still
/// produce one frame.
#[derive(Debug)]
pub struct ThinkingThrottle {
    interval: usize,
    last_bucket: usize,
}

impl ThinkingThrottle {
    pub fn new(interval: usize) -> Self {
        Self {
            interval: interval.max(1),
            last_bucket: 0,
        }
    }

    pub fn crossed(&mut self, chars: usize) -> bool {
        let bucket = chars / self.interval;
        if bucket > self.last_bucket {
            self.last_bucket = bucket;
            true
        } else {
            false
        }
    }
}

fn frames(
    mut events: EventStream,
    template: FrameTemplate,
    think_frame_interval: usize,
) -> impl Stream<Item = Result<ProtocolFrame, PipelineError>> + Send + 'static {
    try_stream! {
        let mut transcript = Transcript::default();
        let mut throttle = ThinkingThrottle::new(think_frame_interval);
        let mut emitted = 0usize;

        while let Some(event) = events.next().await {
            let event = event?;
            transcript.apply(&event);

            match event {
                StreamEvent::ThinkingDelta(_) => {
                    if !transcript.has_answer() && throttle.crossed(transcript.think_chars()) {
                        emitted += 1;
                        yield template.thinking(&transcript);
                    }
                }
                StreamEvent::TextDelta(_) => {}
                StreamEvent::Done => {
                    emitted += 1;
                    info!(
                        frames = emitted,
                        think_chars = transcript.think_chars(),
                        answer_chars = transcript.answer().chars().count(),
                        "generation complete"
                    );
                    yield template.response(&transcript);
                    break;
                }
            }
        }

        debug!(frames = emitted, "frame stream closed");
    }
}
