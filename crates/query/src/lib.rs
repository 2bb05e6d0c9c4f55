//! Answering a legal question: retrieve passages, build the citation graph,
//! and stream the model's reasoning and answer as protocol frames.

pub mod context;
pub mod error;
pub mod frame;
pub mod llm;
pub mod pipeline;
pub mod prompt;

pub use error::PipelineError;
pub use frame::{ContextSource, NO_MATCH_RESPONSE, Phase, ProtocolFrame};
pub use llm::{EventStream, GenerationConfig, Generator, QueryLLM, StreamEvent, Transcript};
pub use pipeline::{Answer, FrameStream, Pipeline, PipelineConfig, ThinkingThrottle};
