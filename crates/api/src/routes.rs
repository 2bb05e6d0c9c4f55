use async_stream::stream;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    BoxError, Json, Router,
};
use futures::StreamExt;
use query::PipelineError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};
use crate::state::{AppState, Backend};

pub const NDJSON: &str = "application/x-ndjson";

#[derive(Deserialize)]
pub struct GenerateRequest {
    prompt: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    index: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/generate", post(generate))
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error returned before any frame has been written.
pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::IndexUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Retrieval(_)
            | PipelineError::Upstream { .. }
            | PipelineError::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
        };

        let body = Json(serde_json::json!({
            "error": self.0.to_string()
        }));

        (status, body).into_response()
    }
}

async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Response, ApiError> {
    let span = info_span!("generate", request_id = %Uuid::new_v4());
    let timer = TimedOperation::start();

    let pipeline = match state.backend.as_ref() {
        Backend::Ready(pipeline) => Arc::clone(pipeline),
        Backend::Unavailable { reason } => {
            warn!(parent: &span, %reason, "rejecting request, index not loaded");
            state.metrics.record_request(false);
            return Err(PipelineError::IndexUnavailable.into());
        }
    };

    let submitted = async {
        info!(prompt_chars = req.prompt.chars().count(), "question received");
        pipeline.submit(&req.prompt).await
    }
    .instrument(span.clone())
    .await;
    state.metrics.record_submit(timer.elapsed());

    let answer = match submitted {
        Ok(answer) => answer,
        Err(e) => {
            warn!(parent: &span, error = %e, "request failed before streaming");
            state.metrics.record_request(false);
            return Err(e.into());
        }
    };
    if answer.is_no_match() {
        state.metrics.record_no_match();
    }

    let metrics = Arc::clone(&state.metrics);
    let mut frames = answer.frames;
    // Owned by the body from here on, so a body dropped before its first
    // poll still counts as a failed request.
    let outcome = RequestOutcome::new(Arc::clone(&metrics));
    let body = stream! {
        let mut outcome = outcome;

        while let Some(frame) = frames.next().instrument(span.clone()).await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(parent: &span, error = %e, frames = outcome.frames, "stream aborted");
                    yield Err::<Vec<u8>, BoxError>(e.into());
                    break;
                }
            };

            metrics.record_frame(timer.elapsed(), outcome.frames == 0);
            outcome.frames += 1;
            outcome.completed = frame.is_final();

            match frame.to_json_line() {
                Ok(line) => yield Ok(line),
                Err(e) => {
                    yield Err(e.into());
                    break;
                }
            }
        }

        info!(
            parent: &span,
            frames = outcome.frames,
            completed = outcome.completed,
            elapsed_ms = timer.elapsed().as_millis() as u64,
            "stream closed"
        );
    };

    Ok(([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(body)).into_response())
}

/// Records how a streamed request ended, including when the caller hangs up
/// and the body is dropped mid-stream.
struct RequestOutcome {
    metrics: Arc<Metrics>,
    frames: usize,
    completed: bool,
}

impl RequestOutcome {
    fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            frames: 0,
            completed: false,
        }
    }
}

impl Drop for RequestOutcome {
    fn drop(&mut self) {
        self.metrics.record_request(self.completed);
    }
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let response = match state.backend.as_ref() {
        Backend::Ready(pipeline) => HealthResponse {
            status: "healthy",
            index: Some(pipeline.retriever_name().to_string()),
        },
        Backend::Unavailable { .. } => HealthResponse {
            status: "unhealthy",
            index: None,
        },
    };
    Json(response)
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
