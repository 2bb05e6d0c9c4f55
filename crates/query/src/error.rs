use thiserror::Error;

/// Failures a request can end with.
///
/// An empty retrieval result is not an error; it produces a terminal frame.
/// Malformed upstream lines never surface here either, they are skipped.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("retrieval index is not loaded")]
    IndexUnavailable,

    #[error("retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),

    #[error("generation backend returned status {status}")]
    Upstream { status: u16 },

    #[error("generation backend request failed: {0}")]
    UpstreamTransport(#[source] reqwest::Error),

    #[error("generation backend did not respond within {0}s")]
    UpstreamTimeout(u64),
}

impl PipelineError {
    pub(crate) fn transport(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout(timeout_secs)
        } else {
            Self::UpstreamTransport(err)
        }
    }
}
