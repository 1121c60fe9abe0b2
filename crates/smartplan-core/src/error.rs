//! Error taxonomy for the plan pipeline.
//!
//! Every variant reaches the presentation boundary unchanged. None of them
//! is retried and none is fatal to the process.

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::plan::normalize::NormalizeError;

/// Longest slice of raw model output kept for diagnostics.
pub const MAX_RAW_OUTPUT_CHARS: usize = 2000;

/// Cut `text` to [`MAX_RAW_OUTPUT_CHARS`] characters.
pub(crate) fn truncate_output(text: &str) -> String {
    match text.char_indices().nth(MAX_RAW_OUTPUT_CHARS) {
        Some((cut, _)) => format!("{}... (truncated)", &text[..cut]),
        None => text.to_string(),
    }
}

/// Failure of a user-facing plan operation.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Bad user input; recoverable by asking the user again.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The model endpoint could not be reached or timed out.
    #[error("model service unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The model endpoint refused the request (credentials, quota, bad
    /// request).
    #[error("model service rejected the request (HTTP {status}): {message}")]
    UpstreamRejected { status: u16, message: String },

    /// The model answered with something that is not a usable plan.
    /// `raw_output` is what it said, cut to [`MAX_RAW_OUTPUT_CHARS`].
    #[error("model returned an unusable plan: {source}")]
    MalformedPlan {
        source: NormalizeError,
        raw_output: String,
    },

    /// The plan store could not complete the operation.
    #[error("plan store unavailable: {0}")]
    StoreUnavailable(String),
}

impl PlanError {
    /// Wrap a plan store failure, keeping the full context chain.
    pub fn store(err: anyhow::Error) -> Self {
        Self::StoreUnavailable(format!("{err:#}"))
    }

    /// Reject model output, keeping a truncated copy of what was said.
    pub fn malformed(source: NormalizeError, raw: &str) -> Self {
        Self::MalformedPlan {
            source,
            raw_output: truncate_output(raw),
        }
    }

    /// The model output behind a [`PlanError::MalformedPlan`].
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::MalformedPlan { raw_output, .. } => Some(raw_output),
            _ => None,
        }
    }
}

impl From<GatewayError> for PlanError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(msg) => Self::UpstreamUnavailable(msg),
            GatewayError::Rejected { status, message } => Self::UpstreamRejected { status, message },
        }
    }
}
