//! Model gateway: the seam between the plan pipeline and a hosted model.
//!
//! ```text
//! prompt::build_request --> ModelRequest --> dyn ModelGateway --> raw text
//!                                                 |
//!                                          GeminiGateway (HTTP)
//! ```

pub mod gemini;

use async_trait::async_trait;
use thiserror::Error;

use smartplan_db::models::ModelId;

pub use gemini::{GeminiConfig, GeminiGateway};

/// A fully built request for one model call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    /// Model variant to call.
    pub model: ModelId,
    /// Instructions that constrain the output format.
    pub system: String,
    /// The user turn, carrying the goal.
    pub user: String,
}

/// Failure of a single model call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network failure, timeout, or a server-side error.
    #[error("{0}")]
    Unavailable(String),
    /// The endpoint refused the request.
    #[error("HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// Sends a [`ModelRequest`] to a generative model and returns its raw text.
///
/// Implementations make exactly one outbound call per invocation and never
/// retry.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Short name for logs (e.g. "gemini").
    fn name(&self) -> &str;

    /// Call the model and return whatever text it produced.
    async fn generate(&self, request: &ModelRequest) -> Result<String, GatewayError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn ModelGateway) {}
};
