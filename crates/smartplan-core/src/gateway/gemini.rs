//! Gemini `generateContent` client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{GatewayError, ModelGateway, ModelRequest};

/// Gemini client configuration.
#[derive(Clone)]
pub struct GeminiConfig {
    /// API key sent in the `x-goog-api-key` header.
    pub api_key: String,
    /// Base endpoint URL, without a trailing slash.
    pub endpoint: String,
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
    /// Upper bound on generated tokens.
    pub max_output_tokens: u32,
}

impl GeminiConfig {
    pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            timeout_secs: 60,
            max_output_tokens: 2048,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

/// [`ModelGateway`] backed by the Gemini REST API.
pub struct GeminiGateway {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiGateway {
    pub fn new(config: GeminiConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn build_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.config.endpoint, model)
    }

    fn build_body<'a>(&self, request: &'a ModelRequest) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: &request.user,
                }],
            }],
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: &request.system,
                }],
            },
            generation_config: GenerationConfig {
                temperature: 0.0,
                max_output_tokens: self.config.max_output_tokens,
                response_mime_type: "application/json",
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: SystemInstruction<'a>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: Option<u16>,
    message: String,
}

// ---------------------------------------------------------------------------
// Response handling
// ---------------------------------------------------------------------------

/// Classify a non-success HTTP status.
///
/// Server-side failures and request timeouts mean the service could not
/// answer; every other client error is a refusal.
fn classify_failure(status: StatusCode, body: &str) -> GatewayError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string());

    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        GatewayError::Unavailable(format!("HTTP {}: {message}", status.as_u16()))
    } else {
        GatewayError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

/// Pull the generated text out of a successful response body.
///
/// An `error` object in the body is a refusal even under a 2xx status. A
/// response with no candidate text (e.g. a blocked prompt) yields an empty
/// string; deciding whether that is a usable plan is not the gateway's job.
fn extract_text(status: StatusCode, body: &str) -> Result<String, GatewayError> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| GatewayError::Unavailable(format!("undecodable response body: {e}")))?;

    if let Some(detail) = parsed.error {
        return Err(GatewayError::Rejected {
            status: detail.code.unwrap_or_else(|| status.as_u16()),
            message: detail.message,
        });
    }

    let Some(candidate) = parsed.candidates.into_iter().next() else {
        let reason = parsed
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "none given".to_string());
        warn!(block_reason = %reason, "model returned no candidates");
        return Ok(String::new());
    };

    match candidate.finish_reason.as_deref() {
        None | Some("STOP") => {}
        Some(reason) => warn!(finish_reason = reason, "model stopped early"),
    }

    Ok(candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default())
}

#[async_trait]
impl ModelGateway for GeminiGateway {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &ModelRequest) -> Result<String, GatewayError> {
        let url = self.build_url(request.model.as_str());
        debug!(model = %request.model, "calling model endpoint");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&self.build_body(request))
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }

        extract_text(status, &body)
    }
}
