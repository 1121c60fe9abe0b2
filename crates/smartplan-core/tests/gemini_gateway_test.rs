//! Gemini gateway tests against a local HTTP server.
//!
//! Each test binds an axum server on an ephemeral port that plays the
//! `generateContent` endpoint, so no real credentials or network are needed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};

use smartplan_core::gateway::{
    GatewayError, GeminiConfig, GeminiGateway, ModelGateway, ModelRequest,
};
use smartplan_db::models::ModelId;

/// What the fake endpoint saw.
#[derive(Debug, Clone)]
struct Captured {
    path: String,
    api_key: Option<String>,
    body: serde_json::Value,
}

#[derive(Clone)]
struct Fake {
    status: StatusCode,
    reply: &'static str,
    delay: Duration,
    seen: Arc<Mutex<Vec<Captured>>>,
}

async fn handle(
    State(fake): State<Fake>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    fake.seen.lock().unwrap().push(Captured {
        path: uri.path().to_string(),
        api_key: headers
            .get("x-goog-api-key")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        body: serde_json::from_str(&body).unwrap_or(serde_json::Value::Null),
    });
    if !fake.delay.is_zero() {
        tokio::time::sleep(fake.delay).await;
    }
    (fake.status, fake.reply.to_string())
}

/// Start a fake endpoint and return its base URL plus the request log.
async fn spawn_endpoint(
    status: StatusCode,
    reply: &'static str,
    delay: Duration,
) -> (String, Arc<Mutex<Vec<Captured>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let fake = Fake {
        status,
        reply,
        delay,
        seen: Arc::clone(&seen),
    };
    let app = Router::new().fallback(handle).with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/v1beta"), seen)
}

fn gateway(endpoint: &str) -> GeminiGateway {
    GeminiGateway::new(GeminiConfig::new("test-key").with_endpoint(endpoint)).unwrap()
}

fn request(model: ModelId) -> ModelRequest {
    ModelRequest {
        model,
        system: "Return JSON only.".to_string(),
        user: "The user's goal is:\n\nLaunch a podcast".to_string(),
    }
}

const OK_REPLY: &str = r#"{
  "candidates": [{
    "content": {"role": "model", "parts": [{"text": "[{\"id\":\"t1\",\"title\":\"Choose topic\",\"duration_days\":2,\"depends_on\":[]}]"}]},
    "finishReason": "STOP"
  }]
}"#;

#[tokio::test]
async fn returns_candidate_text_and_sends_expected_request() {
    let (endpoint, seen) = spawn_endpoint(StatusCode::OK, OK_REPLY, Duration::ZERO).await;

    let text = gateway(&endpoint)
        .generate(&request(ModelId::Gemini25FlashLite))
        .await
        .expect("call should succeed");
    assert!(text.starts_with(r#"[{"id":"t1""#));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1, "exactly one outbound call");
    let call = &seen[0];
    assert_eq!(
        call.path,
        "/v1beta/models/gemini-2.5-flash-lite:generateContent"
    );
    assert_eq!(call.api_key.as_deref(), Some("test-key"));
    assert_eq!(
        call.body["systemInstruction"]["parts"][0]["text"],
        "Return JSON only."
    );
    assert!(
        call.body["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("Launch a podcast")
    );
}

#[tokio::test]
async fn invalid_key_is_rejected() {
    let (endpoint, _) = spawn_endpoint(
        StatusCode::BAD_REQUEST,
        r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#,
        Duration::ZERO,
    )
    .await;

    let err = gateway(&endpoint)
        .generate(&request(ModelId::default()))
        .await
        .unwrap_err();
    match err {
        GatewayError::Rejected { status, message } => {
            assert_eq!(status, 400);
            assert!(message.starts_with("API key not valid"));
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn quota_exhaustion_is_rejected() {
    let (endpoint, _) = spawn_endpoint(
        StatusCode::TOO_MANY_REQUESTS,
        r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED"}}"#,
        Duration::ZERO,
    )
    .await;

    let err = gateway(&endpoint)
        .generate(&request(ModelId::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Rejected { status: 429, .. }));
}

#[tokio::test]
async fn server_error_is_unavailable() {
    let (endpoint, seen) = spawn_endpoint(
        StatusCode::SERVICE_UNAVAILABLE,
        r#"{"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#,
        Duration::ZERO,
    )
    .await;

    let err = gateway(&endpoint)
        .generate(&request(ModelId::default()))
        .await
        .unwrap_err();
    match err {
        GatewayError::Unavailable(msg) => assert!(msg.contains("overloaded")),
        other => panic!("expected Unavailable, got {other:?}"),
    }
    assert_eq!(seen.lock().unwrap().len(), 1, "no retries");
}

#[tokio::test]
async fn unreachable_endpoint_is_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = gateway(&format!("http://{addr}/v1beta"))
        .generate(&request(ModelId::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Unavailable(_)));
}

#[tokio::test]
async fn slow_endpoint_times_out_as_unavailable() {
    let (endpoint, _) = spawn_endpoint(StatusCode::OK, OK_REPLY, Duration::from_secs(5)).await;

    let mut config = GeminiConfig::new("test-key").with_endpoint(endpoint);
    config.timeout_secs = 1;
    let err = GeminiGateway::new(config)
        .unwrap()
        .generate(&request(ModelId::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Unavailable(_)));
}

#[tokio::test]
async fn blocked_prompt_yields_empty_text() {
    let (endpoint, _) = spawn_endpoint(
        StatusCode::OK,
        r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#,
        Duration::ZERO,
    )
    .await;

    let text = gateway(&endpoint)
        .generate(&request(ModelId::default()))
        .await
        .unwrap();
    assert!(text.is_empty());
}
