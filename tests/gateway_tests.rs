//! Outbound Integration Tests
//!
//! Runs the OpenAI gateway and the Upstash store against throwaway local
//! servers that mimic the real endpoints.
//!
//! Run with: `cargo test --test gateway_tests`

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use breakupbot::config::OpenAiConfig;
use breakupbot::generation::{GenerationError, OpenAiGateway, TextGenerator, FALLBACK_TEXT};
use breakupbot::models::{GenerateRequest, MessageRecord};
use breakupbot::store::{KvStore, Records, StoreError, UpstashStore};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// ============================================================================
// OpenAI Gateway
// ============================================================================

#[derive(Clone)]
struct MockOpenAi {
    status: StatusCode,
    reply: Value,
    last_request: Arc<Mutex<Option<(Option<String>, Value)>>>,
}

async fn responses(
    State(mock): State<MockOpenAi>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *mock.last_request.lock().unwrap() = Some((auth, body));
    (mock.status, Json(mock.reply.clone()))
}

async fn gateway_with(status: StatusCode, reply: Value) -> (OpenAiGateway, MockOpenAi) {
    let mock = MockOpenAi {
        status,
        reply,
        last_request: Arc::new(Mutex::new(None)),
    };
    let app = Router::new()
        .route("/v1/responses", post(responses))
        .with_state(mock.clone());
    let base = spawn(app).await;

    let config = OpenAiConfig {
        api_key: "sk-test".to_string(),
        base_url: format!("{base}/v1"),
        ..OpenAiConfig::default()
    };
    (OpenAiGateway::new(config), mock)
}

fn request() -> GenerateRequest {
    GenerateRequest {
        recipient_name: Some("Sam".to_string()),
        tone: "Legalese".to_string(),
        ..GenerateRequest::default()
    }
}

#[tokio::test]
async fn test_gateway_returns_output_text() {
    let (gateway, mock) = gateway_with(
        StatusCode::OK,
        json!({"output_text": "  Pursuant to section 4, we are done.  "}),
    )
    .await;

    let text = gateway.generate(&request()).await.unwrap();
    assert_eq!(text, "Pursuant to section 4, we are done.");

    let (auth, body) = mock.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["temperature"], 0.9);
    assert_eq!(body["max_output_tokens"], 500);
    assert!(body.get("presence_penalty").is_none());

    let input = body["input"].as_array().unwrap();
    assert_eq!(input[0]["role"], "system");
    let user_prompt = input.last().unwrap()["content"].as_str().unwrap();
    assert!(user_prompt.contains("Recipient: Sam"));
    assert!(user_prompt.contains("Tone: Legalese"));
}

#[tokio::test]
async fn test_gateway_joins_output_fragments() {
    let (gateway, _) = gateway_with(
        StatusCode::OK,
        json!({"output": [{"content": [{"text": "Part one. "}, {"text": "Part two."}]}]}),
    )
    .await;
    assert_eq!(gateway.generate(&request()).await.unwrap(), "Part one. Part two.");
}

#[tokio::test]
async fn test_gateway_empty_response_uses_fallback() {
    let (gateway, _) = gateway_with(StatusCode::OK, json!({"output": []})).await;
    assert_eq!(gateway.generate(&request()).await.unwrap(), FALLBACK_TEXT);
}

#[tokio::test]
async fn test_gateway_surfaces_upstream_error() {
    let (gateway, _) = gateway_with(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({"error": {"message": "boom"}}),
    )
    .await;

    match gateway.generate(&request()).await {
        Err(GenerationError::Upstream { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "boom");
        }
        other => panic!("expected upstream error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_gateway_without_key_makes_no_request() {
    let (_, mock) = gateway_with(StatusCode::OK, json!({"output_text": "hi"})).await;
    let gateway = OpenAiGateway::new(OpenAiConfig::default());

    assert!(matches!(
        gateway.generate(&request()).await,
        Err(GenerationError::MissingApiKey)
    ));
    assert!(mock.last_request.lock().unwrap().is_none());
}

// ============================================================================
// Upstash Store
// ============================================================================

type Entries = Arc<DashMap<String, String>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer kv-token")
}

async fn upstash_get(
    State(entries): State<Entries>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"})));
    }
    let result = entries.get(&key).map(|v| v.value().clone());
    (StatusCode::OK, Json(json!({ "result": result })))
}

async fn upstash_set(
    State(entries): State<Entries>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    body: String,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"})));
    }
    if let Some(ttl) = params.get("EX") {
        entries.insert(format!("ttl:{key}"), ttl.clone());
    }
    entries.insert(key, body);
    (StatusCode::OK, Json(json!({"result": "OK"})))
}

async fn upstash() -> (String, Entries) {
    let entries: Entries = Arc::new(DashMap::new());
    let app = Router::new()
        .route("/get/:key", get(upstash_get))
        .route("/set/:key", post(upstash_set))
        .with_state(entries.clone());
    (spawn(app).await, entries)
}

#[tokio::test]
async fn test_upstash_round_trip() {
    let (base, entries) = upstash().await;
    let records = Records::new(Arc::new(UpstashStore::new(base, "kv-token", Some(3600))));

    let record = MessageRecord {
        code: "0420".to_string(),
        breaker_name: None,
        recipient_name: "Sam".to_string(),
        duration_text: None,
        tone: "Country Song".to_string(),
        message_text: "My truck and my heart both need a new driver.".to_string(),
        created_at: 1_700_000_000_000,
    };
    records.put_message(&record).await.unwrap();

    assert_eq!(records.get_message("0420").await.unwrap(), Some(record));
    assert!(entries.contains_key("msg:0420"));
    assert_eq!(
        entries.get("ttl:msg:0420").map(|v| v.value().clone()).as_deref(),
        Some("3600")
    );
}

#[tokio::test]
async fn test_upstash_missing_key_is_none() {
    let (base, _) = upstash().await;
    let store = UpstashStore::new(base, "kv-token", None);
    assert_eq!(store.get("thread:nope").await.unwrap(), None);
}

#[tokio::test]
async fn test_upstash_error_is_reported() {
    let (base, _) = upstash().await;
    let store = UpstashStore::new(base, "wrong-token", None);
    match store.get("msg:1234").await {
        Err(StoreError::Backend(message)) => assert_eq!(message, "Unauthorized"),
        other => panic!("expected backend error, got {other:?}"),
    }
}
