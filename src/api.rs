//! # Feature: HTTP API
//!
//! JSON routes for generating, saving and sharing messages and for reply
//! threads. Every route is served at the root and again under `/api`.
//!
//! - **Version**: 2.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 2.1.0: Optional per-client tries throttle on generation
//! - 2.0.0: Threads and replies
//! - 1.0.0: Generate, save and fetch by code

use crate::codes;
use crate::config::Config;
use crate::cors::{self, AllowedOrigins};
use crate::error::ApiError;
use crate::generation::{TextGenerator, BREAKER_TONES, RECIPIENT_TONES};
use crate::messages::MessageService;
use crate::models::{GenerateRequest, MessageRecord, NewMessage, NewThread, Thread};
use crate::rate_limiter::{Attempt, ClientThrottle, TriesStatus};
use crate::share::{self, SharePayload};
use crate::store::{KvStore, Records};
use crate::threads::{CreatedThread, ThreadService};
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{ConnectInfo, FromRequestParts, Path, Query, State};
use axum::http::header::HOST;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::routing::{get, post, MethodRouter};
use axum::{middleware, Json, Router};
use log::debug;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

// ============================================================================
// Application State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub generator: Arc<dyn TextGenerator>,
    pub messages: MessageService,
    pub threads: ThreadService,
    pub throttle: Arc<ClientThrottle>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn KvStore>, generator: Arc<dyn TextGenerator>) -> Self {
        let records = Records::new(store);
        let throttle = ClientThrottle::new(config.throttle.max_tries, config.throttle.cooldown());

        AppState {
            messages: MessageService::new(records.clone()),
            threads: ThreadService::new(records, generator.clone()),
            throttle: Arc::new(throttle),
            generator,
            config: Arc::new(config),
        }
    }

    /// Base URL for links handed back to the caller
    pub fn base_url(&self, headers: &HeaderMap) -> String {
        if let Some(site_url) = self.config.site_url() {
            return site_url.to_string();
        }

        let proto = header_value(headers, "x-forwarded-proto")
            .or_else(|| header_value(headers, "x-forwarded-protocol"))
            .unwrap_or("https");
        let host = header_value(headers, "x-forwarded-host")
            .or_else(|| header_value(headers, HOST.as_str()))
            .unwrap_or("localhost:3000");
        format!("{proto}://{host}")
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let origins = Arc::new(AllowedOrigins::new(&state.config.allowed_origins));

    let routes = Router::new()
        .route("/generate", only(post(generate)))
        .route("/save", only(post(save)))
        .route("/get/:code", only(get(get_message)))
        .route("/threads", only(post(create_thread)))
        .route("/threads/:key", only(get(get_thread)))
        .route("/reply", only(post(reply)))
        .route("/tries", only(get(tries_status)))
        .route("/tries/reset", only(post(reset_tries)))
        .route("/tones", only(get(tones)))
        .route("/share", only(post(create_share_link)))
        .route("/read", only(get(read_share_link)))
        .route("/ping", only(get(ping)));

    Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .fallback(unknown_route)
        .layer(middleware::from_fn_with_state(origins, cors::cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Answer unsupported verbs on a known path with a JSON 405
fn only(route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.fallback(method_not_allowed)
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

async fn unknown_route() -> ApiError {
    ApiError::not_found("Not found")
}

// ============================================================================
// Client Identity
// ============================================================================

/// Caller identity used for server-side tries tracking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(pub String);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(ClientId(client_identity(&parts.headers, peer)))
    }
}

fn client_identity(headers: &HeaderMap, peer: Option<String>) -> String {
    if let Some(id) = header_value(headers, "x-client-id") {
        return id.to_string();
    }
    if let Some(first) = header_value(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    peer.unwrap_or_else(|| "anonymous".to_string())
}

// ============================================================================
// Request Bodies
// ============================================================================

/// Message fields shared by the generate, save, thread and share bodies
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFields {
    #[serde(default)]
    pub breaker_name: Option<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub duration_text: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub message_text: Option<String>,
}

/// Blank strings count as absent
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl MessageFields {
    fn into_generate_request(self) -> Result<GenerateRequest, ApiError> {
        let tone = present(self.tone).ok_or_else(|| ApiError::validation("Missing tone"))?;
        Ok(GenerateRequest {
            breaker_name: present(self.breaker_name),
            recipient_name: present(self.recipient_name),
            duration_text: present(self.duration_text),
            tone,
            reply_to: None,
        })
    }

    /// Split into the required recipient, tone and text plus the optional names
    fn into_required(
        self,
        missing: &str,
    ) -> Result<(String, String, String, Option<String>, Option<String>), ApiError> {
        match (
            present(self.recipient_name),
            present(self.tone),
            present(self.message_text),
        ) {
            (Some(recipient), Some(tone), Some(text)) => Ok((
                recipient,
                tone,
                text,
                present(self.breaker_name),
                present(self.duration_text),
            )),
            _ => Err(ApiError::validation(missing)),
        }
    }

    fn into_new_message(self) -> Result<NewMessage, ApiError> {
        let (recipient_name, tone, message_text, breaker_name, duration_text) =
            self.into_required("Missing required fields")?;
        Ok(NewMessage {
            breaker_name,
            recipient_name,
            duration_text,
            tone,
            message_text,
        })
    }

    fn into_new_thread(self) -> Result<NewThread, ApiError> {
        let (recipient_name, tone, message_text, breaker_name, duration_text) = self
            .into_required("Missing required fields: recipientName, tone, messageText")?;
        Ok(NewThread {
            breaker_name,
            recipient_name,
            duration_text,
            tone,
            message_text,
        })
    }

    fn into_share_payload(self) -> Result<SharePayload, ApiError> {
        let (recipient_name, tone, message_text, breaker_name, duration_text) = self
            .into_required("Missing required fields: recipientName, tone, messageText")?;
        Ok(SharePayload {
            recipient_name: Some(recipient_name),
            breaker_name,
            duration_text,
            tone,
            message_text,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SlugQuery {
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShareQuery {
    #[serde(default)]
    pub d: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReplyBody {
    #[serde(default)]
    pub tone: Option<String>,
}

fn query_error(rejection: QueryRejection) -> ApiError {
    ApiError::validation(format!("Invalid query string: {}", rejection.body_text()))
}

fn checked_key(key: &str, what: &str) -> Result<(), ApiError> {
    if codes::is_valid_key(key) {
        Ok(())
    } else {
        Err(ApiError::validation(format!("Missing or invalid {what}")))
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct TextResponse {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CodeResponse {
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UrlResponse {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TonesResponse {
    pub breaker_tones: Vec<String>,
    pub recipient_tones: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub ok: bool,
    pub version: String,
}

// ============================================================================
// Handlers
// ============================================================================

async fn generate(
    State(state): State<AppState>,
    client: ClientId,
    body: Result<Json<MessageFields>, JsonRejection>,
) -> Result<Json<TextResponse>, ApiError> {
    let Json(fields) = body?;
    let request = fields.into_generate_request()?;

    if state.config.throttle.enabled {
        if let Attempt::Rejected(status) = state.throttle.note_attempt(&client.0) {
            return Err(ApiError::CoolingDown(status.remaining_text));
        }
    }

    debug!("Generating {} message for {}", request.tone, client.0);
    let text = state.generator.generate(&request).await?;
    Ok(Json(TextResponse { text }))
}

async fn save(
    State(state): State<AppState>,
    body: Result<Json<MessageFields>, JsonRejection>,
) -> Result<Json<CodeResponse>, ApiError> {
    let Json(fields) = body?;
    let code = state.messages.save(fields.into_new_message()?).await?;
    Ok(Json(CodeResponse { code }))
}

async fn get_message(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<MessageRecord>, ApiError> {
    let Path(code) = path?;
    checked_key(&code, "code")?;
    Ok(Json(state.messages.get(&code).await?))
}

async fn create_thread(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<MessageFields>, JsonRejection>,
) -> Result<Json<CreatedThread>, ApiError> {
    let Json(fields) = body?;
    let new_thread = fields.into_new_thread()?;
    let base_url = state.base_url(&headers);
    Ok(Json(state.threads.create_thread(new_thread, &base_url).await?))
}

async fn get_thread(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<Thread>, ApiError> {
    let Path(key) = path?;
    checked_key(&key, "slug")?;
    Ok(Json(state.threads.find_thread(&key).await?))
}

async fn reply(
    State(state): State<AppState>,
    query: Result<Query<SlugQuery>, QueryRejection>,
    body: Result<Json<ReplyBody>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let Query(query) = query.map_err(query_error)?;
    let slug = present(query.slug).ok_or_else(|| ApiError::validation("Missing slug"))?;
    let Json(body) = body?;
    let tone = present(body.tone).ok_or_else(|| ApiError::validation("Missing tone"))?;
    checked_key(&slug, "slug")?;

    state.threads.reply(&slug, &tone).await?;
    Ok(Json(OkResponse { ok: true }))
}

async fn tries_status(State(state): State<AppState>, client: ClientId) -> Json<TriesStatus> {
    Json(state.throttle.status(&client.0))
}

async fn reset_tries(State(state): State<AppState>, client: ClientId) -> Json<TriesStatus> {
    state.throttle.reset(&client.0);
    Json(state.throttle.status(&client.0))
}

async fn tones() -> Json<TonesResponse> {
    Json(TonesResponse {
        breaker_tones: BREAKER_TONES.iter().map(|t| t.to_string()).collect(),
        recipient_tones: RECIPIENT_TONES.iter().map(|t| t.to_string()).collect(),
    })
}

async fn create_share_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<MessageFields>, JsonRejection>,
) -> Result<Json<UrlResponse>, ApiError> {
    let Json(fields) = body?;
    let payload = fields.into_share_payload()?;
    let url = share::encode_share_url(&state.base_url(&headers), &payload)
        .map_err(|e| ApiError::Internal(e.into()))?;
    Ok(Json(UrlResponse { url }))
}

async fn read_share_link(
    query: Result<Query<ShareQuery>, QueryRejection>,
) -> Result<Json<SharePayload>, ApiError> {
    let Query(query) = query.map_err(query_error)?;
    let data = present(query.d).ok_or_else(|| ApiError::validation("Missing share data"))?;
    let payload =
        share::decode_share_payload(&data).map_err(|e| ApiError::validation(e.to_string()))?;
    Ok(Json(payload))
}

async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
