//! # Feature: Message Generation
//!
//! Builds the breakup prompt, sends it to the OpenAI Responses API and pulls the
//! text back out of whatever response shape comes back.
//!
//! - **Version**: 3.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 3.1.0: Replies carry the message they answer
//! - 3.0.0: Extended tone catalog, few-shot examples, text extraction fallback chain
//! - 2.0.0: Responses API with configurable sampling
//! - 1.0.0: Initial chat completion call

use crate::config::OpenAiConfig;
use crate::models::GenerateRequest;
use async_trait::async_trait;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Returned instead of an empty string when the model produces no text
pub const FALLBACK_TEXT: &str = "The model did not return any text. Please try again.";

/// Tones offered to the person sending the message
pub const BREAKER_TONES: &[&str] = &[
    "Petty",
    "Cold",
    "Poetic",
    "Cosmic",
    "Mean",
    "Country Song",
    "Legalese",
    "Therapist Voice",
    "Inspirational Coach",
    "Scranton Breakup",
    "TikTok Breakup",
    "Verbose & Vicious",
    "Surprise Me",
];

/// Tones offered to the recipient when replying
pub const RECIPIENT_TONES: &[&str] = &[
    "Devastated",
    "Sarcastic",
    "Unbothered",
    "Legalese",
    "Therapist Voice",
    "Surprise Me",
];

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("OpenAI error: {status} {message}")]
    Upstream { status: u16, message: String },

    #[error("Malformed response from OpenAI: {0}")]
    MalformedResponse(String),

    #[error("OpenAI request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("OPENAI_API_KEY is not configured")]
    MissingApiKey,
}

/// Anything that can turn a generation request into message text
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, GenerationError>;
}

// ============================================================================
// Prompt
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    fn new(role: PromptRole, content: impl Into<String>) -> Self {
        PromptMessage {
            role,
            content: content.into(),
        }
    }
}

fn system_prompt() -> String {
    [
        "You are BreakupBot: a sarcastic, funny, emotionally distant breakup message generator.".to_string(),
        "Rules: Be witty, sharp, and entertaining, never cruel. No slurs, hate, threats, or doxxing. \
         Never mention real addresses, phone numbers, workplaces, or other identifying details."
            .to_string(),
        "Keep it 6-10 sentences max. Include a short opener and a mic-drop ending line.".to_string(),
        "Write plain text only: no markdown, no headings, no emoji spam.".to_string(),
        format!("Tones available: {}.", BREAKER_TONES.join(", ")),
        format!("Reply tones available: {}.", RECIPIENT_TONES.join(", ")),
        "If given 'Surprise Me', pick a fitting tone at random.".to_string(),
        "When replying to a message, answer it directly from the recipient's point of view.".to_string(),
    ]
    .join("\n")
}

/// Fixed example exchanges that set the register before the real request
const FEW_SHOT: &[(&str, &str)] = &[
    (
        "Write a breakup message.\nRecipient: Jordan\nRelationship length: 8 months\nTone: Petty\nIf breaker name exists, sign it as: Casey",
        "Hey Jordan. I've been thinking, which you'd know nothing about. \
         Eight months is a long time to split fries with someone who 'isn't hungry' and then eats all of them. \
         I'm returning your hoodie, minus the dignity you left in it. \
         Your playlist was a hostage situation and I'm finally free. \
         Please don't text me, your typing bubble has more personality than you do. \
         Best of luck with whoever's next. They'll need it.\n- Casey",
    ),
    (
        "Write a breakup message.\nRecipient: Riley\nRelationship length: 2 years\nTone: Legalese\nIf breaker name exists, sign it as: ",
        "NOTICE OF TERMINATION. This letter serves as formal notice that the relationship between the undersigned \
         and Riley (hereinafter 'the Party Who Never Refills the Water Filter') is terminated effective immediately. \
         All shared streaming accounts shall revert to their original payers. \
         Custody of the houseplant is awarded to whoever remembered it existed. \
         No further 'u up?' communications shall be entertained. \
         This decision is final and not subject to appeal, mediation, or puppy-dog eyes.",
    ),
];

fn or_default<'a>(value: &'a Option<String>, default: &'a str) -> &'a str {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

fn user_prompt(request: &GenerateRequest) -> String {
    let mut prompt = format!(
        "Write a breakup message.\nRecipient: {}\nRelationship length: {}\nTone: {}\nIf breaker name exists, sign it as: {}",
        or_default(&request.recipient_name, "—"),
        or_default(&request.duration_text, ""),
        request.tone,
        or_default(&request.breaker_name, ""),
    );

    if let Some(original) = request.reply_to.as_deref().filter(|t| !t.trim().is_empty()) {
        prompt.push_str("\nThis is a reply to the following message:\n\"\"\"\n");
        prompt.push_str(original.trim());
        prompt.push_str("\n\"\"\"");
    }

    prompt
}

/// System block, few-shot exchanges, then the user block
pub fn build_prompt(request: &GenerateRequest) -> Vec<PromptMessage> {
    let mut messages = Vec::with_capacity(2 + FEW_SHOT.len() * 2);
    messages.push(PromptMessage::new(PromptRole::System, system_prompt()));
    for (user, assistant) in FEW_SHOT {
        messages.push(PromptMessage::new(PromptRole::User, *user));
        messages.push(PromptMessage::new(PromptRole::Assistant, *assistant));
    }
    messages.push(PromptMessage::new(PromptRole::User, user_prompt(request)));
    messages
}

// ============================================================================
// Response Handling
// ============================================================================

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Pull message text out of a response body.
///
/// Tries the `output_text` convenience field, then every text fragment in
/// `output[].content[]`, then a chat-completion `choices[0].message.content`.
/// Falls back to [`FALLBACK_TEXT`] when all of them are empty.
pub fn extract_text(body: &Value) -> String {
    if let Some(text) = body.get("output_text").and_then(Value::as_str).and_then(non_empty) {
        return text;
    }

    let fragments: String = body
        .get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if let Some(text) = non_empty(&fragments) {
        return text;
    }

    if let Some(text) = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .and_then(non_empty)
    {
        return text;
    }

    warn!("Generation response contained no text, using fallback");
    FALLBACK_TEXT.to_string()
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

fn error_message(status: u16, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return parsed.error.message;
    }
    if let Some(text) = non_empty(body) {
        return text;
    }
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown error")
        .to_string()
}

/// Turn a raw HTTP status and body into message text or an error
pub fn interpret_response(status: u16, body: &str) -> Result<String, GenerationError> {
    if !(200..300).contains(&status) {
        let message = error_message(status, body);
        error!("OpenAI returned {status}: {message}");
        return Err(GenerationError::Upstream { status, message });
    }

    let parsed: Value = serde_json::from_str(body)
        .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;
    Ok(extract_text(&parsed))
}

// ============================================================================
// OpenAI Gateway
// ============================================================================

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<PromptMessage>,
    temperature: f64,
    top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    max_output_tokens: u32,
}

/// [`TextGenerator`] backed by the OpenAI Responses API
#[derive(Clone)]
pub struct OpenAiGateway {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiGateway {
    pub fn new(config: OpenAiConfig) -> Self {
        OpenAiGateway {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/responses", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl TextGenerator for OpenAiGateway {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, GenerationError> {
        if self.config.api_key.trim().is_empty() {
            return Err(GenerationError::MissingApiKey);
        }

        let body = ResponsesRequest {
            model: &self.config.model,
            input: build_prompt(request),
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            presence_penalty: self.config.presence_penalty,
            max_output_tokens: self.config.max_output_tokens,
        };

        debug!(
            "Generating with model {} (tone: {})",
            self.config.model, request.tone
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        interpret_response(status, &text)
    }
}
