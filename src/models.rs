//! Records persisted by the store and the request shapes that create them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Milliseconds since the Unix epoch, the timestamp unit used on every record
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================================================
// Code-addressed messages
// ============================================================================

/// A generated message saved under a short numeric code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub code: String,
    #[serde(default)]
    pub breaker_name: Option<String>,
    pub recipient_name: String,
    #[serde(default)]
    pub duration_text: Option<String>,
    pub tone: String,
    pub message_text: String,
    pub created_at: i64,
}

/// Validated input for saving a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub breaker_name: Option<String>,
    pub recipient_name: String,
    pub duration_text: Option<String>,
    pub tone: String,
    pub message_text: String,
}

// ============================================================================
// Threads
// ============================================================================

/// Who wrote a message inside a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyRole {
    Breaker,
    Recipient,
}

/// Lifecycle of a thread. Only `Open` is ever assigned today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    #[default]
    Open,
    Locked,
    Expired,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ThreadStatus::Open => "open",
            ThreadStatus::Locked => "locked",
            ThreadStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reply appended to a thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMessage {
    pub id: Uuid,
    pub role: ReplyRole,
    pub tone: String,
    pub text: String,
    pub created_at: i64,
}

/// Validated input for opening a thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewThread {
    pub breaker_name: Option<String>,
    pub recipient_name: String,
    pub duration_text: Option<String>,
    pub tone: String,
    pub message_text: String,
}

/// A shared message plus the replies written back to it, addressed by slug
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: Uuid,
    pub slug: String,
    #[serde(default)]
    pub breaker_name: Option<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub duration_text: Option<String>,
    pub tone: String,
    pub message_text: String,
    pub created_at: i64,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub status: ThreadStatus,
    #[serde(default)]
    pub messages: Vec<ThreadMessage>,
}

impl Thread {
    /// Build a fresh open thread with no replies
    pub fn new(slug: String, fields: NewThread, created_at: i64) -> Self {
        Thread {
            id: Uuid::new_v4(),
            slug,
            breaker_name: fields.breaker_name,
            recipient_name: Some(fields.recipient_name),
            duration_text: fields.duration_text,
            tone: fields.tone,
            message_text: fields.message_text,
            created_at,
            views: 0,
            reply_count: 0,
            status: ThreadStatus::Open,
            messages: Vec::new(),
        }
    }

    pub fn accepts_replies(&self) -> bool {
        self.status == ThreadStatus::Open
    }

    /// Append a reply. `reply_count` always equals `messages.len()` afterwards.
    pub fn push_reply(
        &mut self,
        role: ReplyRole,
        tone: impl Into<String>,
        text: impl Into<String>,
        created_at: i64,
    ) -> &ThreadMessage {
        self.messages.push(ThreadMessage {
            id: Uuid::new_v4(),
            role,
            tone: tone.into(),
            text: text.into(),
            created_at,
        });
        self.reply_count = self.messages.len() as u64;
        &self.messages[self.messages.len() - 1]
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Input to the text generator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub breaker_name: Option<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub duration_text: Option<String>,
    pub tone: String,
    /// Message being answered, set when writing a thread reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl GenerateRequest {
    /// Request for a reply written from the original recipient back to the sender
    pub fn reply_for(thread: &Thread, tone: impl Into<String>) -> Self {
        GenerateRequest {
            breaker_name: thread.recipient_name.clone(),
            recipient_name: thread.breaker_name.clone(),
            duration_text: thread.duration_text.clone(),
            tone: tone.into(),
            reply_to: Some(thread.message_text.clone()),
        }
    }
}
