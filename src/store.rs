//! # Feature: Message and Thread Store
//!
//! Key-value persistence for saved messages and reply threads. Handlers depend on
//! the [`KvStore`] trait; the backend is picked from configuration.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 2.0.0: Injected store trait with memory, SQLite and Upstash backends
//! - 1.0.0: Process-wide in-memory map

use crate::config::{StoreBackend, StoreConfig};
use crate::database::SqliteStore;
use crate::models::{MessageRecord, Thread};
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Failures talking to the backing store. Missing keys are not errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlite::Error),

    #[error("Stored record is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Opaque get/put storage addressed by string keys.
///
/// `put` overwrites unconditionally, so concurrent writers to one key race and
/// the last write wins.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError>;
}

// ============================================================================
// In-Memory Backend
// ============================================================================

/// Process-local store for development and tests
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

// ============================================================================
// Upstash Redis REST Backend
// ============================================================================

#[derive(Deserialize)]
struct UpstashReply {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Store backed by the Upstash Redis REST API
pub struct UpstashStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
    ttl_secs: Option<u64>,
}

impl UpstashStore {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, ttl_secs: Option<u64>) -> Self {
        UpstashStore {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            ttl_secs,
        }
    }

    async fn read_reply(response: reqwest::Response) -> Result<UpstashReply, StoreError> {
        let status = response.status();
        let body = response.text().await?;

        let reply: UpstashReply = serde_json::from_str(&body)
            .map_err(|_| StoreError::Backend(format!("Upstash returned {status}: {body}")))?;

        if let Some(error) = reply.error {
            return Err(StoreError::Backend(error));
        }
        if !status.is_success() {
            return Err(StoreError::Backend(format!("Upstash returned {status}")));
        }
        Ok(reply)
    }
}

/// Percent-encode a key for use as a single path segment
fn encode_path_segment(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(char::from(byte))
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[async_trait]
impl KvStore for UpstashStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let url = format!("{}/get/{}", self.base_url, encode_path_segment(key));
        let response = self.client.get(url).bearer_auth(&self.token).send().await?;
        let reply = Self::read_reply(response).await?;

        Ok(match reply.result {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(value)) => Some(value),
            Some(other) => Some(other.to_string()),
        })
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut url = format!("{}/set/{}", self.base_url, encode_path_segment(key));
        if let Some(ttl) = self.ttl_secs {
            url.push_str(&format!("?EX={ttl}"));
        }

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .body(value)
            .send()
            .await?;
        Self::read_reply(response).await?;
        Ok(())
    }
}

// ============================================================================
// Typed Records
// ============================================================================

pub fn message_key(code: &str) -> String {
    format!("msg:{code}")
}

pub fn thread_key(slug: &str) -> String {
    format!("thread:{slug}")
}

/// Key of the entry mapping a thread id to its slug
pub fn thread_id_key(id: &Uuid) -> String {
    format!("thread-id:{id}")
}

/// Typed JSON access to messages and threads on top of a [`KvStore`]
#[derive(Clone)]
pub struct Records {
    store: Arc<dyn KvStore>,
}

impl Records {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Records { store }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.store.put(key, raw).await?;
        debug!("Stored {key}");
        Ok(())
    }

    pub async fn get_message(&self, code: &str) -> Result<Option<MessageRecord>, StoreError> {
        self.get_json(&message_key(code)).await
    }

    pub async fn put_message(&self, record: &MessageRecord) -> Result<(), StoreError> {
        self.put_json(&message_key(&record.code), record).await
    }

    pub async fn message_exists(&self, code: &str) -> Result<bool, StoreError> {
        Ok(self.store.get(&message_key(code)).await?.is_some())
    }

    pub async fn get_thread(&self, slug: &str) -> Result<Option<Thread>, StoreError> {
        self.get_json(&thread_key(slug)).await
    }

    pub async fn put_thread(&self, thread: &Thread) -> Result<(), StoreError> {
        self.put_json(&thread_key(&thread.slug), thread).await
    }

    pub async fn thread_exists(&self, slug: &str) -> Result<bool, StoreError> {
        Ok(self.store.get(&thread_key(slug)).await?.is_some())
    }

    pub async fn put_thread_id(&self, id: &Uuid, slug: &str) -> Result<(), StoreError> {
        self.store.put(&thread_id_key(id), slug.to_string()).await
    }

    pub async fn slug_for_thread_id(&self, id: &Uuid) -> Result<Option<String>, StoreError> {
        self.store.get(&thread_id_key(id)).await
    }
}

/// Open the backend selected in configuration
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn KvStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store (records are lost on restart)");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Sqlite => {
            let store = SqliteStore::new(&config.database_path)
                .await
                .with_context(|| format!("Failed to open SQLite store at {}", config.database_path))?;
            Ok(Arc::new(store))
        }
        StoreBackend::Upstash => {
            let url = config
                .upstash_url
                .clone()
                .context("upstash_url is required for the upstash store")?;
            let token = config
                .upstash_token
                .clone()
                .context("upstash_token is required for the upstash store")?;
            info!("Using Upstash store at {url}");
            Ok(Arc::new(UpstashStore::new(url, token, config.ttl_secs)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewThread, ReplyRole};

    fn records() -> Records {
        Records::new(Arc::new(MemoryStore::new()))
    }

    fn sample_message(code: &str) -> MessageRecord {
        MessageRecord {
            code: code.to_string(),
            breaker_name: None,
            recipient_name: "Sam".to_string(),
            duration_text: Some("3 months".to_string()),
            tone: "Cold".to_string(),
            message_text: "It's over.".to_string(),
            created_at: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_message_round_trip() {
        let records = records();
        let record = sample_message("3742");
        records.put_message(&record).await.unwrap();
        assert_eq!(records.get_message("3742").await.unwrap(), Some(record));
        assert!(records.message_exists("3742").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let records = records();
        assert_eq!(records.get_message("0000").await.unwrap(), None);
        assert_eq!(records.get_thread("nope").await.unwrap(), None);
        assert!(!records.thread_exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let records = records();
        records.put_message(&sample_message("1111")).await.unwrap();
        let mut changed = sample_message("1111");
        changed.message_text = "Actually, goodbye.".to_string();
        records.put_message(&changed).await.unwrap();
        assert_eq!(
            records.get_message("1111").await.unwrap().unwrap().message_text,
            "Actually, goodbye."
        );
    }

    #[tokio::test]
    async fn test_thread_round_trip_with_replies() {
        let records = records();
        let mut thread = Thread::new(
            "slug0000001".to_string(),
            NewThread {
                breaker_name: Some("Alex".to_string()),
                recipient_name: "Sam".to_string(),
                duration_text: None,
                tone: "Petty".to_string(),
                message_text: "I'm done".to_string(),
            },
            10,
        );
        thread.push_reply(ReplyRole::Recipient, "Sarcastic", "wow", 11);
        records.put_thread(&thread).await.unwrap();
        assert_eq!(records.get_thread("slug0000001").await.unwrap(), Some(thread));
    }

    #[tokio::test]
    async fn test_thread_id_index() {
        let records = records();
        let id = Uuid::new_v4();
        assert_eq!(records.slug_for_thread_id(&id).await.unwrap(), None);
        records.put_thread_id(&id, "slug0000001").await.unwrap();
        assert_eq!(
            records.slug_for_thread_id(&id).await.unwrap().as_deref(),
            Some("slug0000001")
        );
    }

    #[tokio::test]
    async fn test_messages_and_threads_do_not_collide() {
        let store = Arc::new(MemoryStore::new());
        let records = Records::new(store.clone());
        records.put_message(&sample_message("abcd")).await.unwrap();
        assert!(!records.thread_exists("abcd").await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        store.put(&message_key("9999"), "not json".to_string()).await.unwrap();
        let records = Records::new(store);
        assert!(matches!(
            records.get_message("9999").await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_encode_path_segment() {
        assert_eq!(encode_path_segment("thread:ab-_9"), "thread%3Aab-_9");
        assert_eq!(encode_path_segment("a b/c"), "a%20b%2Fc");
    }
}
