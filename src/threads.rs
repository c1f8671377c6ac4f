//! # Feature: Share Threads
//!
//! A saved message published under a slug that the recipient can open and answer.
//! Replies are generated with the sender and recipient swapped and appended to the
//! thread.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.3.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: Replies quote the message they answer
//! - 1.1.0: Closed threads reject replies
//! - 1.0.0: Create, view and reply

use crate::codes;
use crate::error::ApiError;
use crate::generation::TextGenerator;
use crate::models::{now_millis, GenerateRequest, NewThread, ReplyRole, Thread, ThreadMessage};
use crate::store::Records;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Links returned when a thread is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedThread {
    pub slug: String,
    pub read_url: String,
    pub thread_url: String,
}

impl CreatedThread {
    fn for_slug(base_url: &str, slug: String) -> Self {
        let base = base_url.trim_end_matches('/');
        CreatedThread {
            read_url: format!("{base}/m/{slug}"),
            thread_url: format!("{base}/t/{slug}"),
            slug,
        }
    }
}

#[derive(Clone)]
pub struct ThreadService {
    records: Records,
    generator: Arc<dyn TextGenerator>,
}

impl ThreadService {
    pub fn new(records: Records, generator: Arc<dyn TextGenerator>) -> Self {
        ThreadService { records, generator }
    }

    pub async fn create_thread(
        &self,
        fields: NewThread,
        base_url: &str,
    ) -> Result<CreatedThread, ApiError> {
        let records = &self.records;
        let slug = codes::allocate(codes::generate_slug, |candidate| async move {
            records.thread_exists(&candidate).await
        })
        .await?;

        let thread = Thread::new(slug.clone(), fields, now_millis());
        self.records.put_thread(&thread).await?;
        self.records.put_thread_id(&thread.id, &slug).await?;

        info!("Created thread {slug}");
        Ok(CreatedThread::for_slug(base_url, slug))
    }

    pub async fn get_thread(&self, slug: &str) -> Result<Thread, ApiError> {
        self.records
            .get_thread(slug)
            .await?
            .ok_or_else(|| ApiError::not_found("Thread not found"))
    }

    /// Look a thread up by slug, or by its id when no slug matches
    pub async fn find_thread(&self, key: &str) -> Result<Thread, ApiError> {
        if let Some(thread) = self.records.get_thread(key).await? {
            return Ok(thread);
        }
        if let Ok(id) = Uuid::parse_str(key) {
            if let Some(slug) = self.records.slug_for_thread_id(&id).await? {
                return self.get_thread(&slug).await;
            }
        }
        Err(ApiError::not_found("Thread not found"))
    }

    /// Generate a reply from the recipient and append it to the thread.
    ///
    /// The thread is read, extended and written back without a lock, so two
    /// concurrent replies to the same slug can drop one of them.
    pub async fn reply(&self, slug: &str, tone: &str) -> Result<ThreadMessage, ApiError> {
        let mut thread = self.get_thread(slug).await?;
        if !thread.accepts_replies() {
            return Err(ApiError::ThreadClosed(thread.status));
        }

        let request = GenerateRequest::reply_for(&thread, tone);
        let text = self.generator.generate(&request).await?;

        let previous = thread.reply_count;
        let reply = thread
            .push_reply(ReplyRole::Recipient, tone, text, now_millis())
            .clone();
        self.records.put_thread(&thread).await?;

        debug!(
            "Thread {slug} reply count {previous} -> {} (last write wins)",
            thread.reply_count
        );
        info!("Added {tone} reply to thread {slug}");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationError;
    use crate::models::ThreadStatus;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Generator that records each request and answers with a fixed result
    struct StubGenerator {
        reply: Result<String, String>,
        seen: Mutex<Vec<GenerateRequest>>,
    }

    impl StubGenerator {
        fn ok(text: &str) -> Arc<Self> {
            Arc::new(StubGenerator {
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(StubGenerator {
                reply: Err(message.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for StubGenerator {
        async fn generate(&self, request: &GenerateRequest) -> Result<String, GenerationError> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply.clone().map_err(|message| GenerationError::Upstream {
                status: 500,
                message,
            })
        }
    }

    fn new_thread() -> NewThread {
        NewThread {
            breaker_name: Some("Alex".to_string()),
            recipient_name: "Sam".to_string(),
            duration_text: Some("2 years".to_string()),
            tone: "Petty".to_string(),
            message_text: "I'm done".to_string(),
        }
    }

    fn service_with(generator: Arc<StubGenerator>) -> (ThreadService, Records) {
        let records = Records::new(Arc::new(MemoryStore::new()));
        (ThreadService::new(records.clone(), generator), records)
    }

    #[tokio::test]
    async fn test_create_thread_returns_links() {
        let (service, _) = service_with(StubGenerator::ok("unused"));
        let created = service
            .create_thread(new_thread(), "https://x.test/")
            .await
            .unwrap();
        assert_eq!(created.slug.len(), codes::SLUG_LEN);
        assert_eq!(created.read_url, format!("https://x.test/m/{}", created.slug));
        assert_eq!(created.thread_url, format!("https://x.test/t/{}", created.slug));
    }

    #[tokio::test]
    async fn test_created_thread_is_open_and_empty() {
        let (service, _) = service_with(StubGenerator::ok("unused"));
        let created = service.create_thread(new_thread(), "http://h").await.unwrap();

        let thread = service.get_thread(&created.slug).await.unwrap();
        assert_eq!(thread.status, ThreadStatus::Open);
        assert!(thread.messages.is_empty());
        assert_eq!(thread.reply_count, 0);
        assert_eq!(thread.views, 0);
        assert_eq!(thread.message_text, "I'm done");
        assert_eq!(thread.recipient_name.as_deref(), Some("Sam"));
    }

    #[tokio::test]
    async fn test_find_thread_by_slug_or_id() {
        let (service, _) = service_with(StubGenerator::ok("unused"));
        let created = service.create_thread(new_thread(), "http://h").await.unwrap();
        let thread = service.get_thread(&created.slug).await.unwrap();

        let by_slug = service.find_thread(&created.slug).await.unwrap();
        let by_id = service.find_thread(&thread.id.to_string()).await.unwrap();
        assert_eq!(by_slug, thread);
        assert_eq!(by_id, thread);

        let err = service.find_thread(&Uuid::new_v4().to_string()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reply_swaps_identities_and_appends() {
        let generator = StubGenerator::ok("wow ok");
        let (service, _) = service_with(generator.clone());
        let created = service.create_thread(new_thread(), "http://h").await.unwrap();

        let reply = service.reply(&created.slug, "Sarcastic").await.unwrap();
        assert_eq!(reply.role, ReplyRole::Recipient);
        assert_eq!(reply.tone, "Sarcastic");
        assert_eq!(reply.text, "wow ok");

        let seen = generator.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].breaker_name.as_deref(), Some("Sam"));
        assert_eq!(seen[0].recipient_name.as_deref(), Some("Alex"));
        assert_eq!(seen[0].duration_text.as_deref(), Some("2 years"));
        assert_eq!(seen[0].tone, "Sarcastic");
        assert_eq!(seen[0].reply_to.as_deref(), Some("I'm done"));

        let thread = service.get_thread(&created.slug).await.unwrap();
        assert_eq!(thread.reply_count, 1);
        assert_eq!(thread.messages.len(), 1);
        assert_eq!(thread.messages[0], reply);
    }

    #[tokio::test]
    async fn test_sequential_replies_accumulate() {
        let (service, _) = service_with(StubGenerator::ok("again"));
        let created = service.create_thread(new_thread(), "http://h").await.unwrap();

        for _ in 0..3 {
            service.reply(&created.slug, "Unbothered").await.unwrap();
        }

        let thread = service.get_thread(&created.slug).await.unwrap();
        assert_eq!(thread.reply_count, 3);
        assert_eq!(thread.messages.len(), 3);
    }

    #[tokio::test]
    async fn test_reply_to_unknown_slug_is_not_found() {
        let generator = StubGenerator::ok("unused");
        let (service, _) = service_with(generator.clone());
        let err = service.reply("missing", "Sarcastic").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert!(generator.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_generation_leaves_thread_unchanged() {
        let (service, _) = service_with(StubGenerator::failing("boom"));
        let created = service.create_thread(new_thread(), "http://h").await.unwrap();

        let err = service.reply(&created.slug, "Devastated").await.unwrap_err();
        assert!(err.to_string().contains("boom"));

        let thread = service.get_thread(&created.slug).await.unwrap();
        assert_eq!(thread.reply_count, 0);
        assert!(thread.messages.is_empty());
    }

    #[tokio::test]
    async fn test_locked_thread_rejects_replies() {
        let generator = StubGenerator::ok("unused");
        let (service, records) = service_with(generator.clone());
        let created = service.create_thread(new_thread(), "http://h").await.unwrap();

        let mut thread = records.get_thread(&created.slug).await.unwrap().unwrap();
        thread.status = ThreadStatus::Locked;
        records.put_thread(&thread).await.unwrap();

        let err = service.reply(&created.slug, "Sarcastic").await.unwrap_err();
        assert!(matches!(err, ApiError::ThreadClosed(ThreadStatus::Locked)));
        assert!(generator.seen.lock().unwrap().is_empty());
    }
}
