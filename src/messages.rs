use crate::codes;
use crate::error::ApiError;
use crate::models::{now_millis, MessageRecord, NewMessage};
use crate::store::Records;
use log::info;

/// Saves generated messages under short numeric codes
#[derive(Clone)]
pub struct MessageService {
    records: Records,
}

impl MessageService {
    pub fn new(records: Records) -> Self {
        MessageService { records }
    }

    /// Persist a message and return the code it can be fetched with
    pub async fn save(&self, message: NewMessage) -> Result<String, ApiError> {
        let records = &self.records;
        let code = codes::allocate(codes::generate_code, |candidate| async move {
            records.message_exists(&candidate).await
        })
        .await?;

        let record = MessageRecord {
            code: code.clone(),
            breaker_name: message.breaker_name,
            recipient_name: message.recipient_name,
            duration_text: message.duration_text,
            tone: message.tone,
            message_text: message.message_text,
            created_at: now_millis(),
        };
        self.records.put_message(&record).await?;

        info!("Saved message {code}");
        Ok(code)
    }

    pub async fn get(&self, code: &str) -> Result<MessageRecord, ApiError> {
        self.records
            .get_message(code)
            .await?
            .ok_or_else(|| ApiError::not_found("Message not found"))
    }
}
