// Domain records and pure helpers
pub mod codes;
pub mod models;
pub mod rate_limiter;
pub mod share;

// Infrastructure
pub mod config;
pub mod database;
pub mod generation;
pub mod store;

// Application layer
pub mod messages;
pub mod threads;

// HTTP surface
pub mod api;
pub mod cors;
pub mod error;

pub use api::{router, AppState};
pub use config::Config;
pub use error::ApiError;
pub use generation::{GenerationError, OpenAiGateway, TextGenerator};
pub use messages::MessageService;
pub use models::{GenerateRequest, MessageRecord, Thread, ThreadMessage};
pub use rate_limiter::{ClientThrottle, TriesLimiter, TriesStatus};
pub use store::{KvStore, MemoryStore, Records, StoreError};
pub use threads::{CreatedThread, ThreadService};
