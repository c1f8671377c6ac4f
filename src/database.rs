use crate::store::{KvStore, StoreError};
use async_trait::async_trait;
use log::info;
use sqlite::{Connection, State};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Key-value store kept in a single SQLite table
#[derive(Clone)]
pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub async fn new(database_path: &str) -> Result<Self, StoreError> {
        let connection = sqlite::open(database_path)?;
        let db = SqliteStore {
            connection: Arc::new(Mutex::new(connection)),
        };

        db.init_tables().await?;
        info!("SQLite store initialized at: {database_path}");
        Ok(db)
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        let conn = self.connection.lock().await;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
        )?;

        Ok(())
    }

    pub async fn count_entries(&self) -> Result<i64, StoreError> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare("SELECT COUNT(*) FROM kv_entries")?;

        match statement.next()? {
            State::Row => Ok(statement.read::<i64, _>(0)?),
            State::Done => Ok(0),
        }
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare("SELECT value FROM kv_entries WHERE key = ?")?;
        statement.bind((1, key))?;

        match statement.next()? {
            State::Row => Ok(Some(statement.read::<String, _>("value")?)),
            State::Done => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "INSERT OR REPLACE INTO kv_entries (key, value, updated_at)
             VALUES (?, ?, CURRENT_TIMESTAMP)",
        )?;
        statement.bind((1, key))?;
        statement.bind((2, value.as_str()))?;
        statement.next()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_key() {
        let db = SqliteStore::new(":memory:").await.unwrap();
        assert_eq!(db.get("thread:missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let db = SqliteStore::new(":memory:").await.unwrap();
        db.put("msg:1234", r#"{"code":"1234"}"#.to_string())
            .await
            .unwrap();
        assert_eq!(
            db.get("msg:1234").await.unwrap().as_deref(),
            Some(r#"{"code":"1234"}"#)
        );
    }

    #[tokio::test]
    async fn test_put_is_last_write_wins() {
        let db = SqliteStore::new(":memory:").await.unwrap();
        db.put("k", "first".to_string()).await.unwrap();
        db.put("k", "second".to_string()).await.unwrap();
        assert_eq!(db.get("k").await.unwrap().as_deref(), Some("second"));
        assert_eq!(db.count_entries().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_values_with_quotes_survive() {
        let db = SqliteStore::new(":memory:").await.unwrap();
        let value = r#"{"messageText":"it's \"over\"; DROP TABLE kv_entries;"}"#.to_string();
        db.put("thread:x", value.clone()).await.unwrap();
        assert_eq!(db.get("thread:x").await.unwrap(), Some(value));
    }
}
