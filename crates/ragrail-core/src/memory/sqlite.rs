//! SQLite-backed chat memory

use super::ChatMemoryStore;
use crate::error::{RagRailError, Result};
use crate::llm::ChatMessage;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS chat_messages (
    memory_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (memory_id, position)
);
"#;

/// Messages stored as JSON rows ordered by position
///
/// SQLite calls run on the blocking thread pool.
#[derive(Clone)]
pub struct SqliteChatMemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteChatMemoryStore {
    /// Open database at path, creating if necessary
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Open in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| RagRailError::Other(anyhow::anyhow!("memory database lock poisoned")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| RagRailError::Other(e.into()))?
    }

    /// Memory ids with at least one message
    pub async fn memory_ids(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT memory_id FROM chat_messages ORDER BY memory_id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(ids)
        })
        .await
    }
}

#[async_trait]
impl ChatMemoryStore for SqliteChatMemoryStore {
    async fn get_messages(&self, memory_id: &str) -> Result<Vec<ChatMessage>> {
        let memory_id = memory_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT message FROM chat_messages WHERE memory_id = ?1 ORDER BY position",
            )?;
            let rows = stmt
                .query_map(params![memory_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut messages = Vec::with_capacity(rows.len());
            for json in rows {
                messages.push(serde_json::from_str(&json)?);
            }
            Ok(messages)
        })
        .await
    }

    async fn update_messages(&self, memory_id: &str, messages: Vec<ChatMessage>) -> Result<()> {
        let memory_id = memory_id.to_string();
        let rows = messages
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM chat_messages WHERE memory_id = ?1",
                params![memory_id],
            )?;
            for (position, json) in rows.iter().enumerate() {
                tx.execute(
                    "INSERT INTO chat_messages (memory_id, position, message, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![memory_id, position as i64, json, now],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_messages(&self, memory_id: &str) -> Result<()> {
        let memory_id = memory_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM chat_messages WHERE memory_id = ?1",
                params![memory_id],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ToolCall, ToolFunction};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_roundtrip_preserves_order_and_tool_calls() {
        let store = SqliteChatMemoryStore::open_in_memory().unwrap();
        let call = ToolCall {
            id: "call_1".to_string(),
            call_type: "function".to_string(),
            function: ToolFunction {
                name: "weather".to_string(),
                arguments: "{\"city\":\"Oslo\"}".to_string(),
            },
        };
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("weather in Oslo?"),
            ChatMessage::assistant_with_tools("", vec![call]),
            ChatMessage::tool_result("call_1", "rain"),
            ChatMessage::assistant("It rains."),
        ];

        store.update_messages("m1", messages.clone()).await.unwrap();
        assert_eq!(store.get_messages("m1").await.unwrap(), messages);

        store
            .update_messages("m1", vec![ChatMessage::user("reset")])
            .await
            .unwrap();
        assert_eq!(
            store.get_messages("m1").await.unwrap(),
            vec![ChatMessage::user("reset")]
        );
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("memory.sqlite");

        {
            let store = SqliteChatMemoryStore::open(&path).unwrap();
            store
                .update_messages("a", vec![ChatMessage::user("hello")])
                .await
                .unwrap();
            store
                .update_messages("b", vec![ChatMessage::user("bye")])
                .await
                .unwrap();
        }

        let store = SqliteChatMemoryStore::open(&path).unwrap();
        assert_eq!(store.memory_ids().await.unwrap(), vec!["a", "b"]);

        store.delete_messages("a").await.unwrap();
        assert!(store.get_messages("a").await.unwrap().is_empty());
        assert_eq!(store.memory_ids().await.unwrap(), vec!["b"]);
    }
}
