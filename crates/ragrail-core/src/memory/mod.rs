//! Chat memory
//!
//! Stores hold the messages of each conversation keyed by an opaque memory
//! id. `MessageWindowChatMemory` bounds one conversation and
//! `CompressingChatMemoryStore` replaces long histories with a summary.

mod compressing;
mod sqlite;
mod window;

pub use compressing::{CompressingChatMemoryStore, SUMMARY_PREFIX};
pub use sqlite::SqliteChatMemoryStore;
pub use window::MessageWindowChatMemory;

use crate::config::{MemoryConfig, MemoryStoreKind};
use crate::error::{RagRailError, Result};
use crate::llm::{ChatMessage, LLMClient};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Persistence for chat messages
#[async_trait]
pub trait ChatMemoryStore: Send + Sync {
    /// Messages in insertion order; empty for an unknown id
    async fn get_messages(&self, memory_id: &str) -> Result<Vec<ChatMessage>>;

    /// Replace every message of `memory_id`
    async fn update_messages(&self, memory_id: &str, messages: Vec<ChatMessage>) -> Result<()>;

    async fn delete_messages(&self, memory_id: &str) -> Result<()>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemoryChatMemoryStore {
    messages: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryChatMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> RagRailError {
    RagRailError::Other(anyhow::anyhow!("chat memory lock poisoned"))
}

#[async_trait]
impl ChatMemoryStore for InMemoryChatMemoryStore {
    async fn get_messages(&self, memory_id: &str) -> Result<Vec<ChatMessage>> {
        let messages = self.messages.read().map_err(|_| poisoned())?;
        Ok(messages.get(memory_id).cloned().unwrap_or_default())
    }

    async fn update_messages(&self, memory_id: &str, messages: Vec<ChatMessage>) -> Result<()> {
        let mut all = self.messages.write().map_err(|_| poisoned())?;
        all.insert(memory_id.to_string(), messages);
        Ok(())
    }

    async fn delete_messages(&self, memory_id: &str) -> Result<()> {
        let mut all = self.messages.write().map_err(|_| poisoned())?;
        all.remove(memory_id);
        Ok(())
    }
}

/// Build the store described by the `memory` config section
///
/// `client` is only needed when compression is enabled.
pub fn store_from_config(
    config: &MemoryConfig,
    client: Option<Arc<dyn LLMClient>>,
) -> Result<Arc<dyn ChatMemoryStore>> {
    let base: Arc<dyn ChatMemoryStore> = match config.store {
        MemoryStoreKind::Memory => Arc::new(InMemoryChatMemoryStore::new()),
        MemoryStoreKind::Sqlite => Arc::new(SqliteChatMemoryStore::open(config.sqlite_path())?),
    };

    if !config.compression {
        return Ok(base);
    }

    let client = client.ok_or_else(|| {
        RagRailError::Config("memory.compression requires a chat model".to_string())
    })?;
    Ok(Arc::new(CompressingChatMemoryStore::new(
        base,
        client,
        config.compression_threshold,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_keeps_order_per_id() {
        let store = InMemoryChatMemoryStore::new();
        store
            .update_messages("a", vec![ChatMessage::user("1"), ChatMessage::assistant("2")])
            .await
            .unwrap();
        store
            .update_messages("b", vec![ChatMessage::user("other")])
            .await
            .unwrap();

        let a = store.get_messages("a").await.unwrap();
        assert_eq!(a, vec![ChatMessage::user("1"), ChatMessage::assistant("2")]);

        store.delete_messages("a").await.unwrap();
        assert!(store.get_messages("a").await.unwrap().is_empty());
        assert_eq!(store.get_messages("b").await.unwrap().len(), 1);
    }

    #[test]
    fn test_compression_without_client_is_config_error() {
        let config = MemoryConfig {
            compression: true,
            ..MemoryConfig::default()
        };
        assert!(matches!(
            store_from_config(&config, None),
            Err(RagRailError::Config(_))
        ));
    }
}
