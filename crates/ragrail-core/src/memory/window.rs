//! Bounded chat memory for one conversation

use super::ChatMemoryStore;
use crate::error::Result;
use crate::llm::{ChatMessage, Role};
use std::sync::Arc;

/// Keeps the most recent `max_messages` messages of one memory id
///
/// The system message is never evicted; a new system message replaces the
/// previous one. Evicting an assistant turn that requested tools also
/// evicts the tool results answering it.
#[derive(Clone)]
pub struct MessageWindowChatMemory {
    id: String,
    max_messages: usize,
    store: Arc<dyn ChatMemoryStore>,
}

impl MessageWindowChatMemory {
    pub fn new(id: impl Into<String>, max_messages: usize, store: Arc<dyn ChatMemoryStore>) -> Self {
        Self {
            id: id.into(),
            max_messages: max_messages.max(1),
            store,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn messages(&self) -> Result<Vec<ChatMessage>> {
        self.store.get_messages(&self.id).await
    }

    pub async fn add(&self, message: ChatMessage) -> Result<()> {
        self.add_all(vec![message]).await
    }

    /// Append messages and write the window back in one update
    pub async fn add_all(&self, new_messages: Vec<ChatMessage>) -> Result<()> {
        let mut messages = self.messages().await?;
        for message in new_messages {
            push_message(&mut messages, message);
        }
        evict(&mut messages, self.max_messages);
        self.store.update_messages(&self.id, messages).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.delete_messages(&self.id).await
    }
}

fn push_message(messages: &mut Vec<ChatMessage>, message: ChatMessage) {
    if message.is_system() {
        if messages.iter().any(|m| *m == message) {
            return;
        }
        messages.retain(|m| !m.is_system());
        messages.insert(0, message);
    } else {
        messages.push(message);
    }
}

fn evict(messages: &mut Vec<ChatMessage>, max_messages: usize) {
    while messages.len() > max_messages {
        let Some(idx) = messages.iter().position(|m| !m.is_system()) else {
            return;
        };
        let evicted = messages.remove(idx);
        if evicted.has_tool_calls() {
            while messages.get(idx).map(|m| m.role == Role::Tool).unwrap_or(false) {
                messages.remove(idx);
            }
        }
        tracing::trace!("Evicted {} message from chat memory", evicted.role);
    }
}
