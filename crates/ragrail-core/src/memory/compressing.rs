//! Summarizing chat memory store

use super::ChatMemoryStore;
use crate::error::Result;
use crate::llm::{ChatMessage, LLMClient, Role};
use async_trait::async_trait;
use std::sync::Arc;

/// Marks the summary section of the stored system message
pub const SUMMARY_PREFIX: &str =
    "Context: The following is a summary of the previous conversation:";

const SUMMARY_INSTRUCTION: &str =
    "Summarize the following dialogue into a brief summary, preserving context and tone:\n\n";

/// Replaces long histories with a single system message holding a summary
///
/// Compression is skipped while a tool call is in flight, that is when the
/// last message requests tools, is a tool result or is a system message.
pub struct CompressingChatMemoryStore {
    delegate: Arc<dyn ChatMemoryStore>,
    client: Arc<dyn LLMClient>,
    threshold: usize,
}

impl CompressingChatMemoryStore {
    pub fn new(delegate: Arc<dyn ChatMemoryStore>, client: Arc<dyn LLMClient>, threshold: usize) -> Self {
        Self {
            delegate,
            client,
            threshold,
        }
    }

    async fn summarize(&self, messages: &[ChatMessage]) -> Result<String> {
        let prompt = build_summary_prompt(messages);
        let summary = self.client.chat_text(vec![ChatMessage::user(prompt)]).await?;
        Ok(summary.trim().to_string())
    }
}

fn build_summary_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::from(SUMMARY_INSTRUCTION);
    for message in messages {
        let label = match message.role {
            Role::System => "Context",
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => continue,
        };
        prompt.push_str(&format!("{}: {}\n", label, message.content));
    }
    prompt
}

/// System text without any earlier summary section
fn strip_summary(text: &str) -> &str {
    match text.find(SUMMARY_PREFIX) {
        Some(idx) => text[..idx].trim(),
        None => text.trim(),
    }
}

fn summary_message(system: Option<&ChatMessage>, summary: &str) -> ChatMessage {
    let base = system.map(|m| strip_summary(&m.content)).unwrap_or("");
    if base.is_empty() {
        ChatMessage::system(format!("{}\n{}", SUMMARY_PREFIX, summary))
    } else {
        ChatMessage::system(format!("{}\n\n{}\n{}", base, SUMMARY_PREFIX, summary))
    }
}

#[async_trait]
impl ChatMemoryStore for CompressingChatMemoryStore {
    async fn get_messages(&self, memory_id: &str) -> Result<Vec<ChatMessage>> {
        self.delegate.get_messages(memory_id).await
    }

    async fn update_messages(&self, memory_id: &str, messages: Vec<ChatMessage>) -> Result<()> {
        let Some(last) = messages.last() else {
            tracing::warn!("No messages to compress for memory {}", memory_id);
            return Ok(());
        };

        if last.has_tool_calls() || last.is_system() || last.role == Role::Tool {
            tracing::debug!(
                "Skipping compression for memory {}: last message is a {} message",
                memory_id,
                last.role
            );
            return self.delegate.update_messages(memory_id, messages).await;
        }

        if messages.len() <= self.threshold {
            return self.delegate.update_messages(memory_id, messages).await;
        }

        tracing::info!(
            "Compressing memory {} with {} messages",
            memory_id,
            messages.len()
        );
        let summary = self.summarize(&messages).await?;
        let system = messages.iter().find(|m| m.is_system());
        let compressed = summary_message(system, &summary);
        tracing::debug!("Compressed memory {} into: {}", memory_id, compressed.content);

        self.delegate
            .update_messages(memory_id, vec![compressed])
            .await
    }

    async fn delete_messages(&self, memory_id: &str) -> Result<()> {
        self.delegate.delete_messages(memory_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, ToolCall, ToolFunction};
    use crate::memory::InMemoryChatMemoryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Summarizer {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LLMClient for Summarizer {
        async fn chat(&self, messages: Vec<ChatMessage>) -> Result<ChatResponse> {
            self.prompts
                .lock()
                .unwrap()
                .push(messages[0].content.clone());
            Ok(ChatResponse::from_text("sum", " The user greeted the assistant. "))
        }

        fn model_name(&self) -> &str {
            "sum"
        }
    }

    fn store(threshold: usize) -> (CompressingChatMemoryStore, Arc<Summarizer>) {
        let client = Arc::new(Summarizer::default());
        let store = CompressingChatMemoryStore::new(
            Arc::new(InMemoryChatMemoryStore::new()),
            client.clone(),
            threshold,
        );
        (store, client)
    }

    fn conversation(n: usize) -> Vec<ChatMessage> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("u{}", i))
                } else {
                    ChatMessage::assistant(format!("a{}", i))
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_below_threshold_is_stored_unchanged() {
        let (store, client) = store(5);
        store.update_messages("m", conversation(5)).await.unwrap();
        assert_eq!(store.get_messages("m").await.unwrap(), conversation(5));
        assert!(client.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_over_threshold_becomes_single_system_message() {
        let (store, client) = store(5);
        let mut messages = vec![ChatMessage::system("You are helpful.")];
        messages.extend(conversation(5));
        store.update_messages("m", messages).await.unwrap();

        let stored = store.get_messages("m").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(
            stored[0],
            ChatMessage::system(format!(
                "You are helpful.\n\n{}\nThe user greeted the assistant.",
                SUMMARY_PREFIX
            ))
        );

        let prompt = client.prompts.lock().unwrap()[0].clone();
        assert!(prompt.starts_with(SUMMARY_INSTRUCTION));
        assert!(prompt.contains("Context: You are helpful.\n"));
        assert!(prompt.contains("User: u0\n"));
        assert!(prompt.contains("Assistant: a1\n"));
    }

    #[tokio::test]
    async fn test_previous_summary_is_replaced() {
        let (store, _client) = store(2);
        let previous = ChatMessage::system(format!("Rules.\n\n{}\nold summary", SUMMARY_PREFIX));
        let mut messages = vec![previous];
        messages.extend(conversation(3));
        store.update_messages("m", messages).await.unwrap();

        let stored = store.get_messages("m").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].content.contains("old summary"));
        assert_eq!(stored[0].content.matches(SUMMARY_PREFIX).count(), 1);
        assert!(stored[0].content.starts_with("Rules.\n\n"));
    }

    #[tokio::test]
    async fn test_without_system_message() {
        let (store, _client) = store(1);
        store.update_messages("m", conversation(3)).await.unwrap();
        let stored = store.get_messages("m").await.unwrap();
        assert_eq!(
            stored,
            vec![ChatMessage::system(format!(
                "{}\nThe user greeted the assistant.",
                SUMMARY_PREFIX
            ))]
        );
    }

    #[tokio::test]
    async fn test_no_compression_during_tool_call() {
        let (store, client) = store(1);
        let call = ToolCall {
            id: "c".to_string(),
            call_type: "function".to_string(),
            function: ToolFunction {
                name: "f".to_string(),
                arguments: "{}".to_string(),
            },
        };

        let mut messages = conversation(3);
        messages.push(ChatMessage::assistant_with_tools("", vec![call]));
        store.update_messages("m", messages.clone()).await.unwrap();
        assert_eq!(store.get_messages("m").await.unwrap(), messages);

        messages.push(ChatMessage::tool_result("c", "done"));
        store.update_messages("m", messages.clone()).await.unwrap();
        assert_eq!(store.get_messages("m").await.unwrap(), messages);

        assert!(client.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_update_is_ignored() {
        let (store, _client) = store(1);
        store
            .update_messages("m", vec![ChatMessage::user("keep")])
            .await
            .unwrap();
        store.update_messages("m", Vec::new()).await.unwrap();
        assert_eq!(
            store.get_messages("m").await.unwrap(),
            vec![ChatMessage::user("keep")]
        );
    }
}
