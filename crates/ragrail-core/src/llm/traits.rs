//! LLM trait definitions

use super::{ChatMessage, ChatResponse};
use crate::error::{RagRailError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

/// Trait for LLM service clients
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Generate chat completion
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<ChatResponse>;

    /// Generate chat completion as a stream of text deltas
    ///
    /// The default implementation yields the whole reply as one delta.
    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let response = self.chat(messages).await?;
        let text = response.message.content;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }

    /// Convenience wrapper returning only the reply text
    async fn chat_text(&self, messages: Vec<ChatMessage>) -> Result<String> {
        Ok(self.chat(messages).await?.message.content)
    }

    /// Generate embeddings for text
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagRailError::Llm("No embedding returned".to_string()))
    }

    /// Generate embeddings for multiple texts
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagRailError::Llm(format!(
            "{} does not provide embeddings",
            self.model_name()
        )))
    }

    /// Get embedding dimensions
    fn embedding_dimensions(&self) -> usize {
        0
    }

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Embedding generation trait
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for batch of texts
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Relevance scoring of text segments against a query
#[async_trait]
pub trait ScoringModel: Send + Sync {
    /// One score per segment, same order as `segments`
    async fn score_all(&self, query: &str, segments: &[String]) -> Result<Vec<f64>>;

    /// Get model name
    fn model_name(&self) -> &str;
}
