//! Embedder backed by an LLM client's embeddings endpoint

use super::{Embedder, LLMClient};
use crate::config::LLMServiceConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Embedder that delegates to an OpenAI-compatible service
pub struct LlmEmbedder {
    client: Arc<dyn LLMClient>,
    model: String,
}

impl LlmEmbedder {
    /// Create from LLM client; `model` is the embedding model name
    pub fn new(client: Arc<dyn LLMClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Create from configuration
    pub fn from_config(config: LLMServiceConfig) -> Result<Self> {
        let model = config.embedding_model.clone();
        let client = super::OpenAiClient::new(config)?;
        Ok(Self::new(Arc::new(client), model))
    }
}

#[async_trait]
impl Embedder for LlmEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.client.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.client.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.client.embedding_dimensions()
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
