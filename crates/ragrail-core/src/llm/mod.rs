//! LLM integration
//!
//! Provides traits and implementations for:
//! - Chat completions (blocking and streaming) via OpenAI-compatible services
//! - Embedding generation
//! - Relevance scoring with a chat model

mod cache;
mod client;
mod embedder;
mod message;
mod scoring;
mod traits;

pub use cache::{embedding_cache_key, EmbeddingCache};
pub use client::{parse_provider_error, APIMetrics, MetricsSnapshot, OpenAiClient};
pub use embedder::LlmEmbedder;
pub use message::{ChatMessage, ChatResponse, Role, TokenUsage, ToolCall, ToolFunction};
pub use scoring::LlmScoringModel;
pub use traits::*;
