//! Ragrail Core Library
//!
//! Building blocks that wrap a chat model call.
//!
//! # Features
//! - Retrieval augmentation: query transformation, routing, retrieval,
//!   Reciprocal Rank Fusion (RRF) and content injection
//! - Input, output and tool guardrails with retries, timing events and metrics
//! - Windowed chat memory with in-memory, SQLite and summarizing stores
//! - Cost estimation from token usage

pub mod config;
pub mod cost;
pub mod error;
pub mod guardrail;
pub mod llm;
pub mod memory;
pub mod rag;
pub mod service;

pub use config::{Config, LLMServiceConfig, MemoryConfig, PricingConfig, RagConfig};
pub use cost::{Cost, CostEstimator, CostEstimatorService, PriceTableCostEstimator};
pub use error::{Error, RagRailError, Result};
pub use guardrail::{
    GuardrailChain, GuardrailMetrics, InputGuardrail, InputGuardrailResult, OutputGuardrail,
    OutputGuardrailResult, TracingEventSink,
};
pub use llm::{
    ChatMessage, ChatResponse, Embedder, LLMClient, LlmEmbedder, OpenAiClient, TokenUsage,
};
pub use memory::{ChatMemoryStore, InMemoryChatMemoryStore, MessageWindowChatMemory};
pub use rag::{Content, DefaultRetrievalAugmentor, Query, RetrievalAugmentor};
pub use service::{AiService, AiServiceBuilder, ChatResult, StreamingHandler};

/// Default cache directory name
pub const CACHE_DIR_NAME: &str = "ragrail";

/// Default config directory name
pub const CONFIG_DIR_NAME: &str = "ragrail";
