//! HTTP client for OpenAI-compatible LLM services (OpenAI, vLLM, Ollama, etc.)

use super::cache::{embedding_cache_key, EmbeddingCache};
use super::{ChatMessage, ChatResponse, LLMClient, TokenUsage};
use crate::config::LLMServiceConfig;
use crate::error::{RagRailError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// API metrics for monitoring
#[derive(Debug, Default)]
pub struct APIMetrics {
    pub total_requests: AtomicU64,
    pub total_errors: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub total_latency_ms: AtomicU64,
}

/// Snapshot of API metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub avg_latency_ms: f64,
}

/// OpenAI-compatible client
pub struct OpenAiClient {
    http_client: reqwest::Client,
    config: LLMServiceConfig,
    embedding_dimensions: usize,
    cache: Arc<EmbeddingCache>,
    metrics: Arc<APIMetrics>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct WireChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct WireStreamChunk {
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
}

#[derive(Deserialize)]
struct WireStreamChoice {
    #[serde(default)]
    delta: WireDelta,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    /// Create new client from configuration
    pub fn new(config: LLMServiceConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(RagRailError::Http)?;

        // Unknown until the first embedding comes back
        let embedding_dimensions = config.embedding_dimensions.unwrap_or(384);

        Ok(Self {
            http_client,
            config,
            embedding_dimensions,
            cache: Arc::new(EmbeddingCache::new()),
            metrics: Arc::new(APIMetrics::default()),
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(LLMServiceConfig::default())
    }

    pub fn config(&self) -> &LLMServiceConfig {
        &self.config
    }

    /// Get current API metrics
    pub fn metrics(&self) -> MetricsSnapshot {
        let total = self.metrics.total_requests.load(Ordering::Relaxed);
        let hits = self.metrics.cache_hits.load(Ordering::Relaxed);
        let misses = self.metrics.cache_misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        MetricsSnapshot {
            total_requests: total,
            total_errors: self.metrics.total_errors.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64 * 100.0
            } else {
                0.0
            },
            avg_latency_ms: if total > 0 {
                self.metrics.total_latency_ms.load(Ordering::Relaxed) as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.http_client.post(url);
        match self.config.api_key {
            Some(ref api_key) => req.header("Authorization", format!("Bearer {}", api_key)),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
        let response = req.send().await.map_err(|e| {
            self.metrics.total_errors.fetch_add(1, Ordering::Relaxed);
            RagRailError::Http(e)
        })?;

        if !response.status().is_success() {
            self.metrics.total_errors.fetch_add(1, Ordering::Relaxed);
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let err = parse_provider_error(status, &body);
            tracing::warn!("LLM service returned HTTP {}: {}", status, err);
            return Err(err);
        }

        Ok(response)
    }

    fn record_latency(&self, start: Instant) {
        let elapsed = start.elapsed().as_millis() as u64;
        self.metrics
            .total_latency_ms
            .fetch_add(elapsed, Ordering::Relaxed);
    }

    fn chat_request<'a>(&'a self, messages: &'a [ChatMessage], stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream,
        }
    }
}

#[async_trait]
impl LLMClient for OpenAiClient {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<ChatResponse> {
        let start = Instant::now();
        let url = format!("{}/v1/chat/completions", self.config.url);
        let request = self.chat_request(&messages, false);

        let response = self.send(self.post(&url).json(&request)).await?;
        let wire: WireChatResponse = response.json().await.map_err(|e| {
            self.metrics.total_errors.fetch_add(1, Ordering::Relaxed);
            RagRailError::Http(e)
        })?;
        self.record_latency(start);

        let choice = wire.choices.into_iter().next().ok_or_else(|| {
            self.metrics.total_errors.fetch_add(1, Ordering::Relaxed);
            RagRailError::Llm("No response from LLM".to_string())
        })?;

        let token_usage = wire
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens));

        tracing::debug!(
            "Chat completion from {} in {} ms ({:?})",
            self.config.model,
            start.elapsed().as_millis(),
            token_usage
        );

        Ok(ChatResponse {
            message: choice.message,
            token_usage,
            model: wire.model.unwrap_or_else(|| self.config.model.clone()),
            finish_reason: choice.finish_reason,
        })
    }

    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let url = format!("{}/v1/chat/completions", self.config.url);
        let request = self.chat_request(&messages, true);
        let response = self.send(self.post(&url).json(&request)).await?;

        let mut parser = SseParser::default();
        let deltas = response
            .bytes_stream()
            .map(move |chunk| -> Vec<Result<String>> {
                match chunk {
                    Ok(bytes) => parser
                        .push(&bytes)
                        .into_iter()
                        .filter_map(|data| parse_stream_delta(&data).transpose())
                        .collect(),
                    Err(e) => vec![Err(RagRailError::Http(e))],
                }
            })
            .flat_map(stream::iter);

        Ok(deltas.boxed())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let model = &self.config.embedding_model;

        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut uncached_texts = Vec::new();
        let mut uncached_indices = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            if let Some(cached) = self.cache.get(&embedding_cache_key(model, text)) {
                self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
                results.push(Some(cached));
                continue;
            }
            self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);
            results.push(None);
            uncached_texts.push(text.clone());
            uncached_indices.push(i);
        }

        if !uncached_texts.is_empty() {
            tracing::debug!(
                "Embedding batch: {} cached, {} to fetch",
                texts.len() - uncached_texts.len(),
                uncached_texts.len()
            );

            #[derive(Serialize)]
            struct EmbedRequest<'a> {
                model: &'a str,
                input: &'a [String],
            }

            #[derive(Deserialize)]
            struct EmbedResponse {
                data: Vec<EmbedData>,
            }

            #[derive(Deserialize)]
            struct EmbedData {
                embedding: Vec<f32>,
            }

            let url = format!("{}/v1/embeddings", self.config.embeddings_url());
            let request = EmbedRequest {
                model,
                input: &uncached_texts,
            };
            let response = self.send(self.post(&url).json(&request)).await?;
            let embed_response: EmbedResponse = response.json().await.map_err(|e| {
                self.metrics.total_errors.fetch_add(1, Ordering::Relaxed);
                RagRailError::Http(e)
            })?;

            if embed_response.data.len() != uncached_texts.len() {
                return Err(RagRailError::Llm(format!(
                    "Embedding service returned {} vectors for {} inputs",
                    embed_response.data.len(),
                    uncached_texts.len()
                )));
            }

            for (i, data) in embed_response.data.into_iter().enumerate() {
                self.cache
                    .put(embedding_cache_key(model, &uncached_texts[i]), data.embedding.clone());
                results[uncached_indices[i]] = Some(data.embedding);
            }
            self.record_latency(start);
        }

        results
            .into_iter()
            .map(|r| r.ok_or_else(|| RagRailError::Llm("Missing embedding".to_string())))
            .collect()
    }

    fn embedding_dimensions(&self) -> usize {
        self.embedding_dimensions
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Map an error body like `{"error": {"message", "type", "code"}}` to a provider error
pub fn parse_provider_error(status: u16, body: &str) -> RagRailError {
    #[derive(Deserialize)]
    struct Envelope {
        error: ErrorBody,
    }

    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        code: Option<serde_json::Value>,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) => RagRailError::Provider {
            status,
            message: envelope.error.message,
            kind: envelope.error.kind,
            code: envelope.error.code.and_then(|c| match c {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s),
                other => Some(other.to_string()),
            }),
        },
        Err(_) => RagRailError::Provider {
            status,
            message: if body.trim().is_empty() {
                "empty response body".to_string()
            } else {
                body.trim().to_string()
            },
            kind: None,
            code: None,
        },
    }
}

/// Splits a server-sent-events byte stream into `data:` payloads
#[derive(Default)]
struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

fn parse_stream_delta(data: &str) -> Result<Option<String>> {
    if data == "[DONE]" || data.is_empty() {
        return Ok(None);
    }
    let chunk: WireStreamChunk = serde_json::from_str(data)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty()))
}
