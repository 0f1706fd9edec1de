//! Relevance scoring with a chat model

use super::{ChatMessage, LLMClient, ScoringModel};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Score used when the model reply cannot be read
const FALLBACK_SCORE: f64 = 0.5;

/// Segments are truncated to this many characters in the prompt
const MAX_SEGMENT_CHARS: usize = 400;

/// Scoring model that asks a chat model for relevance scores
pub struct LlmScoringModel {
    client: Arc<dyn LLMClient>,
    batch_size: usize,
}

impl LlmScoringModel {
    /// Create from LLM client
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            batch_size: 10,
        }
    }

    /// Maximum segments scored per chat request
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

#[async_trait]
impl ScoringModel for LlmScoringModel {
    async fn score_all(&self, query: &str, segments: &[String]) -> Result<Vec<f64>> {
        let mut scores = Vec::with_capacity(segments.len());

        for batch in segments.chunks(self.batch_size) {
            let messages = vec![
                ChatMessage::system(
                    "Score document relevance to the query. Output ONLY JSON: {\"scores\": [0.0-1.0, ...]} \
                     with one score per document, in order.",
                ),
                ChatMessage::user(build_scoring_prompt(query, batch)),
            ];

            let response = self.client.chat_text(messages).await?;
            scores.extend(parse_scoring_response(&response, batch.len()));
        }

        Ok(scores)
    }

    fn model_name(&self) -> &str {
        self.client.model_name()
    }
}

fn build_scoring_prompt(query: &str, segments: &[String]) -> String {
    let mut prompt = format!("Q: \"{}\"\nDocs:\n", query);

    for (idx, segment) in segments.iter().enumerate() {
        let text: String = segment.chars().take(MAX_SEGMENT_CHARS).collect();
        prompt.push_str(&format!("[{}] {}\n", idx, text));
    }

    prompt.push_str("\nScore 0-1 JSON:\n{\"scores\":[0.0,...]}\n");
    prompt
}

fn parse_scoring_response(response: &str, expected: usize) -> Vec<f64> {
    let fallback = || vec![FALLBACK_SCORE; expected];

    let json_str = match (response.find('{'), response.rfind('}')) {
        (Some(start), Some(end)) if start < end => &response[start..=end],
        _ => return fallback(),
    };

    let parsed: serde_json::Value = match serde_json::from_str(json_str) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("Failed to parse scoring JSON: {}, using fallback scores", e);
            tracing::debug!("Raw LLM response: {}", response);
            return fallback();
        }
    };

    match parsed["scores"].as_array() {
        Some(arr) => (0..expected)
            .map(|idx| {
                arr.get(idx)
                    .and_then(|v| v.as_f64())
                    .map(|s| s.clamp(0.0, 1.0))
                    .unwrap_or(FALLBACK_SCORE)
            })
            .collect(),
        None => fallback(),
    }
}
