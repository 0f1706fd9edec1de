//! Query transformers: rewrite or expand a query before retrieval

use super::Query;
use crate::error::Result;
use crate::llm::{ChatMessage, LLMClient, Role};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

lazy_static! {
    /// Leading "1.", "2)", "-", "*" that models add despite instructions
    static ref LIST_MARKER: Regex = Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s*").unwrap();
}

/// Turns one query into one or more queries
#[async_trait]
pub trait QueryTransformer: Send + Sync {
    async fn transform(&self, query: &Query) -> Result<Vec<Query>>;
}

/// Passes the query through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultQueryTransformer;

#[async_trait]
impl QueryTransformer for DefaultQueryTransformer {
    async fn transform(&self, query: &Query) -> Result<Vec<Query>> {
        Ok(vec![query.clone()])
    }
}

/// Transformer backed by a plain function
pub struct FnQueryTransformer<F>(F);

/// Wrap a function as a query transformer
pub fn transformer_fn<F>(f: F) -> FnQueryTransformer<F>
where
    F: Fn(&Query) -> Vec<Query> + Send + Sync,
{
    FnQueryTransformer(f)
}

#[async_trait]
impl<F> QueryTransformer for FnQueryTransformer<F>
where
    F: Fn(&Query) -> Vec<Query> + Send + Sync,
{
    async fn transform(&self, query: &Query) -> Result<Vec<Query>> {
        Ok((self.0)(query))
    }
}

/// Rewrites a follow-up query into a standalone one using the chat history
pub struct CompressingQueryTransformer {
    client: Arc<dyn LLMClient>,
}

impl CompressingQueryTransformer {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QueryTransformer for CompressingQueryTransformer {
    async fn transform(&self, query: &Query) -> Result<Vec<Query>> {
        let history = query.chat_history();
        if history.is_empty() {
            return Ok(vec![query.clone()]);
        }

        let prompt = build_compression_prompt(&query.text, history);
        let reply = self.client.chat_text(vec![ChatMessage::user(prompt)]).await?;
        let compressed = reply.trim();

        if compressed.is_empty() {
            tracing::debug!("Query compression returned nothing, keeping original query");
            return Ok(vec![query.clone()]);
        }

        tracing::debug!("Compressed query '{}' into '{}'", query.text, compressed);
        Ok(vec![query.derive(compressed)])
    }
}

fn build_compression_prompt(query: &str, history: &[ChatMessage]) -> String {
    let conversation: Vec<String> = history
        .iter()
        .filter_map(|m| match m.role {
            Role::User => Some(format!("User: {}", m.content)),
            Role::Assistant if !m.content.is_empty() => Some(format!("AI: {}", m.content)),
            _ => None,
        })
        .collect();

    format!(
        r#"Read and understand the conversation between the User and the AI.
Then, analyze the new query from the User.
Identify all relevant details, terms, and context from both the conversation and the new query.
Reformulate this query into a clear, concise, and self-contained format suitable for information retrieval.

Conversation:
{}

User query: {}

It is very important that you provide only reformulated query and nothing else!
Do not prepend a query with anything!"#,
        conversation.join("\n"),
        query
    )
}

/// Asks the model for several rephrasings of the query
pub struct ExpandingQueryTransformer {
    client: Arc<dyn LLMClient>,
    n: usize,
}

impl ExpandingQueryTransformer {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self { client, n: 3 }
    }

    /// Number of variations requested
    pub fn with_variations(mut self, n: usize) -> Self {
        self.n = n.max(1);
        self
    }
}

#[async_trait]
impl QueryTransformer for ExpandingQueryTransformer {
    async fn transform(&self, query: &Query) -> Result<Vec<Query>> {
        let prompt = format!(
            r#"Generate {} different versions of a provided user query.
Each version should be worded differently, using synonyms or alternative sentence structures,
but they should all retain the original meaning.
These versions will be used to retrieve relevant documents.
It is very important to provide each query version on a separate line,
without enumerations, hyphens, or any additional formatting!
User query: {}"#,
            self.n, query.text
        );

        let reply = self.client.chat_text(vec![ChatMessage::user(prompt)]).await?;
        let variations = parse_variations(&reply, self.n);

        if variations.is_empty() {
            tracing::warn!("Query expansion produced no variations, using original query");
            return Ok(vec![query.clone()]);
        }

        Ok(variations.into_iter().map(|v| query.derive(v)).collect())
    }
}

fn parse_variations(reply: &str, max: usize) -> Vec<String> {
    let mut seen = Vec::new();
    for line in reply.lines() {
        let cleaned = LIST_MARKER.replace(line, "").trim().trim_matches('"').to_string();
        if !cleaned.is_empty() && !seen.contains(&cleaned) {
            seen.push(cleaned);
        }
        if seen.len() == max {
            break;
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatResponse;
    use crate::rag::QueryMetadata;

    struct CannedClient(&'static str);

    #[async_trait]
    impl LLMClient for CannedClient {
        async fn chat(&self, _messages: Vec<ChatMessage>) -> Result<ChatResponse> {
            Ok(ChatResponse::from_text("canned", self.0))
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    #[tokio::test]
    async fn test_fn_transformer_lowercases() {
        let t = transformer_fn(|q: &Query| vec![q.derive(q.text.to_lowercase())]);
        let out = t.transform(&Query::new("HeLLo")).await.unwrap();
        assert_eq!(out, vec![Query::new("hello")]);
    }

    #[tokio::test]
    async fn test_compressing_without_history_is_identity() {
        let t = CompressingQueryTransformer::new(Arc::new(CannedClient("should not be used")));
        let query = Query::new("what about the second one?");
        assert_eq!(t.transform(&query).await.unwrap(), vec![query]);
    }

    #[tokio::test]
    async fn test_compressing_uses_history() {
        let t = CompressingQueryTransformer::new(Arc::new(CannedClient(
            "  What is the refund policy for annual plans?  ",
        )));
        let metadata = QueryMetadata::new(ChatMessage::user("and for annual?")).with_memory(
            "m1",
            vec![
                ChatMessage::user("What is the refund policy?"),
                ChatMessage::assistant("Monthly plans are refundable for 14 days."),
            ],
        );
        let query = Query::with_metadata("and for annual?", metadata.clone());

        let out = t.transform(&query).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "What is the refund policy for annual plans?");
        assert_eq!(out[0].metadata, Some(metadata));
    }

    #[tokio::test]
    async fn test_expanding_strips_markers_and_dedupes() {
        let t = ExpandingQueryTransformer::new(Arc::new(CannedClient(
            "1. rust error handling\n- handling errors in rust\n\nrust error handling\n* Result type usage",
        )));
        let out = t.transform(&Query::new("errors in rust")).await.unwrap();
        let texts: Vec<&str> = out.iter().map(|q| q.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["rust error handling", "handling errors in rust", "Result type usage"]
        );
    }

    #[tokio::test]
    async fn test_expanding_falls_back_to_original() {
        let t = ExpandingQueryTransformer::new(Arc::new(CannedClient("   \n")));
        let out = t.transform(&Query::new("q")).await.unwrap();
        assert_eq!(out, vec![Query::new("q")]);
    }
}
