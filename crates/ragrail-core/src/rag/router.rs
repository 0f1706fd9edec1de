//! Query routers: pick the retrievers that apply to a query

use super::{ContentRetriever, Query};
use crate::error::{RagRailError, Result};
use crate::llm::{ChatMessage, LLMClient};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

lazy_static! {
    static ref OPTION_NUMBER: Regex = Regex::new(r"\d+").unwrap();
}

/// Selects the content retrievers for a query
#[async_trait]
pub trait QueryRouter: Send + Sync {
    async fn route(&self, query: &Query) -> Result<Vec<Arc<dyn ContentRetriever>>>;
}

/// Routes every query to all retrievers
pub struct DefaultQueryRouter {
    retrievers: Vec<Arc<dyn ContentRetriever>>,
}

impl DefaultQueryRouter {
    pub fn new(retrievers: Vec<Arc<dyn ContentRetriever>>) -> Self {
        Self { retrievers }
    }
}

#[async_trait]
impl QueryRouter for DefaultQueryRouter {
    async fn route(&self, _query: &Query) -> Result<Vec<Arc<dyn ContentRetriever>>> {
        Ok(self.retrievers.clone())
    }
}

/// What the language-model router does when it cannot pick a retriever
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackStrategy {
    /// Retrieve nothing
    #[default]
    DoNotRoute,
    /// Use every retriever
    RouteToAll,
    /// Return an error
    Fail,
}

/// Lets a chat model choose retrievers from their descriptions
pub struct LanguageModelQueryRouter {
    client: Arc<dyn LLMClient>,
    options: Vec<(Arc<dyn ContentRetriever>, String)>,
    fallback: FallbackStrategy,
}

impl LanguageModelQueryRouter {
    /// `options` pairs each retriever with a description of what it holds
    pub fn new(
        client: Arc<dyn LLMClient>,
        options: Vec<(Arc<dyn ContentRetriever>, String)>,
    ) -> Self {
        Self {
            client,
            options,
            fallback: FallbackStrategy::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackStrategy) -> Self {
        self.fallback = fallback;
        self
    }

    fn build_prompt(&self, query: &Query) -> String {
        let options: Vec<String> = self
            .options
            .iter()
            .enumerate()
            .map(|(i, (_, description))| format!("{}: {}", i + 1, description))
            .collect();

        format!(
            r#"Based on the user query, determine the most suitable data source(s)
to retrieve relevant information from the following options:
{}
It is very important that your answer consists of either a single number
or multiple numbers separated by commas and nothing else!
User query: {}"#,
            options.join("\n"),
            query.text
        )
    }

    fn parse_choice(&self, reply: &str) -> Option<Vec<Arc<dyn ContentRetriever>>> {
        let mut chosen: Vec<usize> = Vec::new();
        for m in OPTION_NUMBER.find_iter(reply) {
            let n: usize = m.as_str().parse().ok()?;
            if n == 0 || n > self.options.len() {
                return None;
            }
            if !chosen.contains(&n) {
                chosen.push(n);
            }
        }
        if chosen.is_empty() {
            return None;
        }
        Some(
            chosen
                .into_iter()
                .map(|n| self.options[n - 1].0.clone())
                .collect(),
        )
    }

    fn fall_back(&self, query: &Query, reason: String) -> Result<Vec<Arc<dyn ContentRetriever>>> {
        tracing::warn!(
            "Query router could not route '{}' ({}), fallback {:?}",
            query.text,
            reason,
            self.fallback
        );
        match self.fallback {
            FallbackStrategy::DoNotRoute => Ok(Vec::new()),
            FallbackStrategy::RouteToAll => {
                Ok(self.options.iter().map(|(r, _)| r.clone()).collect())
            }
            FallbackStrategy::Fail => Err(RagRailError::Retrieval(format!(
                "failed to route query '{}': {}",
                query.text, reason
            ))),
        }
    }
}

#[async_trait]
impl QueryRouter for LanguageModelQueryRouter {
    async fn route(&self, query: &Query) -> Result<Vec<Arc<dyn ContentRetriever>>> {
        let prompt = self.build_prompt(query);
        let reply = match self.client.chat_text(vec![ChatMessage::user(prompt)]).await {
            Ok(reply) => reply,
            Err(e) => return self.fall_back(query, e.to_string()),
        };

        match self.parse_choice(&reply) {
            Some(retrievers) => {
                tracing::debug!(
                    "Routed '{}' to {:?}",
                    query.text,
                    retrievers.iter().map(|r| r.name()).collect::<Vec<_>>()
                );
                Ok(retrievers)
            }
            None => self.fall_back(query, format!("unusable answer '{}'", reply.trim())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatResponse;
    use crate::rag::{retriever_fn, Content};

    struct Reply(std::result::Result<&'static str, &'static str>);

    #[async_trait]
    impl LLMClient for Reply {
        async fn chat(&self, _messages: Vec<ChatMessage>) -> Result<ChatResponse> {
            match self.0 {
                Ok(text) => Ok(ChatResponse::from_text("router", text)),
                Err(e) => Err(RagRailError::Llm(e.to_string())),
            }
        }

        fn model_name(&self) -> &str {
            "router"
        }
    }

    fn options() -> Vec<(Arc<dyn ContentRetriever>, String)> {
        let docs: Arc<dyn ContentRetriever> =
            Arc::new(retriever_fn("docs", |_q: &Query| vec![Content::new("doc")]));
        let web: Arc<dyn ContentRetriever> =
            Arc::new(retriever_fn("web", |_q: &Query| vec![Content::new("web")]));
        vec![
            (docs, "Terms and conditions".to_string()),
            (web, "The project website".to_string()),
        ]
    }

    fn names(retrievers: &[Arc<dyn ContentRetriever>]) -> Vec<String> {
        retrievers.iter().map(|r| r.name().to_string()).collect()
    }

    #[tokio::test]
    async fn test_routes_to_chosen_options() {
        let router = LanguageModelQueryRouter::new(Arc::new(Reply(Ok("2, 1"))), options());
        let routed = router.route(&Query::new("q")).await.unwrap();
        assert_eq!(names(&routed), vec!["web", "docs"]);
    }

    #[tokio::test]
    async fn test_out_of_range_uses_fallback() {
        let router = LanguageModelQueryRouter::new(Arc::new(Reply(Ok("7"))), options())
            .with_fallback(FallbackStrategy::RouteToAll);
        let routed = router.route(&Query::new("q")).await.unwrap();
        assert_eq!(names(&routed), vec!["docs", "web"]);
    }

    #[tokio::test]
    async fn test_model_error_with_do_not_route() {
        let router = LanguageModelQueryRouter::new(Arc::new(Reply(Err("down"))), options());
        assert!(router.route(&Query::new("q")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_strategy_errors() {
        let router = LanguageModelQueryRouter::new(Arc::new(Reply(Ok("none of them"))), options())
            .with_fallback(FallbackStrategy::Fail);
        assert!(matches!(
            router.route(&Query::new("q")).await,
            Err(RagRailError::Retrieval(_))
        ));
    }
}
