//! Retrieval augmentation pipeline

use super::{
    Content, ContentAggregator, ContentInjector, ContentRetriever, DefaultContentAggregator,
    DefaultContentInjector, DefaultQueryRouter, DefaultQueryTransformer, Query, QueryContents,
    QueryMetadata, QueryRouter, QueryTransformer,
};
use crate::error::{RagRailError, Result};
use crate::llm::ChatMessage;
use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;

/// Input to an augmentation run
#[derive(Debug, Clone)]
pub struct AugmentationRequest {
    pub user_message: ChatMessage,
    pub metadata: QueryMetadata,
}

impl AugmentationRequest {
    pub fn new(user_message: ChatMessage) -> Self {
        Self {
            metadata: QueryMetadata::new(user_message.clone()),
            user_message,
        }
    }

    pub fn with_metadata(user_message: ChatMessage, metadata: QueryMetadata) -> Self {
        Self {
            user_message,
            metadata,
        }
    }
}

/// Augmented message plus the contents injected into it
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentationResult {
    pub chat_message: ChatMessage,
    pub contents: Vec<Content>,
}

/// Enriches a user message with retrieved content
#[async_trait]
pub trait RetrievalAugmentor: Send + Sync {
    async fn augment(&self, request: AugmentationRequest) -> Result<AugmentationResult>;
}

/// Transform, route, retrieve, aggregate and inject
pub struct DefaultRetrievalAugmentor {
    transformer: Arc<dyn QueryTransformer>,
    router: Arc<dyn QueryRouter>,
    aggregator: Arc<dyn ContentAggregator>,
    injector: Arc<dyn ContentInjector>,
}

impl DefaultRetrievalAugmentor {
    pub fn builder() -> DefaultRetrievalAugmentorBuilder {
        DefaultRetrievalAugmentorBuilder::default()
    }

    async fn retrieve_all(&self, queries: Vec<Query>) -> Result<QueryContents> {
        let mut routed = Vec::with_capacity(queries.len());
        for query in queries {
            let retrievers = self.router.route(&query).await?;
            tracing::debug!(
                "Query '{}' routed to {} retriever(s)",
                query.text,
                retrievers.len()
            );
            routed.push((query, retrievers));
        }

        let tasks = routed.iter().flat_map(|(query, retrievers)| {
            retrievers.iter().map(move |retriever| retrieve_one(retriever, query))
        });
        let mut lists = try_join_all(tasks).await?.into_iter();

        Ok(routed
            .into_iter()
            .map(|(query, retrievers)| {
                let per_query: Vec<Vec<Content>> =
                    lists.by_ref().take(retrievers.len()).collect();
                (query, per_query)
            })
            .collect())
    }
}

async fn retrieve_one(retriever: &Arc<dyn ContentRetriever>, query: &Query) -> Result<Vec<Content>> {
    let contents = retriever.retrieve(query).await?;
    tracing::debug!(
        "Retriever {} returned {} contents for '{}'",
        retriever.name(),
        contents.len(),
        query.text
    );
    Ok(contents)
}

#[async_trait]
impl RetrievalAugmentor for DefaultRetrievalAugmentor {
    async fn augment(&self, request: AugmentationRequest) -> Result<AugmentationResult> {
        let original = Query::with_metadata(
            request.user_message.content.clone(),
            request.metadata.clone(),
        );

        let queries = self.transformer.transform(&original).await?;
        tracing::debug!("Transformed query into {} queries", queries.len());

        let retrieved = self.retrieve_all(queries).await?;
        let contents = self.aggregator.aggregate(retrieved).await?;
        tracing::debug!("Aggregated {} contents", contents.len());

        let chat_message = self.injector.inject(&contents, &request.user_message);
        Ok(AugmentationResult {
            chat_message,
            contents,
        })
    }
}

#[derive(Default)]
pub struct DefaultRetrievalAugmentorBuilder {
    transformer: Option<Arc<dyn QueryTransformer>>,
    router: Option<Arc<dyn QueryRouter>>,
    retrievers: Vec<Arc<dyn ContentRetriever>>,
    aggregator: Option<Arc<dyn ContentAggregator>>,
    injector: Option<Arc<dyn ContentInjector>>,
}

impl DefaultRetrievalAugmentorBuilder {
    pub fn query_transformer(mut self, transformer: Arc<dyn QueryTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn query_router(mut self, router: Arc<dyn QueryRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Retriever used by the default router; ignored when a router is set
    pub fn content_retriever(mut self, retriever: Arc<dyn ContentRetriever>) -> Self {
        self.retrievers.push(retriever);
        self
    }

    pub fn content_aggregator(mut self, aggregator: Arc<dyn ContentAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn content_injector(mut self, injector: Arc<dyn ContentInjector>) -> Self {
        self.injector = Some(injector);
        self
    }

    pub fn build(self) -> Result<DefaultRetrievalAugmentor> {
        let router = match (self.router, self.retrievers.is_empty()) {
            (Some(router), _) => router,
            (None, false) => Arc::new(DefaultQueryRouter::new(self.retrievers)),
            (None, true) => {
                return Err(RagRailError::Config(
                    "retrieval augmentor needs a query router or at least one content retriever"
                        .to_string(),
                ))
            }
        };

        Ok(DefaultRetrievalAugmentor {
            transformer: self
                .transformer
                .unwrap_or_else(|| Arc::new(DefaultQueryTransformer)),
            router,
            aggregator: self
                .aggregator
                .unwrap_or_else(|| Arc::new(DefaultContentAggregator)),
            injector: self
                .injector
                .unwrap_or_else(|| Arc::new(DefaultContentInjector::new())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::{retriever_fn, transformer_fn};

    fn lowercase_retriever() -> Arc<dyn ContentRetriever> {
        Arc::new(retriever_fn("lower", |q: &Query| {
            if q.text == "what is rust?" {
                vec![Content::new("Rust is a systems language.")]
            } else {
                Vec::new()
            }
        }))
    }

    #[tokio::test]
    async fn test_lowercasing_transformer_reaches_retriever() {
        let augmentor = DefaultRetrievalAugmentor::builder()
            .query_transformer(Arc::new(transformer_fn(|q: &Query| {
                vec![q.derive(q.text.to_lowercase())]
            })))
            .content_retriever(lowercase_retriever())
            .build()
            .unwrap();

        let result = augmentor
            .augment(AugmentationRequest::new(ChatMessage::user("What is RUST?")))
            .await
            .unwrap();

        assert_eq!(result.contents.len(), 1);
        assert_eq!(result.contents[0].text(), "Rust is a systems language.");
        assert!(result.chat_message.content.starts_with("What is RUST?"));
        assert!(result.chat_message.content.contains("Rust is a systems language."));
    }

    #[tokio::test]
    async fn test_without_transformer_nothing_is_found() {
        let augmentor = DefaultRetrievalAugmentor::builder()
            .content_retriever(lowercase_retriever())
            .build()
            .unwrap();

        let msg = ChatMessage::user("What is RUST?");
        let result = augmentor
            .augment(AugmentationRequest::new(msg.clone()))
            .await
            .unwrap();
        assert!(result.contents.is_empty());
        assert_eq!(result.chat_message, msg);
    }

    struct Broken;

    #[async_trait]
    impl ContentRetriever for Broken {
        async fn retrieve(&self, _query: &Query) -> Result<Vec<Content>> {
            Err(RagRailError::Retrieval("index offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_retriever_error_propagates() {
        let augmentor = DefaultRetrievalAugmentor::builder()
            .content_retriever(lowercase_retriever())
            .content_retriever(Arc::new(Broken))
            .build()
            .unwrap();

        let err = augmentor
            .augment(AugmentationRequest::new(ChatMessage::user("q")))
            .await;
        assert!(matches!(err, Err(RagRailError::Retrieval(_))));
    }

    #[tokio::test]
    async fn test_contents_grouped_per_query() {
        let augmentor = DefaultRetrievalAugmentor::builder()
            .query_transformer(Arc::new(transformer_fn(|q: &Query| {
                vec![q.derive("a"), q.derive("b")]
            })))
            .content_retriever(Arc::new(retriever_fn("echo", |q: &Query| {
                vec![Content::new(format!("about {}", q.text))]
            })))
            .build()
            .unwrap();

        let result = augmentor
            .augment(AugmentationRequest::new(ChatMessage::user("q")))
            .await
            .unwrap();
        let texts: Vec<&str> = result.contents.iter().map(|c| c.text()).collect();
        assert_eq!(texts, vec!["about a", "about b"]);
    }

    #[test]
    fn test_builder_requires_retriever() {
        assert!(matches!(
            DefaultRetrievalAugmentor::builder().build(),
            Err(RagRailError::Config(_))
        ));
    }
}
