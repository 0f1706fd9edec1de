//! Content retrievers

use super::{Content, EmbeddingSearchRequest, EmbeddingStore, Query};
use crate::error::Result;
use crate::llm::Embedder;
use async_trait::async_trait;
use std::sync::Arc;

/// Fetches candidate content for a query
#[async_trait]
pub trait ContentRetriever: Send + Sync {
    async fn retrieve(&self, query: &Query) -> Result<Vec<Content>>;

    /// Short name used in logs and routing prompts
    fn name(&self) -> &str {
        "retriever"
    }
}

/// Embeds the query and searches an embedding store
pub struct EmbeddingStoreContentRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn EmbeddingStore>,
    max_results: usize,
    min_score: f64,
}

impl EmbeddingStoreContentRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn EmbeddingStore>) -> Self {
        Self {
            embedder,
            store,
            max_results: 3,
            min_score: 0.0,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }
}

#[async_trait]
impl ContentRetriever for EmbeddingStoreContentRetriever {
    async fn retrieve(&self, query: &Query) -> Result<Vec<Content>> {
        let query_embedding = self.embedder.embed(&query.text).await?;
        let request = EmbeddingSearchRequest {
            query_embedding,
            max_results: self.max_results,
            min_score: self.min_score,
        };

        let matches = self.store.search(&request).await?;
        tracing::debug!(
            "Embedding store returned {} matches for '{}'",
            matches.len(),
            query.text
        );

        Ok(matches
            .into_iter()
            .map(|m| Content {
                segment: m.segment,
                score: Some(m.score),
                embedding_id: Some(m.embedding_id),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "embedding-store"
    }
}

/// Retriever backed by a plain function
pub struct FnContentRetriever<F> {
    name: String,
    f: F,
}

/// Wrap a function as a named content retriever
pub fn retriever_fn<F>(name: impl Into<String>, f: F) -> FnContentRetriever<F>
where
    F: Fn(&Query) -> Vec<Content> + Send + Sync,
{
    FnContentRetriever {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F> ContentRetriever for FnContentRetriever<F>
where
    F: Fn(&Query) -> Vec<Content> + Send + Sync,
{
    async fn retrieve(&self, query: &Query) -> Result<Vec<Content>> {
        Ok((self.f)(query))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::{InMemoryEmbeddingStore, TextSegment};

    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(if text.contains("cat") {
                vec![1.0, 0.0]
            } else {
                vec![0.0, 1.0]
            })
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "axis"
        }
    }

    #[tokio::test]
    async fn test_embedding_store_retriever() {
        let store = Arc::new(InMemoryEmbeddingStore::new());
        store
            .add(vec![1.0, 0.0], TextSegment::new("cats purr"))
            .await
            .unwrap();
        store
            .add(vec![0.0, 1.0], TextSegment::new("dogs bark"))
            .await
            .unwrap();

        let retriever = EmbeddingStoreContentRetriever::new(Arc::new(AxisEmbedder), store)
            .with_max_results(1)
            .with_min_score(0.6);

        let contents = retriever.retrieve(&Query::new("tell me about cats")).await.unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].text(), "cats purr");
        assert_eq!(contents[0].score, Some(1.0));
        assert!(contents[0].embedding_id.is_some());
    }
}
