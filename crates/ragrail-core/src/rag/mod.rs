//! Retrieval-augmented generation
//!
//! A request flows through a query transformer, a query router, one or more
//! content retrievers (run concurrently), a content aggregator and finally a
//! content injector that builds the augmented user message.

mod aggregator;
mod augmentor;
mod ingest;
mod injector;
mod query;
mod retriever;
mod router;
mod splitter;
mod store;
mod transformer;

pub use aggregator::{
    rank_by_score, reciprocal_rank_fuse, single_query_selector, user_message_selector,
    ContentAggregator, DefaultContentAggregator, QueryContents, QuerySelector,
    ReRankingContentAggregator, RRF_K,
};
pub use augmentor::{
    AugmentationRequest, AugmentationResult, DefaultRetrievalAugmentor,
    DefaultRetrievalAugmentorBuilder, RetrievalAugmentor,
};
pub use ingest::{ingest_with_reuse, IngestOptions, IngestReport, Ingestor};
pub use injector::{ContentInjector, DefaultContentInjector, DEFAULT_PROMPT_TEMPLATE};
pub use query::{Content, Query, QueryMetadata, TextSegment};
pub use retriever::{retriever_fn, ContentRetriever, EmbeddingStoreContentRetriever, FnContentRetriever};
pub use router::{DefaultQueryRouter, FallbackStrategy, LanguageModelQueryRouter, QueryRouter};
pub use splitter::DocumentSplitter;
pub use store::{
    cosine_similarity, relevance_score, segment_id, EmbeddingMatch, EmbeddingSearchRequest,
    EmbeddingStore, InMemoryEmbeddingStore,
};
pub use transformer::{
    transformer_fn, CompressingQueryTransformer, DefaultQueryTransformer,
    ExpandingQueryTransformer, FnQueryTransformer, QueryTransformer,
};
