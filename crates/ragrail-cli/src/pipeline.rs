//! Assembles the AI service from configuration

use crate::guardrails::{NonEmptyAnswer, RedactSecrets};
use anyhow::Result;
use ragrail_core::guardrail::{GuardrailChain, GuardrailMetrics, TracingEventSink};
use ragrail_core::llm::LlmScoringModel;
use ragrail_core::memory::store_from_config;
use ragrail_core::rag::{
    ingest_with_reuse, CompressingQueryTransformer, DefaultRetrievalAugmentor,
    EmbeddingStoreContentRetriever, ReRankingContentAggregator,
};
use ragrail_core::{
    AiService, Config, CostEstimatorService, Embedder, LLMClient, LlmEmbedder, OpenAiClient,
};
use std::sync::Arc;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer from the provided information when it is relevant.";

pub struct PipelineOptions {
    pub model: Option<String>,
    pub use_rag: bool,
    pub system_prompt: Option<String>,
}

pub struct Pipeline {
    pub service: AiService,
    pub metrics: Arc<GuardrailMetrics>,
}

pub async fn build(config: &Config, options: &PipelineOptions) -> Result<Pipeline> {
    config.validate()?;

    let llm = config.llm_for(options.model.as_deref())?;
    let client: Arc<dyn LLMClient> = Arc::new(OpenAiClient::new(llm.clone())?);

    let mut builder = AiService::builder(client.clone())
        .name("ragrail")
        .system_prompt(
            options
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        )
        .chat_memory(
            store_from_config(&config.memory, Some(client.clone()))?,
            config.memory.max_messages,
        )
        .cost_estimator(CostEstimatorService::from_config(&config.pricing));

    if options.use_rag {
        match augmentor(config, client.clone(), llm).await? {
            Some(augmentor) => builder = builder.retrieval_augmentor(Arc::new(augmentor)),
            None => tracing::info!("Retrieval disabled: rag.path is not set"),
        }
    }

    let metrics = Arc::new(GuardrailMetrics::new());
    let guardrails = GuardrailChain::new()
        .input(Arc::new(RedactSecrets))
        .output(Arc::new(NonEmptyAnswer))
        .sink(Arc::new(TracingEventSink))
        .sink(metrics.clone())
        .with_max_retries(config.guardrails.max_retries);

    Ok(Pipeline {
        service: builder.guardrails(guardrails).build(),
        metrics,
    })
}

async fn augmentor(
    config: &Config,
    client: Arc<dyn LLMClient>,
    llm: ragrail_core::LLMServiceConfig,
) -> Result<Option<DefaultRetrievalAugmentor>> {
    let rag = &config.rag;
    let reusable = rag.reuse_embeddings.enabled && rag.reuse_embeddings.file.exists();
    if rag.path.is_none() && !reusable {
        return Ok(None);
    }

    let embedder: Arc<dyn Embedder> = Arc::new(LlmEmbedder::from_config(llm)?);
    let store = ingest_with_reuse(rag, embedder.clone()).await?;
    tracing::debug!("Embedding store holds {} segments", store.len());

    let retriever = EmbeddingStoreContentRetriever::new(embedder, store)
        .with_max_results(rag.max_results)
        .with_min_score(rag.min_score);

    let mut builder = DefaultRetrievalAugmentor::builder()
        .query_transformer(Arc::new(CompressingQueryTransformer::new(client.clone())))
        .content_retriever(Arc::new(retriever));

    if rag.rerank {
        let aggregator = ReRankingContentAggregator::new(Arc::new(LlmScoringModel::new(client)))
            .with_min_score(rag.min_score)
            .with_max_results(rag.max_results);
        builder = builder.content_aggregator(Arc::new(aggregator));
    }

    Ok(Some(builder.build()?))
}
