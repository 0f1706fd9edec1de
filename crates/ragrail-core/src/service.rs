//! AI service: retrieval, guardrails, memory and cost around one chat call

use crate::cost::{Cost, CostEstimatorService};
use crate::error::{RagRailError, Result};
use crate::guardrail::{
    GuardrailChain, GuardrailKind, InputGuardrailRequest, InvocationContext,
    OutputGuardrailRequest, OutputVerdict, Regenerate,
};
use crate::llm::{ChatMessage, ChatResponse, LLMClient, TokenUsage};
use crate::memory::{ChatMemoryStore, MessageWindowChatMemory};
use crate::rag::{AugmentationRequest, AugmentationResult, Content, QueryMetadata, RetrievalAugmentor};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;

/// Outcome of one service call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResult {
    pub text: String,
    /// Contents injected into the prompt
    #[serde(skip)]
    pub sources: Vec<Content>,
    pub token_usage: Option<TokenUsage>,
    pub cost: Option<Cost>,
}

/// Receives a streamed reply
pub trait StreamingHandler: Send {
    fn on_partial(&mut self, token: &str);

    fn on_complete(&mut self, _result: &ChatResult) {}
}

/// Everything computed before the model is called
struct Prepared {
    memory: Option<MessageWindowChatMemory>,
    system: Option<ChatMessage>,
    user_message: ChatMessage,
    request_messages: Vec<ChatMessage>,
    history: Vec<ChatMessage>,
    augmentation: Option<AugmentationResult>,
    context: InvocationContext,
}

pub struct AiService {
    name: String,
    client: Arc<dyn LLMClient>,
    memory_store: Option<Arc<dyn ChatMemoryStore>>,
    max_messages: usize,
    augmentor: Option<Arc<dyn RetrievalAugmentor>>,
    guardrails: GuardrailChain,
    cost: Option<CostEstimatorService>,
    system_prompt: Option<String>,
}

impl AiService {
    pub fn builder(client: Arc<dyn LLMClient>) -> AiServiceBuilder {
        AiServiceBuilder::new(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Window over the stored messages of `memory_id`, if memory is configured
    pub fn memory(&self, memory_id: &str) -> Option<MessageWindowChatMemory> {
        self.memory_store
            .as_ref()
            .map(|store| MessageWindowChatMemory::new(memory_id, self.max_messages, store.clone()))
    }

    async fn prepare(&self, memory_id: &str, user_text: &str, operation: &str) -> Result<Prepared> {
        let memory = self.memory(memory_id);
        let history = match &memory {
            Some(memory) => memory.messages().await?,
            None => Vec::new(),
        };
        let context = InvocationContext::new(self.name.clone(), operation).with_memory_id(memory_id);

        let mut user_message = ChatMessage::user(user_text);
        let augmentation = match &self.augmentor {
            Some(augmentor) => {
                let metadata = QueryMetadata::new(user_message.clone())
                    .with_memory(memory_id, history.clone());
                let result = augmentor
                    .augment(AugmentationRequest::with_metadata(user_message.clone(), metadata))
                    .await?;
                tracing::debug!("Augmented message with {} contents", result.contents.len());
                user_message = result.chat_message.clone();
                Some(result)
            }
            None => None,
        };

        if self.guardrails.has_input_guardrails() {
            user_message = self
                .guardrails
                .validate_input(InputGuardrailRequest {
                    user_message,
                    memory: history.clone(),
                    augmentation: augmentation.clone(),
                    context: context.clone(),
                })
                .await?;
        }

        // A compressed memory keeps the prompt at the start of its system message
        let system = self.system_prompt.as_ref().and_then(|prompt| {
            let present = history
                .iter()
                .any(|m| m.is_system() && m.content.starts_with(prompt.trim()));
            (!present).then(|| ChatMessage::system(prompt.clone()))
        });

        let mut request_messages = Vec::with_capacity(history.len() + 2);
        if let Some(system) = &system {
            request_messages.push(system.clone());
            request_messages.extend(history.iter().filter(|m| !m.is_system()).cloned());
        } else {
            request_messages.extend(history.iter().cloned());
        }
        request_messages.push(user_message.clone());

        Ok(Prepared {
            memory,
            system,
            user_message,
            request_messages,
            history,
            augmentation,
            context,
        })
    }

    async fn remember(&self, prepared: &Prepared, answer: &str) -> Result<()> {
        let Some(memory) = &prepared.memory else {
            return Ok(());
        };
        let mut turn = Vec::with_capacity(3);
        if let Some(system) = &prepared.system {
            turn.push(system.clone());
        }
        turn.push(prepared.user_message.clone());
        turn.push(ChatMessage::assistant(answer));
        memory.add_all(turn).await
    }

    fn estimate(&self, model: &str, usage: Option<TokenUsage>) -> Option<Cost> {
        let usage = usage?;
        self.cost.as_ref()?.estimate(model, &usage)
    }

    /// Answer `user_text` in the conversation `memory_id`
    ///
    /// Memory is only written once the output guardrails accept the reply.
    pub async fn chat(&self, memory_id: &str, user_text: &str) -> Result<ChatResult> {
        let prepared = self.prepare(memory_id, user_text, "chat").await?;

        let response = self.client.chat(prepared.request_messages.clone()).await?;
        let mut usage = response.token_usage;

        let response = if self.guardrails.has_output_guardrails() {
            let mut regenerate = Regenerator {
                client: self.client.as_ref(),
                messages: prepared.request_messages.clone(),
                last_text: response.text().to_string(),
                usage,
            };
            let request = OutputGuardrailRequest {
                response,
                memory: prepared.history.clone(),
                augmentation: prepared.augmentation.clone(),
                context: prepared.context.clone(),
            };
            let accepted = self
                .guardrails
                .validate_output_with_retries(request, &mut regenerate)
                .await?;
            usage = regenerate.usage;
            accepted
        } else {
            response
        };

        self.remember(&prepared, response.text()).await?;

        let model = if response.model.is_empty() {
            self.client.model_name().to_string()
        } else {
            response.model.clone()
        };
        Ok(ChatResult {
            text: response.message.content,
            sources: prepared
                .augmentation
                .map(|a| a.contents)
                .unwrap_or_default(),
            cost: self.estimate(&model, usage),
            token_usage: usage,
        })
    }

    /// Like `chat`, delivering tokens to `handler` as they arrive
    ///
    /// Output guardrails run on the full text. Rewrite, retry and reprompt
    /// outcomes are errors here because the tokens were already delivered.
    pub async fn chat_stream(
        &self,
        memory_id: &str,
        user_text: &str,
        handler: &mut dyn StreamingHandler,
    ) -> Result<ChatResult> {
        let prepared = self.prepare(memory_id, user_text, "chat_stream").await?;

        let mut stream = self
            .client
            .chat_stream(prepared.request_messages.clone())
            .await?;
        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            let delta = delta?;
            handler.on_partial(&delta);
            text.push_str(&delta);
        }

        if self.guardrails.has_output_guardrails() {
            let request = OutputGuardrailRequest {
                response: ChatResponse::from_text(self.client.model_name(), text.clone()),
                memory: prepared.history.clone(),
                augmentation: prepared.augmentation.clone(),
                context: prepared.context.clone(),
            };
            match self.guardrails.validate_output(&request).await? {
                OutputVerdict::Accept(accepted) if accepted == text => {}
                OutputVerdict::Accept(_) => {
                    return Err(RagRailError::GuardrailFailed {
                        kind: GuardrailKind::Output.to_string(),
                        messages: vec![
                            "rewriting the output is not possible on a streamed response"
                                .to_string(),
                        ],
                    });
                }
                OutputVerdict::Retry { message } | OutputVerdict::Reprompt { message, .. } => {
                    return Err(RagRailError::GuardrailFailed {
                        kind: GuardrailKind::Output.to_string(),
                        messages: vec![format!(
                            "retry is not possible on a streamed response: {}",
                            message
                        )],
                    });
                }
            };
        }

        self.remember(&prepared, &text).await?;

        let result = ChatResult {
            text,
            sources: prepared
                .augmentation
                .map(|a| a.contents)
                .unwrap_or_default(),
            token_usage: None,
            cost: None,
        };
        handler.on_complete(&result);
        Ok(result)
    }
}

/// Re-invokes the model for output guardrail retries
struct Regenerator<'a> {
    client: &'a dyn LLMClient,
    messages: Vec<ChatMessage>,
    last_text: String,
    usage: Option<TokenUsage>,
}

#[async_trait]
impl Regenerate for Regenerator<'_> {
    async fn regenerate(&mut self, reprompt: Option<ChatMessage>) -> Result<ChatResponse> {
        if let Some(reprompt) = reprompt {
            self.messages.push(ChatMessage::assistant(self.last_text.clone()));
            self.messages.push(reprompt);
        }
        let response = self.client.chat(self.messages.clone()).await?;
        self.last_text = response.text().to_string();
        self.usage = match (self.usage, response.token_usage) {
            (Some(a), Some(b)) => Some(a.add(b)),
            (a, b) => a.or(b),
        };
        Ok(response)
    }
}

pub struct AiServiceBuilder {
    name: String,
    client: Arc<dyn LLMClient>,
    memory_store: Option<Arc<dyn ChatMemoryStore>>,
    max_messages: usize,
    augmentor: Option<Arc<dyn RetrievalAugmentor>>,
    guardrails: GuardrailChain,
    cost: Option<CostEstimatorService>,
    system_prompt: Option<String>,
}

impl AiServiceBuilder {
    fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            name: "Assistant".to_string(),
            client,
            memory_store: None,
            max_messages: 20,
            augmentor: None,
            guardrails: GuardrailChain::new(),
            cost: None,
            system_prompt: None,
        }
    }

    /// Name reported in guardrail events
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn chat_memory(mut self, store: Arc<dyn ChatMemoryStore>, max_messages: usize) -> Self {
        self.memory_store = Some(store);
        self.max_messages = max_messages;
        self
    }

    pub fn retrieval_augmentor(mut self, augmentor: Arc<dyn RetrievalAugmentor>) -> Self {
        self.augmentor = Some(augmentor);
        self
    }

    pub fn guardrails(mut self, guardrails: GuardrailChain) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn cost_estimator(mut self, cost: CostEstimatorService) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn build(self) -> AiService {
        AiService {
            name: self.name,
            client: self.client,
            memory_store: self.memory_store,
            max_messages: self.max_messages,
            augmentor: self.augmentor,
            guardrails: self.guardrails,
            cost: self.cost,
            system_prompt: self.system_prompt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelPrice;
    use crate::cost::PriceTableCostEstimator;
    use crate::guardrail::{
        input_guardrail_fn, output_guardrail_fn, InputGuardrailResult, OutputGuardrailResult,
    };
    use crate::memory::{InMemoryChatMemoryStore, SUMMARY_PREFIX};
    use crate::rag::{retriever_fn, DefaultRetrievalAugmentor, Query};
    use std::sync::Mutex;

    /// Replies from a script and records every request
    struct Scripted {
        replies: Mutex<Vec<&'static str>>,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Scripted {
        fn new(replies: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<Vec<ChatMessage>> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LLMClient for Scripted {
        async fn chat(&self, messages: Vec<ChatMessage>) -> Result<ChatResponse> {
            self.requests.lock().unwrap().push(messages);
            let text = self.replies.lock().unwrap().remove(0);
            Ok(ChatResponse {
                token_usage: Some(TokenUsage::new(100, 10)),
                ..ChatResponse::from_text("scripted-1", text)
            })
        }

        fn model_name(&self) -> &str {
            "scripted-1"
        }
    }

    fn memory_store() -> Arc<dyn ChatMemoryStore> {
        Arc::new(InMemoryChatMemoryStore::new())
    }

    #[tokio::test]
    async fn test_chat_updates_memory_and_estimates_cost() {
        let client = Scripted::new(vec!["Hello!", "Still here."]);
        let pricing = PriceTableCostEstimator::new("USD").with_price(
            "scripted-*",
            ModelPrice {
                input_per_million: 1.0,
                output_per_million: 2.0,
            },
        );
        let service = AiService::builder(client.clone())
            .system_prompt("Be kind.")
            .chat_memory(memory_store(), 10)
            .cost_estimator(CostEstimatorService::new().with_estimator(Arc::new(pricing)))
            .build();

        let first = service.chat("m1", "Hi").await.unwrap();
        assert_eq!(first.text, "Hello!");
        assert_eq!(first.token_usage, Some(TokenUsage::new(100, 10)));
        assert_eq!(first.cost, Some(Cost::new(120, "USD")));

        service.chat("m1", "Are you there?").await.unwrap();
        let second_request = &client.requests()[1];
        assert_eq!(
            second_request,
            &vec![
                ChatMessage::system("Be kind."),
                ChatMessage::user("Hi"),
                ChatMessage::assistant("Hello!"),
                ChatMessage::user("Are you there?"),
            ]
        );

        let stored = service.memory("m1").unwrap().messages().await.unwrap();
        assert_eq!(stored.len(), 5);
        assert_eq!(stored.iter().filter(|m| m.is_system()).count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_output_leaves_memory_untouched() {
        let client = Scripted::new(vec!["secret stuff"]);
        let service = AiService::builder(client)
            .chat_memory(memory_store(), 10)
            .guardrails(GuardrailChain::new().output(Arc::new(output_guardrail_fn(
                "NoSecrets",
                |r: &OutputGuardrailRequest| {
                    if r.response.text().contains("secret") {
                        OutputGuardrailResult::fatal("leak")
                    } else {
                        OutputGuardrailResult::Success
                    }
                },
            ))))
            .build();

        let err = service.chat("m1", "tell me").await.unwrap_err();
        assert!(matches!(err, RagRailError::GuardrailFatal { .. }));
        assert!(service.memory("m1").unwrap().messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reprompt_accumulates_usage() {
        let client = Scripted::new(vec!["prose", "{\"a\":1}"]);
        let service = AiService::builder(client.clone())
            .guardrails(GuardrailChain::new().output(Arc::new(output_guardrail_fn(
                "Json",
                |r: &OutputGuardrailRequest| {
                    if r.response.text().starts_with('{') {
                        OutputGuardrailResult::Success
                    } else {
                        OutputGuardrailResult::reprompt("not json", "JSON please")
                    }
                },
            ))))
            .build();

        let result = service.chat("m", "data?").await.unwrap();
        assert_eq!(result.text, "{\"a\":1}");
        assert_eq!(result.token_usage, Some(TokenUsage::new(200, 20)));

        let retry = &client.requests()[1];
        assert_eq!(retry[retry.len() - 2], ChatMessage::assistant("prose"));
        assert_eq!(retry[retry.len() - 1], ChatMessage::user("JSON please"));
    }

    #[tokio::test]
    async fn test_rag_sources_and_input_rewrite() {
        let client = Scripted::new(vec!["Paris."]);
        let augmentor = DefaultRetrievalAugmentor::builder()
            .content_retriever(Arc::new(retriever_fn("facts", |_q: &Query| {
                vec![Content::new("The capital of France is Paris.")]
            })))
            .build()
            .unwrap();
        let service = AiService::builder(client.clone())
            .retrieval_augmentor(Arc::new(augmentor))
            .guardrails(GuardrailChain::new().input(Arc::new(input_guardrail_fn(
                "Shout",
                |r: &InputGuardrailRequest| {
                    assert!(r.augmentation.is_some());
                    InputGuardrailResult::SuccessWith(r.user_message.content.to_uppercase())
                },
            ))))
            .build();

        let result = service.chat("m", "capital of france?").await.unwrap();
        assert_eq!(result.sources.len(), 1);
        let sent = client.requests()[0].last().unwrap().content.clone();
        assert!(sent.starts_with("CAPITAL OF FRANCE?"));
        assert!(sent.contains("THE CAPITAL OF FRANCE IS PARIS."));
    }

    #[derive(Default)]
    struct Collect {
        partials: Vec<String>,
        completed: Option<String>,
    }

    impl StreamingHandler for Collect {
        fn on_partial(&mut self, token: &str) {
            self.partials.push(token.to_string());
        }

        fn on_complete(&mut self, result: &ChatResult) {
            self.completed = Some(result.text.clone());
        }
    }

    #[tokio::test]
    async fn test_stream_delivers_partials_and_stores_memory() {
        let client = Scripted::new(vec!["streamed"]);
        let service = AiService::builder(client)
            .chat_memory(memory_store(), 10)
            .build();

        let mut handler = Collect::default();
        let result = service.chat_stream("s", "go", &mut handler).await.unwrap();
        assert_eq!(result.text, "streamed");
        assert_eq!(handler.partials, vec!["streamed"]);
        assert_eq!(handler.completed.as_deref(), Some("streamed"));
        assert_eq!(service.memory("s").unwrap().messages().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stream_reprompt_is_error() {
        let client = Scripted::new(vec!["bad"]);
        let service = AiService::builder(client)
            .chat_memory(memory_store(), 10)
            .guardrails(GuardrailChain::new().output(Arc::new(output_guardrail_fn(
                "Retry",
                |_r: &OutputGuardrailRequest| OutputGuardrailResult::retry("again"),
            ))))
            .build();

        let mut handler = Collect::default();
        let err = service.chat_stream("s", "go", &mut handler).await.unwrap_err();
        assert!(matches!(err, RagRailError::GuardrailFailed { .. }));
        assert!(handler.completed.is_none());
        assert!(service.memory("s").unwrap().messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compressed_summary_keeps_padded_system_prompt() {
        let store = memory_store();
        let summary = format!("Be brief.\n\n{}\nThey asked about cats.", SUMMARY_PREFIX);
        store
            .update_messages("s", vec![ChatMessage::system(summary.clone())])
            .await
            .unwrap();

        let client = Scripted::new(vec!["ok"]);
        let service = AiService::builder(client.clone())
            .system_prompt("  Be brief.\n")
            .chat_memory(store, 10)
            .build();
        service.chat("s", "and dogs?").await.unwrap();

        let request = &client.requests()[0];
        assert_eq!(request.iter().filter(|m| m.is_system()).count(), 1);
        assert_eq!(request[0].content, summary);

        let stored = service.memory("s").unwrap().messages().await.unwrap();
        assert_eq!(stored[0].content, summary);
        assert_eq!(stored.len(), 3);
    }

    #[tokio::test]
    async fn test_stream_rewrite_is_error() {
        let client = Scripted::new(vec!["secret token"]);
        let service = AiService::builder(client)
            .chat_memory(memory_store(), 10)
            .guardrails(GuardrailChain::new().output(Arc::new(output_guardrail_fn(
                "Redact",
                |r: &OutputGuardrailRequest| {
                    OutputGuardrailResult::SuccessWith(r.response.text().replace("secret", "[X]"))
                },
            ))))
            .build();

        let mut handler = Collect::default();
        let err = service.chat_stream("s", "go", &mut handler).await.unwrap_err();
        assert!(matches!(err, RagRailError::GuardrailFailed { .. }));
        assert_eq!(handler.partials.concat(), "secret token");
        assert!(handler.completed.is_none());
        assert!(service.memory("s").unwrap().messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_accepts_unchanged_output() {
        let client = Scripted::new(vec!["fine"]);
        let service = AiService::builder(client)
            .guardrails(GuardrailChain::new().output(Arc::new(output_guardrail_fn(
                "Same",
                |r: &OutputGuardrailRequest| {
                    OutputGuardrailResult::SuccessWith(r.response.text().to_string())
                },
            ))))
            .build();

        let mut handler = Collect::default();
        let result = service.chat_stream("s", "go", &mut handler).await.unwrap();
        assert_eq!(result.text, "fine");
        assert_eq!(handler.completed.as_deref(), Some("fine"));
    }
}
