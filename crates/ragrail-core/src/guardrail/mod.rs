//! Guardrails around LLM and tool calls
//!
//! Input guardrails see the (augmented) user message before the model is
//! called; output guardrails see the model response and may ask for a retry
//! or a reprompt. Every execution is timed and reported to event sinks.

mod chain;
mod events;
mod result;
mod tool;

pub use chain::{standalone_context, GuardrailChain, Regenerate, DEFAULT_MAX_RETRIES};
pub use events::{
    GuardrailEventSink, GuardrailExecutedEvent, GuardrailMetrics, MetricSample, TracingEventSink,
};
pub use result::{GuardrailOutcome, InputGuardrailResult, OutputGuardrailResult, OutputVerdict};
pub use tool::{
    ToolExecutionRequest, ToolExecutionResult, ToolGuardrailChain, ToolInputGuardrail,
    ToolInputGuardrailResult, ToolOutputGuardrail, ToolOutputGuardrailResult,
};

use crate::llm::{ChatMessage, ChatResponse};
use crate::rag::AugmentationResult;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// Which side of a call a guardrail validates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GuardrailKind {
    Input,
    Output,
    ToolInput,
    ToolOutput,
}

impl GuardrailKind {
    /// Value of the `guardrail.type` tag
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Input | Self::ToolInput => "input",
            Self::Output | Self::ToolOutput => "output",
        }
    }

    /// Prefix of the metric names
    pub fn metric_prefix(&self) -> &'static str {
        match self {
            Self::Input | Self::Output => "guardrail",
            Self::ToolInput | Self::ToolOutput => "tool-guardrail",
        }
    }
}

impl fmt::Display for GuardrailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::ToolInput => "tool input",
            Self::ToolOutput => "tool output",
        })
    }
}

/// Where a guardrail runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct InvocationContext {
    /// Name of the AI service
    pub service: String,
    /// Operation invoked on the service
    pub operation: String,
    pub memory_id: Option<String>,
}

impl InvocationContext {
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: sanitize_name(&service.into()),
            operation: operation.into(),
            memory_id: None,
        }
    }

    pub fn with_memory_id(mut self, memory_id: impl Into<String>) -> Self {
        self.memory_id = Some(memory_id.into());
        self
    }
}

/// What an input guardrail validates
#[derive(Debug, Clone)]
pub struct InputGuardrailRequest {
    pub user_message: ChatMessage,
    /// Memory contents before this call
    pub memory: Vec<ChatMessage>,
    pub augmentation: Option<AugmentationResult>,
    pub context: InvocationContext,
}

/// What an output guardrail validates
#[derive(Debug, Clone)]
pub struct OutputGuardrailRequest {
    pub response: ChatResponse,
    pub memory: Vec<ChatMessage>,
    pub augmentation: Option<AugmentationResult>,
    pub context: InvocationContext,
}

#[async_trait]
pub trait InputGuardrail: Send + Sync {
    async fn validate(&self, request: &InputGuardrailRequest) -> InputGuardrailResult;

    fn name(&self) -> String {
        sanitize_name(std::any::type_name::<Self>())
    }
}

#[async_trait]
pub trait OutputGuardrail: Send + Sync {
    async fn validate(&self, request: &OutputGuardrailRequest) -> OutputGuardrailResult;

    fn name(&self) -> String {
        sanitize_name(std::any::type_name::<Self>())
    }
}

/// Input guardrail backed by a plain function
pub struct FnInputGuardrail<F> {
    name: String,
    f: F,
}

pub fn input_guardrail_fn<F>(name: impl Into<String>, f: F) -> FnInputGuardrail<F>
where
    F: Fn(&InputGuardrailRequest) -> InputGuardrailResult + Send + Sync,
{
    FnInputGuardrail {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F> InputGuardrail for FnInputGuardrail<F>
where
    F: Fn(&InputGuardrailRequest) -> InputGuardrailResult + Send + Sync,
{
    async fn validate(&self, request: &InputGuardrailRequest) -> InputGuardrailResult {
        (self.f)(request)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Output guardrail backed by a plain function
pub struct FnOutputGuardrail<F> {
    name: String,
    f: F,
}

pub fn output_guardrail_fn<F>(name: impl Into<String>, f: F) -> FnOutputGuardrail<F>
where
    F: Fn(&OutputGuardrailRequest) -> OutputGuardrailResult + Send + Sync,
{
    FnOutputGuardrail {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F> OutputGuardrail for FnOutputGuardrail<F>
where
    F: Fn(&OutputGuardrailRequest) -> OutputGuardrailResult + Send + Sync,
{
    async fn validate(&self, request: &OutputGuardrailRequest) -> OutputGuardrailResult {
        (self.f)(request)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Short, stable name for a guardrail or service type
///
/// Drops the module path and generic arguments, and the `_ClientProxy`
/// suffix added by proxy wrappers.
pub fn sanitize_name(raw: &str) -> String {
    let without_generics = raw.split('<').next().unwrap_or(raw);
    let short = without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics);
    let short = short.rsplit('.').next().unwrap_or(short);
    short.strip_suffix("_ClientProxy").unwrap_or(short).to_string()
}
