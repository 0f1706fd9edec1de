//! Guardrails around tool executions
//!
//! Unlike the LLM guardrails these are fail-fast: the first result that is
//! not a success ends the chain.

use super::{
    sanitize_name, GuardrailEventSink, GuardrailExecutedEvent, GuardrailKind, GuardrailOutcome,
    InvocationContext,
};
use crate::error::{RagRailError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolExecutionRequest {
    pub id: Option<String>,
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

impl ToolExecutionRequest {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Output of a tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub text: String,
    pub is_error: bool,
}

impl ToolExecutionResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolInputGuardrailResult {
    Success,
    /// Continue with a modified request
    SuccessWith(ToolExecutionRequest),
    Failure(String),
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutputGuardrailResult {
    Success,
    /// Continue with a modified result
    SuccessWith(ToolExecutionResult),
    Failure(String),
    Fatal(String),
}

#[async_trait]
pub trait ToolInputGuardrail: Send + Sync {
    async fn validate(
        &self,
        request: &ToolExecutionRequest,
        context: &InvocationContext,
    ) -> ToolInputGuardrailResult;

    fn name(&self) -> String {
        sanitize_name(std::any::type_name::<Self>())
    }
}

#[async_trait]
pub trait ToolOutputGuardrail: Send + Sync {
    /// An `Err` is treated as a fatal result
    async fn validate(
        &self,
        result: &ToolExecutionResult,
        request: &ToolExecutionRequest,
        context: &InvocationContext,
    ) -> Result<ToolOutputGuardrailResult>;

    fn name(&self) -> String {
        sanitize_name(std::any::type_name::<Self>())
    }
}

/// Guardrails for one tool
#[derive(Clone, Default)]
pub struct ToolGuardrailChain {
    input: Vec<Arc<dyn ToolInputGuardrail>>,
    output: Vec<Arc<dyn ToolOutputGuardrail>>,
    sinks: Vec<Arc<dyn GuardrailEventSink>>,
}

impl ToolGuardrailChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, guardrail: Arc<dyn ToolInputGuardrail>) -> Self {
        self.input.push(guardrail);
        self
    }

    pub fn output(mut self, guardrail: Arc<dyn ToolOutputGuardrail>) -> Self {
        self.output.push(guardrail);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn GuardrailEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    fn emit(&self, event: GuardrailExecutedEvent) {
        for sink in &self.sinks {
            sink.on_event(&event);
        }
    }

    /// Validate a tool request; the returned request is the one to execute
    ///
    /// Both fatal and non-fatal failures are errors. Callers usually turn a
    /// non-fatal `GuardrailFailed` into an error result for the model.
    pub async fn validate_input(
        &self,
        request: ToolExecutionRequest,
        context: &InvocationContext,
    ) -> Result<ToolExecutionRequest> {
        let mut current = request;

        for guardrail in &self.input {
            let name = guardrail.name();
            tracing::debug!("Executing input guardrail {} for tool {}", name, current.name);
            let tool = current.name.clone();
            let started = Instant::now();
            let result = guardrail.validate(&current, context).await;
            let record = |outcome, message: Option<String>| {
                self.emit(GuardrailExecutedEvent {
                    context: context.clone(),
                    guardrail: name.clone(),
                    kind: GuardrailKind::ToolInput,
                    outcome,
                    duration: started.elapsed(),
                    tool: Some(tool.clone()),
                    message,
                })
            };

            match result {
                ToolInputGuardrailResult::Success => {
                    record(GuardrailOutcome::Success, None);
                }
                ToolInputGuardrailResult::SuccessWith(modified) => {
                    record(GuardrailOutcome::SuccessWithResult, None);
                    tracing::debug!(
                        "Input guardrail {} modified the request for tool {}",
                        name,
                        tool
                    );
                    current = modified;
                }
                ToolInputGuardrailResult::Failure(message) => {
                    record(GuardrailOutcome::Failure, Some(message.clone()));
                    tracing::warn!("Input guardrail {} failed for tool {}: {}", name, tool, message);
                    return Err(RagRailError::GuardrailFailed {
                        kind: GuardrailKind::ToolInput.to_string(),
                        messages: vec![message],
                    });
                }
                ToolInputGuardrailResult::Fatal(message) => {
                    record(GuardrailOutcome::Fatal, Some(message.clone()));
                    tracing::error!(
                        "Input guardrail {} failed fatally for tool {}: {}",
                        name,
                        tool,
                        message
                    );
                    return Err(RagRailError::GuardrailFatal {
                        kind: GuardrailKind::ToolInput.to_string(),
                        guardrail: name,
                        message,
                    });
                }
            }
        }

        Ok(current)
    }

    /// Validate a tool result
    ///
    /// A non-fatal failure replaces the result with an error result the model
    /// can read; a fatal failure is an error.
    pub async fn validate_output(
        &self,
        result: ToolExecutionResult,
        request: &ToolExecutionRequest,
        context: &InvocationContext,
    ) -> Result<ToolExecutionResult> {
        let mut current = result;

        for guardrail in &self.output {
            let name = guardrail.name();
            tracing::debug!("Executing output guardrail {} for tool {}", name, request.name);
            let started = Instant::now();
            let outcome = guardrail
                .validate(&current, request, context)
                .await
                .unwrap_or_else(|e| ToolOutputGuardrailResult::Fatal(e.to_string()));
            let record = |outcome, message: Option<String>| {
                self.emit(GuardrailExecutedEvent {
                    context: context.clone(),
                    guardrail: name.clone(),
                    kind: GuardrailKind::ToolOutput,
                    outcome,
                    duration: started.elapsed(),
                    tool: Some(request.name.clone()),
                    message,
                })
            };

            match outcome {
                ToolOutputGuardrailResult::Success => {
                    record(GuardrailOutcome::Success, None);
                }
                ToolOutputGuardrailResult::SuccessWith(modified) => {
                    record(GuardrailOutcome::SuccessWithResult, None);
                    tracing::debug!(
                        "Output guardrail {} modified the result for tool {}",
                        name,
                        request.name
                    );
                    current = modified;
                }
                ToolOutputGuardrailResult::Failure(message) => {
                    record(GuardrailOutcome::Failure, Some(message.clone()));
                    tracing::warn!(
                        "Output guardrail {} failed for tool {}: {}",
                        name,
                        request.name,
                        message
                    );
                    return Ok(ToolExecutionResult::error(format!(
                        "Output validation failed: {}",
                        message
                    )));
                }
                ToolOutputGuardrailResult::Fatal(message) => {
                    record(GuardrailOutcome::Fatal, Some(message.clone()));
                    tracing::error!(
                        "Output guardrail {} failed fatally for tool {}: {}",
                        name,
                        request.name,
                        message
                    );
                    return Err(RagRailError::GuardrailFatal {
                        kind: GuardrailKind::ToolOutput.to_string(),
                        guardrail: name,
                        message,
                    });
                }
            }
        }

        Ok(current)
    }
}
