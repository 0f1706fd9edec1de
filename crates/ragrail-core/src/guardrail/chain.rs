//! Ordered execution of input and output guardrails

use super::{
    GuardrailEventSink, GuardrailExecutedEvent, GuardrailKind, InputGuardrail,
    InputGuardrailRequest, InputGuardrailResult, InvocationContext, OutputGuardrail,
    OutputGuardrailRequest, OutputGuardrailResult, OutputVerdict,
};
use crate::error::{RagRailError, Result};
use crate::llm::{ChatMessage, ChatResponse};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Default number of output validation attempts
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Calls the model again when an output guardrail asks for a retry
#[async_trait]
pub trait Regenerate: Send {
    /// `reprompt` is the user turn to add before calling, if any
    async fn regenerate(&mut self, reprompt: Option<ChatMessage>) -> Result<ChatResponse>;
}

/// Input and output guardrails plus the sinks their events go to
#[derive(Clone)]
pub struct GuardrailChain {
    input: Vec<Arc<dyn InputGuardrail>>,
    output: Vec<Arc<dyn OutputGuardrail>>,
    sinks: Vec<Arc<dyn GuardrailEventSink>>,
    max_retries: u32,
}

impl Default for GuardrailChain {
    fn default() -> Self {
        Self {
            input: Vec::new(),
            output: Vec::new(),
            sinks: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl GuardrailChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, guardrail: Arc<dyn InputGuardrail>) -> Self {
        self.input.push(guardrail);
        self
    }

    pub fn output(mut self, guardrail: Arc<dyn OutputGuardrail>) -> Self {
        self.output.push(guardrail);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn GuardrailEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Output validation attempts before giving up; 0 disables retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn has_input_guardrails(&self) -> bool {
        !self.input.is_empty()
    }

    pub fn has_output_guardrails(&self) -> bool {
        !self.output.is_empty()
    }

    fn emit(&self, event: GuardrailExecutedEvent) {
        for sink in &self.sinks {
            sink.on_event(&event);
        }
    }

    /// Run input guardrails in order and return the message to send
    ///
    /// Rewrites are passed on to later guardrails. A fatal result stops the
    /// chain at once; other failures are collected and reported together
    /// once every guardrail has run.
    pub async fn validate_input(&self, mut request: InputGuardrailRequest) -> Result<ChatMessage> {
        let mut failures = Vec::new();

        for guardrail in &self.input {
            let name = guardrail.name();
            let started = Instant::now();
            let result = guardrail.validate(&request).await;
            let duration = started.elapsed();

            let message = match &result {
                InputGuardrailResult::Failure { message }
                | InputGuardrailResult::Fatal { message, .. } => Some(message.clone()),
                _ => None,
            };
            self.emit(GuardrailExecutedEvent {
                context: request.context.clone(),
                guardrail: name.clone(),
                kind: GuardrailKind::Input,
                outcome: result.outcome(),
                duration,
                tool: None,
                message,
            });

            match result {
                InputGuardrailResult::Success => {}
                InputGuardrailResult::SuccessWith(text) => {
                    request.user_message.content = text;
                }
                InputGuardrailResult::Failure { message } => failures.push(message),
                InputGuardrailResult::Fatal { message, cause } => {
                    return Err(RagRailError::GuardrailFatal {
                        kind: GuardrailKind::Input.to_string(),
                        guardrail: name,
                        message: with_cause(message, cause),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(request.user_message)
        } else {
            Err(RagRailError::GuardrailFailed {
                kind: GuardrailKind::Input.to_string(),
                messages: failures,
            })
        }
    }

    /// Run output guardrails once
    ///
    /// A retry or reprompt stops the chain and is handed back to the caller.
    pub async fn validate_output(&self, request: &OutputGuardrailRequest) -> Result<OutputVerdict> {
        let mut request = request.clone();
        let mut failures = Vec::new();

        for guardrail in &self.output {
            let name = guardrail.name();
            let started = Instant::now();
            let result = guardrail.validate(&request).await;
            let duration = started.elapsed();

            let message = match &result {
                OutputGuardrailResult::Failure { message }
                | OutputGuardrailResult::Fatal { message, .. }
                | OutputGuardrailResult::Retry { message }
                | OutputGuardrailResult::Reprompt { message, .. } => Some(message.clone()),
                _ => None,
            };
            self.emit(GuardrailExecutedEvent {
                context: request.context.clone(),
                guardrail: name.clone(),
                kind: GuardrailKind::Output,
                outcome: result.outcome(),
                duration,
                tool: None,
                message,
            });

            match result {
                OutputGuardrailResult::Success => {}
                OutputGuardrailResult::SuccessWith(text) => {
                    request.response.message.content = text;
                }
                OutputGuardrailResult::Failure { message } => failures.push(message),
                OutputGuardrailResult::Fatal { message, cause } => {
                    return Err(RagRailError::GuardrailFatal {
                        kind: GuardrailKind::Output.to_string(),
                        guardrail: name,
                        message: with_cause(message, cause),
                    });
                }
                OutputGuardrailResult::Retry { message } => {
                    return Ok(OutputVerdict::Retry { message });
                }
                OutputGuardrailResult::Reprompt { message, reprompt } => {
                    return Ok(OutputVerdict::Reprompt {
                        message,
                        reprompt: ChatMessage::user(reprompt),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(OutputVerdict::Accept(request.response.message.content))
        } else {
            Err(RagRailError::GuardrailFailed {
                kind: GuardrailKind::Output.to_string(),
                messages: failures,
            })
        }
    }

    /// Validate a response, regenerating it while guardrails ask for retries
    ///
    /// Returns the accepted response, with any rewrite applied.
    pub async fn validate_output_with_retries(
        &self,
        mut request: OutputGuardrailRequest,
        regenerate: &mut dyn Regenerate,
    ) -> Result<ChatResponse> {
        let attempts = self.max_retries.max(1);
        let mut attempt = 0;

        loop {
            let (message, reprompt) = match self.validate_output(&request).await? {
                OutputVerdict::Accept(text) => {
                    request.response.message.content = text;
                    return Ok(request.response);
                }
                OutputVerdict::Retry { message } => (message, None),
                OutputVerdict::Reprompt { message, reprompt } => (message, Some(reprompt)),
            };

            attempt += 1;
            if self.max_retries == 0 || attempt >= attempts {
                return Err(RagRailError::GuardrailRetriesExhausted(self.max_retries, message));
            }

            tracing::debug!(
                "Output guardrails asked for another attempt ({}/{}): {}",
                attempt + 1,
                attempts,
                message
            );
            request.response = regenerate.regenerate(reprompt).await?;
        }
    }
}

fn with_cause(message: String, cause: Option<String>) -> String {
    match cause {
        Some(cause) => format!("{} (caused by: {})", message, cause),
        None => message,
    }
}

/// Context used when a guardrail runs outside an AI service
pub fn standalone_context() -> InvocationContext {
    InvocationContext::new("standalone", "validate")
}
