//! Guardrail outcomes

use crate::llm::ChatMessage;
use serde::Serialize;
use std::fmt;

/// Enum-valued outcome used in events and metric tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailOutcome {
    Success,
    SuccessWithResult,
    Failure,
    Fatal,
    Retry,
    Reprompt,
}

impl GuardrailOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SuccessWithResult => "success_with_result",
            Self::Failure => "failure",
            Self::Fatal => "fatal",
            Self::Retry => "retry",
            Self::Reprompt => "reprompt",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::SuccessWithResult)
    }
}

impl fmt::Display for GuardrailOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an input guardrail
#[derive(Debug, Clone, PartialEq)]
pub enum InputGuardrailResult {
    Success,
    /// Replace the user message text seen by later guardrails and the model
    SuccessWith(String),
    /// Reject; the chain keeps going and reports every failure
    Failure { message: String },
    /// Reject and stop the chain
    Fatal {
        message: String,
        cause: Option<String>,
    },
}

impl InputGuardrailResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            cause: None,
        }
    }

    pub fn outcome(&self) -> GuardrailOutcome {
        match self {
            Self::Success => GuardrailOutcome::Success,
            Self::SuccessWith(_) => GuardrailOutcome::SuccessWithResult,
            Self::Failure { .. } => GuardrailOutcome::Failure,
            Self::Fatal { .. } => GuardrailOutcome::Fatal,
        }
    }
}

/// Result of an output guardrail
#[derive(Debug, Clone, PartialEq)]
pub enum OutputGuardrailResult {
    Success,
    /// Replace the response text seen by later guardrails and the caller
    SuccessWith(String),
    Failure { message: String },
    Fatal {
        message: String,
        cause: Option<String>,
    },
    /// Call the model again with the same messages
    Retry { message: String },
    /// Call the model again after adding `reprompt` as a user turn
    Reprompt { message: String, reprompt: String },
}

impl OutputGuardrailResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            cause: None,
        }
    }

    pub fn retry(message: impl Into<String>) -> Self {
        Self::Retry {
            message: message.into(),
        }
    }

    pub fn reprompt(message: impl Into<String>, reprompt: impl Into<String>) -> Self {
        Self::Reprompt {
            message: message.into(),
            reprompt: reprompt.into(),
        }
    }

    pub fn outcome(&self) -> GuardrailOutcome {
        match self {
            Self::Success => GuardrailOutcome::Success,
            Self::SuccessWith(_) => GuardrailOutcome::SuccessWithResult,
            Self::Failure { .. } => GuardrailOutcome::Failure,
            Self::Fatal { .. } => GuardrailOutcome::Fatal,
            Self::Retry { .. } => GuardrailOutcome::Retry,
            Self::Reprompt { .. } => GuardrailOutcome::Reprompt,
        }
    }
}

/// What the output chain asks of its caller
#[derive(Debug, Clone, PartialEq)]
pub enum OutputVerdict {
    /// Every guardrail passed; carries the possibly rewritten text
    Accept(String),
    Retry { message: String },
    Reprompt {
        message: String,
        reprompt: ChatMessage,
    },
}
