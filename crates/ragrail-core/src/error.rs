//! Error types for ragrail

use thiserror::Error;

/// Result type alias using RagRailError
pub type Result<T> = std::result::Result<T, RagRailError>;

/// Error type alias for convenience
pub type Error = RagRailError;

/// Exit codes for CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const NOT_FOUND: i32 = 2;
    pub const INVALID_INPUT: i32 = 3;
    pub const GUARDRAIL_REJECTED: i32 = 4;
}

/// Main error type for ragrail
#[derive(Debug, Error)]
pub enum RagRailError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("Glob pattern error: {0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx answer from a model provider
    #[error("Provider error (HTTP {status}): {message}")]
    Provider {
        status: u16,
        message: String,
        kind: Option<String>,
        code: Option<String>,
    },

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// One or more guardrails rejected the message
    #[error("{kind} guardrail validation failed: {}", messages.join("; "))]
    GuardrailFailed { kind: String, messages: Vec<String> },

    /// A guardrail aborted the chain
    #[error("{kind} guardrail {guardrail} failed fatally: {message}")]
    GuardrailFatal {
        kind: String,
        guardrail: String,
        message: String,
    },

    #[error("The guardrails have reached the maximum number of retries ({0}): {1}")]
    GuardrailRetriesExhausted(u32, String),

    #[error("Memory not found: {0}")]
    MemoryNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RagRailError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MemoryNotFound(_) => exit_codes::NOT_FOUND,
            Self::InvalidInput(_) | Self::Config(_) => exit_codes::INVALID_INPUT,
            Self::GuardrailFailed { .. }
            | Self::GuardrailFatal { .. }
            | Self::GuardrailRetriesExhausted(..) => exit_codes::GUARDRAIL_REJECTED,
            _ => exit_codes::GENERAL_ERROR,
        }
    }

    /// HTTP status carried by a provider error
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Provider { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
