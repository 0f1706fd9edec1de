//! Guardrails installed by the CLI

use async_trait::async_trait;
use lazy_static::lazy_static;
use ragrail_core::guardrail::{
    InputGuardrail, InputGuardrailRequest, InputGuardrailResult, OutputGuardrail,
    OutputGuardrailRequest, OutputGuardrailResult,
};
use regex::Regex;

lazy_static! {
    static ref SECRET: Regex =
        Regex::new(r"\b(?:sk-[A-Za-z0-9_-]{16,}|AKIA[0-9A-Z]{16}|gh[pousr]_[A-Za-z0-9]{20,})\b")
            .unwrap();
}

const REDACTED: &str = "[REDACTED]";

/// Replaces API keys and tokens in the question before it leaves the machine
pub struct RedactSecrets;

#[async_trait]
impl InputGuardrail for RedactSecrets {
    async fn validate(&self, request: &InputGuardrailRequest) -> InputGuardrailResult {
        let text = &request.user_message.content;
        if !SECRET.is_match(text) {
            return InputGuardrailResult::Success;
        }
        tracing::warn!("Redacted a secret from the question");
        InputGuardrailResult::SuccessWith(SECRET.replace_all(text, REDACTED).into_owned())
    }
}

/// Asks the model again when it answers with nothing
pub struct NonEmptyAnswer;

#[async_trait]
impl OutputGuardrail for NonEmptyAnswer {
    async fn validate(&self, request: &OutputGuardrailRequest) -> OutputGuardrailResult {
        if request.response.text().trim().is_empty() {
            OutputGuardrailResult::reprompt(
                "the answer was empty",
                "Your previous answer was empty. Answer the question.",
            )
        } else {
            OutputGuardrailResult::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragrail_core::guardrail::standalone_context;
    use ragrail_core::ChatMessage;

    fn input(text: &str) -> InputGuardrailRequest {
        InputGuardrailRequest {
            user_message: ChatMessage::user(text),
            memory: Vec::new(),
            augmentation: None,
            context: standalone_context(),
        }
    }

    #[tokio::test]
    async fn test_redacts_api_keys() {
        let result = RedactSecrets
            .validate(&input("my key is sk-abcdefghijklmnop1234 ok?"))
            .await;
        assert_eq!(
            result,
            InputGuardrailResult::SuccessWith("my key is [REDACTED] ok?".to_string())
        );
        assert_eq!(
            RedactSecrets.validate(&input("no secrets here")).await,
            InputGuardrailResult::Success
        );
        assert_eq!(RedactSecrets.name(), "RedactSecrets");
    }
}
