//! Content injection into the user message

use super::Content;
use crate::llm::ChatMessage;

/// Default prompt template
pub const DEFAULT_PROMPT_TEMPLATE: &str =
    "{{userMessage}}\n\nAnswer using the following information:\n{{contents}}";

/// Combines retrieved contents with the user message
pub trait ContentInjector: Send + Sync {
    fn inject(&self, contents: &[Content], user_message: &ChatMessage) -> ChatMessage;
}

/// Fills `{{userMessage}}` and `{{contents}}` in a prompt template
#[derive(Debug, Clone)]
pub struct DefaultContentInjector {
    template: String,
    metadata_keys: Vec<String>,
}

impl Default for DefaultContentInjector {
    fn default() -> Self {
        Self {
            template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            metadata_keys: Vec::new(),
        }
    }
}

impl DefaultContentInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Segment metadata keys to include after each content
    pub fn with_metadata_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    fn format_content(&self, content: &Content) -> String {
        if self.metadata_keys.is_empty() {
            return content.text().to_string();
        }

        let mut out = format!("content: {}", content.text());
        for key in &self.metadata_keys {
            if let Some(value) = content.segment.metadata.get(key) {
                out.push_str(&format!("\n{}: {}", key, value));
            }
        }
        out
    }
}

impl ContentInjector for DefaultContentInjector {
    fn inject(&self, contents: &[Content], user_message: &ChatMessage) -> ChatMessage {
        if contents.is_empty() {
            return user_message.clone();
        }

        let joined = contents
            .iter()
            .map(|c| self.format_content(c))
            .collect::<Vec<_>>()
            .join("\n\n");

        let text = self
            .template
            .replace("{{userMessage}}", &user_message.content)
            .replace("{{contents}}", &joined);

        ChatMessage::user(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::TextSegment;

    #[test]
    fn test_no_contents_returns_message_unchanged() {
        let msg = ChatMessage::user("hello");
        assert_eq!(DefaultContentInjector::new().inject(&[], &msg), msg);
    }

    #[test]
    fn test_default_template() {
        let contents = vec![Content::new("Paris is in France."), Content::new("It has the Louvre.")];
        let out = DefaultContentInjector::new().inject(&contents, &ChatMessage::user("Tell me about Paris"));
        assert_eq!(
            out.content,
            "Tell me about Paris\n\nAnswer using the following information:\nParis is in France.\n\nIt has the Louvre."
        );
    }

    #[test]
    fn test_metadata_keys() {
        let contents = vec![Content::from_segment(
            TextSegment::new("Refunds within 14 days.")
                .with_meta("file_name", "terms.md")
                .with_meta("ignored", "x"),
        )];
        let injector = DefaultContentInjector::new()
            .with_template("Q: {{userMessage}}\n---\n{{contents}}")
            .with_metadata_keys(["file_name"]);
        let out = injector.inject(&contents, &ChatMessage::user("refunds?"));
        assert_eq!(
            out.content,
            "Q: refunds?\n---\ncontent: Refunds within 14 days.\nfile_name: terms.md"
        );
    }
}
