//! Queries and retrieved content

use crate::llm::ChatMessage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Context a query was derived from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMetadata {
    /// The user message that started the request
    pub user_message: ChatMessage,
    /// Chat memory the request belongs to
    pub memory_id: Option<String>,
    /// Previous turns, oldest first
    pub chat_history: Vec<ChatMessage>,
}

impl QueryMetadata {
    pub fn new(user_message: ChatMessage) -> Self {
        Self {
            user_message,
            memory_id: None,
            chat_history: Vec::new(),
        }
    }

    pub fn with_memory(mut self, memory_id: impl Into<String>, history: Vec<ChatMessage>) -> Self {
        self.memory_id = Some(memory_id.into());
        self.chat_history = history;
        self
    }
}

/// Text used to retrieve content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub metadata: Option<QueryMetadata>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(text: impl Into<String>, metadata: QueryMetadata) -> Self {
        Self {
            text: text.into(),
            metadata: Some(metadata),
        }
    }

    /// New query with different text, keeping this query's metadata
    pub fn derive(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn chat_history(&self) -> &[ChatMessage] {
        self.metadata
            .as_ref()
            .map(|m| m.chat_history.as_slice())
            .unwrap_or(&[])
    }
}

/// A piece of text with string metadata such as `file_name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextSegment {
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TextSegment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Unit exchanged between retrievers, aggregators and injectors
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub segment: TextSegment,
    /// Relevance score in `0.0..=1.0` when known
    pub score: Option<f64>,
    pub embedding_id: Option<String>,
}

impl Content {
    pub fn new(text: impl Into<String>) -> Self {
        Self::from_segment(TextSegment::new(text))
    }

    pub fn from_segment(segment: TextSegment) -> Self {
        Self {
            segment,
            score: None,
            embedding_id: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn text(&self) -> &str {
        &self.segment.text
    }
}
