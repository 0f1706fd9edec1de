//! Recursive document splitting
//!
//! Text is split by paragraph first, then line, sentence, word and finally
//! character, descending only for parts that are still too long. Adjacent
//! parts are merged back greedily up to the segment size, and each segment
//! starts with whole trailing parts of the previous one as overlap.

use super::TextSegment;
use crate::config::RagConfig;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PARAGRAPH_BREAK: Regex = Regex::new(r"\n\s*\n").unwrap();
    static ref SENTENCE: Regex = Regex::new(r"[^.!?]+(?:[.!?]+|$)").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Paragraph,
    Line,
    Sentence,
    Word,
    Char,
}

impl Level {
    fn next(self) -> Level {
        match self {
            Level::Paragraph => Level::Line,
            Level::Line => Level::Sentence,
            Level::Sentence => Level::Word,
            Level::Word | Level::Char => Level::Char,
        }
    }

    fn joiner(self) -> &'static str {
        match self {
            Level::Paragraph => "\n\n",
            Level::Line => "\n",
            Level::Sentence | Level::Word => " ",
            Level::Char => "",
        }
    }

    fn separate(self, text: &str) -> Vec<String> {
        let parts: Vec<&str> = match self {
            Level::Paragraph => PARAGRAPH_BREAK.split(text).collect(),
            Level::Line => text.lines().collect(),
            Level::Sentence => SENTENCE.find_iter(text).map(|m| m.as_str()).collect(),
            Level::Word => text.split_whitespace().collect(),
            Level::Char => return Vec::new(),
        };
        parts
            .into_iter()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits documents into segments of at most `max_segment_size` characters
#[derive(Debug, Clone, Copy)]
pub struct DocumentSplitter {
    max_segment_size: usize,
    max_overlap_size: usize,
}

impl DocumentSplitter {
    pub fn new(max_segment_size: usize, max_overlap_size: usize) -> Self {
        let max_segment_size = max_segment_size.max(1);
        Self {
            max_segment_size,
            max_overlap_size: max_overlap_size.min(max_segment_size - 1),
        }
    }

    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(config.max_segment_size, config.max_overlap_size)
    }

    /// Split a segment, copying its metadata and adding an `index` key
    pub fn split(&self, segment: &TextSegment) -> Vec<TextSegment> {
        self.split_text(&segment.text)
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let mut part = TextSegment::new(text);
                part.metadata = segment.metadata.clone();
                part.metadata.insert("index".to_string(), i.to_string());
                part
            })
            .collect()
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_level(text, Level::Paragraph)
    }

    fn split_level(&self, text: &str, level: Level) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        if char_len(text) <= self.max_segment_size {
            return vec![text.to_string()];
        }
        if level == Level::Char {
            return self.split_chars(text);
        }

        let parts = level.separate(text);
        if parts.len() <= 1 {
            return self.split_level(text, level.next());
        }

        let mut pieces = Vec::with_capacity(parts.len());
        for part in parts {
            if char_len(&part) <= self.max_segment_size {
                pieces.push(part);
            } else {
                pieces.extend(self.split_level(&part, level.next()));
            }
        }
        self.merge(pieces, level.joiner())
    }

    fn split_chars(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = self.max_segment_size - self.max_overlap_size;
        let mut out = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.max_segment_size).min(chars.len());
            out.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        out
    }

    fn merge(&self, pieces: Vec<String>, joiner: &str) -> Vec<String> {
        let joined_len = |parts: &[String], extra: &str| -> usize {
            let mut len = parts.iter().map(|p| char_len(p)).sum::<usize>();
            len += char_len(joiner) * parts.len();
            len + char_len(extra)
        };

        let mut segments = Vec::new();
        let mut current: Vec<String> = Vec::new();

        for piece in pieces {
            if !current.is_empty() && joined_len(&current, &piece) > self.max_segment_size {
                segments.push(current.join(joiner));
                current = self.overlap_tail(&current, joiner);
                while !current.is_empty() && joined_len(&current, &piece) > self.max_segment_size
                {
                    current.remove(0);
                }
            }
            current.push(piece);
        }
        if !current.is_empty() {
            segments.push(current.join(joiner));
        }
        segments
    }

    /// Trailing parts that fit in the overlap budget
    fn overlap_tail(&self, parts: &[String], joiner: &str) -> Vec<String> {
        let mut tail = Vec::new();
        let mut len = 0;
        for part in parts.iter().rev() {
            let added = char_len(part) + if tail.is_empty() { 0 } else { char_len(joiner) };
            if len + added > self.max_overlap_size || tail.len() + 1 == parts.len() {
                break;
            }
            len += added;
            tail.push(part.clone());
        }
        tail.reverse();
        tail
    }
}

impl Default for DocumentSplitter {
    fn default() -> Self {
        Self::new(300, 30)
    }
}
