//! Document type
//!
//! Immutable passages produced by the ingestion pipeline. Identity is
//! the `id` field, stable across re-indexing when the content hash
//! matches.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A retrievable passage with metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique ID
    pub id: String,
    /// Passage text
    pub content: String,
    /// Source metadata (file_name, page_number, chunk_index, file_hash, ...)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    /// Builder-style metadata insertion
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Source file name, if the ingestion pipeline recorded one
    pub fn file_name(&self) -> &str {
        self.metadata
            .get("file_name")
            .map(String::as_str)
            .unwrap_or("Unknown")
    }

    /// Excerpt of the content, truncated on a char boundary
    pub fn excerpt(&self, max_chars: usize) -> String {
        if self.content.chars().count() <= max_chars {
            return self.content.clone();
        }
        let truncated: String = self.content.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_meta() {
        let doc = Document::new("d1", "text").with_meta("file_name", "dafi36-2903.pdf");
        assert_eq!(doc.file_name(), "dafi36-2903.pdf");
    }

    #[test]
    fn test_excerpt_truncation() {
        let doc = Document::new("d1", "abcdef");
        assert_eq!(doc.excerpt(3), "abc...");
        assert_eq!(doc.excerpt(10), "abcdef");
    }

    #[test]
    fn test_excerpt_multibyte() {
        let doc = Document::new("d1", "ααββγγ");
        // Must not split inside a multi-byte char
        assert_eq!(doc.excerpt(2), "αα...");
    }
}
