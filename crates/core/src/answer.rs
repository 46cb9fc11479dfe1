//! Answers with citations
//!
//! The user-visible result of a query. Citations always reference
//! documents from the retrieval result of the same call.

use serde::{Deserialize, Serialize};

use crate::query::{QueryClass, QueryMode};
use crate::timing::TimingBreakdown;

/// A citation into the retrieved context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    /// ID of the cited document
    pub document_id: String,
    /// Short excerpt of the cited passage
    pub excerpt: String,
    /// Relevance score of the document in this call
    pub relevance: f32,
}

/// Metadata attached to every answer
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnswerMetadata {
    /// Strategy label of the retrieval that produced this answer
    pub strategy: Option<String>,
    /// Query classification
    pub query_type: Option<QueryClass>,
    /// Requested mode
    pub mode: Option<QueryMode>,
    /// Whether a cache layer served this answer
    pub cache_hit: bool,
    /// Which cache layer hit ("exact", "normalized", "semantic")
    pub cache_layer: Option<String>,
    /// Total processing time in milliseconds
    pub processing_time_ms: f64,
    /// Per-stage timing breakdown
    pub timing_breakdown: TimingBreakdown,
    /// Short error kind tag when `error == true`
    pub error_kind: Option<String>,
}

/// A grounded answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// Answer text (plain explanation when `error == true`)
    pub text: String,
    /// Ordered citations; empty on refusal or error
    pub citations: Vec<Citation>,
    pub metadata: AnswerMetadata,
    pub error: bool,
}

impl Answer {
    /// Successful answer with citations
    pub fn ok(text: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self {
            text: text.into(),
            citations,
            metadata: AnswerMetadata::default(),
            error: false,
        }
    }

    /// Error answer with a short kind tag and plain-text explanation
    pub fn error(text: impl Into<String>, kind: &str) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
            metadata: AnswerMetadata {
                error_kind: Some(kind.to_string()),
                ..AnswerMetadata::default()
            },
            error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_answer_has_no_citations() {
        let answer = Answer::error("something went wrong", "llm");
        assert!(answer.error);
        assert!(answer.citations.is_empty());
        assert_eq!(answer.metadata.error_kind.as_deref(), Some("llm"));
    }

    #[test]
    fn test_answer_serializes() {
        let answer = Answer::ok(
            "Beards require a shaving waiver [1].",
            vec![Citation {
                document_id: "d1".into(),
                excerpt: "waiver".into(),
                relevance: 0.9,
            }],
        );
        let json = serde_json::to_string(&answer).unwrap();
        assert!(json.contains("document_id"));
        assert!(json.contains("\"error\":false"));
    }
}
