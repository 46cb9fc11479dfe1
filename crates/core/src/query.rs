//! Query normalization, hashing and classification
//!
//! The normalized form backs the L2 cache layer: near-paraphrases that
//! differ only in case, whitespace, punctuation or articles collapse to
//! the same key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Retrieval mode requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Single dense search, no transformation
    Simple,
    /// Full adaptive pipeline (transform, hybrid search, rerank)
    #[default]
    Adaptive,
}

/// Query classification
///
/// Produced by the rule/LLM classifier, consumed by the reranker, the
/// retriever strategy selection and the prefetcher templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    Clarification,
    Elaboration,
    Example,
    Comparison,
    Procedure,
    Definition,
    FollowUp,
    NewTopic,
    Factual,
    Complex,
}

impl QueryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryClass::Clarification => "clarification",
            QueryClass::Elaboration => "elaboration",
            QueryClass::Example => "example",
            QueryClass::Comparison => "comparison",
            QueryClass::Procedure => "procedure",
            QueryClass::Definition => "definition",
            QueryClass::FollowUp => "follow_up",
            QueryClass::NewTopic => "new_topic",
            QueryClass::Factual => "factual",
            QueryClass::Complex => "complex",
        }
    }
}

/// Normalize a query to its canonical form.
///
/// Transformations, in order:
/// - lowercase and trim
/// - strip punctuation except `?`
/// - collapse whitespace runs
/// - drop the articles `a`, `an`, `the`
pub fn normalize_query(query: &str) -> String {
    let lowered = query.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || c == '?' {
                c
            } else {
                ' '
            }
        })
        .collect();

    stripped
        .split_whitespace()
        .filter(|w| !matches!(*w, "a" | "an" | "the"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 hex digest of a text, used for all cache keys
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
