//! Retrieval results
//!
//! Ordered document lists with parallel scores, plus the strategy label
//! describing how the list was produced.

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::query::QueryClass;
use crate::timing::TimingBreakdown;

/// Strategy used to produce a retrieval result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Direct dense search, no transformation (simple mode)
    SimpleDense,
    /// One adaptive query, one hybrid/dense search
    Single,
    /// Multiple query variants fused with RRF
    MultiQuery,
    /// Retrieval against the hypothetical-document expansion only
    HydeSingle,
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::SimpleDense => "simple_dense",
            RetrievalStrategy::Single => "single",
            RetrievalStrategy::MultiQuery => "multi_query",
            RetrievalStrategy::HydeSingle => "hyde_single",
        }
    }
}

/// Result of a retrieval call
///
/// `scores` is parallel to `documents` and non-increasing; scores are
/// comparable only within one result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub documents: Vec<Document>,
    pub scores: Vec<f32>,
    pub strategy: RetrievalStrategy,
    pub query_type: Option<QueryClass>,
    /// Number of query variants that contributed (multi-query only)
    #[serde(default)]
    pub variant_count: usize,
    /// Per-stage timings collected during retrieval
    #[serde(default)]
    pub timings: TimingBreakdown,
}

impl RetrievalResult {
    pub fn empty(strategy: RetrievalStrategy, query_type: Option<QueryClass>) -> Self {
        Self {
            documents: Vec::new(),
            scores: Vec::new(),
            strategy,
            query_type,
            variant_count: 0,
            timings: TimingBreakdown::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// IDs of the retrieved documents, in rank order
    pub fn doc_ids(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result() {
        let result = RetrievalResult::empty(RetrievalStrategy::Single, None);
        assert!(result.is_empty());
        assert!(result.doc_ids().is_empty());
    }

    #[test]
    fn test_strategy_labels() {
        assert_eq!(RetrievalStrategy::MultiQuery.as_str(), "multi_query");
        assert_eq!(RetrievalStrategy::SimpleDense.as_str(), "simple_dense");
    }
}
