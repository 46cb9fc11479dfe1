//! Query engine
//!
//! Features:
//! - Grounded answer generation with bracketed citations
//! - Multi-stage result cache (exact, normalized, overlap-validated
//!   semantic) backed by Redis
//! - Predictive query prefetcher warming the embedding cache
//! - Bounded per-conversation memory with context augmentation
//! - Top-level `RagEngine` orchestrating the request pipeline with
//!   streaming events

pub mod engine;
pub mod generator;
pub mod memory;
pub mod prefetch;
pub mod result_cache;

pub use engine::{EngineComponents, QueryEvent, QueryRequest, RagEngine};
pub use generator::{AnswerGenerator, GeneratedAnswer};
pub use memory::{ConversationEntry, ConversationMemory};
pub use prefetch::{PrefetchMetricsSnapshot, PrefetchPriority, QueryPrefetcher};
pub use result_cache::{cosine_similarity, jaccard_overlap, ResultCache, ResultCacheStats};

use thiserror::Error;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Not initialized: {0}")]
    NotInitialized(String),
}

impl From<EngineError> for policy_qa_core::Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Cache(m) => policy_qa_core::Error::Cache(m),
            EngineError::Generation(m) => policy_qa_core::Error::Llm(m),
            EngineError::NotInitialized(m) => policy_qa_core::Error::NotReady(m),
        }
    }
}
