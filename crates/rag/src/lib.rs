//! Retrieval-augmented generation pipeline
//!
//! Features:
//! - Dense vector search via Qdrant with named dense/sparse vectors
//! - Server-side hybrid fusion (RRF or DBSF) over dense + sparse prefetch
//! - Redis embedding cache (L4) with batch operations
//! - Query classification and expansion (HyDE, rule rewrites)
//! - Two-stage reranking: cross-encoder pass + LLM fine pass
//! - Adaptive retriever orchestrating transform, search, fusion, rerank

pub mod classify;
pub mod embedding_cache;
pub mod embeddings;
pub mod rerank;
pub mod retriever;
pub mod sparse;
pub mod transform;
pub mod vector_store;

pub use classify::QueryClassifier;
pub use embedding_cache::{CachedEmbedder, EmbeddingCache, EmbeddingCacheStats};
pub use embeddings::{Embedder, HttpEmbedder};
pub use rerank::{
    parse_llm_score, CrossEncoder, FineScorer, HybridReranker, LexicalScorer, LlmJudge,
    RerankedDocument,
};
#[cfg(feature = "onnx")]
pub use rerank::OnnxCrossEncoder;
pub use retriever::{AdaptiveRetriever, RetrieverConfig};
pub use sparse::{SparseEncoder, SparseQueryVector};
pub use transform::{QueryTransformer, TransformOutput};
pub use vector_store::{FusionMethod, QdrantStore, ScoredDocument, SearchBackend, SearchFilter};

use thiserror::Error;

/// RAG errors
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding model mismatch: expected dimension {expected}, got {actual}")]
    ModelMismatch { expected: usize, actual: usize },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid filter: {0}")]
    FilterInvalid(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Reranker error: {0}")]
    Reranker(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<RagError> for policy_qa_core::Error {
    fn from(err: RagError) -> Self {
        match err {
            RagError::EmbeddingUnavailable(m) | RagError::Embedding(m) => {
                policy_qa_core::Error::Embedding(m)
            }
            RagError::ModelMismatch { expected, actual } => policy_qa_core::Error::Config(
                format!("embedding dimension mismatch: {} vs {}", expected, actual),
            ),
            other => policy_qa_core::Error::VectorStore(other.to_string()),
        }
    }
}
