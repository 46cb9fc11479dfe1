//! Centralized defaults
//!
//! Single source of truth for tunables referenced from more than one
//! place (settings defaults, component config conversions, tests).

/// Retrieval defaults
pub mod retrieval {
    /// Candidate count from the initial search
    pub const INITIAL_K: usize = 100;
    /// Survivors kept after cross-variant fusion
    pub const RERANK_K: usize = 30;
    /// Documents returned to the generator
    pub const FINAL_K: usize = 8;
    /// Weight of dense scores in hybrid fusion
    pub const DENSE_WEIGHT: f32 = 0.5;
    /// Weight of sparse scores in hybrid fusion
    pub const SPARSE_WEIGHT: f32 = 0.5;
    /// RRF rank constant
    pub const RRF_K: f32 = 60.0;
    /// Query variants generated for multi-query fusion
    pub const MULTI_QUERY_VARIANTS: usize = 4;
    /// Dense prefetch size for server-side hybrid fusion
    pub const DENSE_PREFETCH: usize = 100;
    /// Sparse prefetch size for server-side hybrid fusion
    pub const SPARSE_PREFETCH: usize = 100;
}

/// Reranking defaults
pub mod rerank {
    /// Documents scored by the fine pass
    pub const LLM_RERANK_TOP_N: usize = 3;
    /// Weight of the cross-encoder score in hybrid fusion
    pub const HYBRID_ALPHA: f32 = 0.7;
    /// Neutral fallback when an LLM score cannot be parsed (1-10 scale)
    pub const NEUTRAL_SCORE: f32 = 5.0;
}

/// Result cache defaults
pub mod cache {
    /// TTL for exact and normalized entries, seconds
    pub const TTL_EXACT_SECS: u64 = 3600;
    /// TTL for semantic entries, seconds
    pub const TTL_SEMANTIC_SECS: u64 = 600;
    /// Minimum cosine similarity for a semantic candidate
    pub const SEMANTIC_THRESHOLD: f32 = 0.98;
    /// Minimum Jaccard doc-id overlap to validate a semantic candidate
    pub const OVERLAP_THRESHOLD: f32 = 0.80;
    /// Maximum semantic candidates examined per lookup
    pub const SEMANTIC_CANDIDATES_MAX: usize = 3;
    /// TTL for cached embeddings, seconds (7 days)
    pub const EMBEDDING_TTL_SECS: u64 = 86_400 * 7;
}

/// Prefetch defaults
pub mod prefetch {
    /// Maximum concurrent prefetch executions
    pub const MAX_CONCURRENT: usize = 3;
    /// Recent queries analyzed for prediction
    pub const WINDOW_SIZE: usize = 10;
    /// Bound on each priority queue
    pub const QUEUE_CAPACITY: usize = 32;
    /// Confidence floor for HIGH priority
    pub const HIGH_CONFIDENCE: f32 = 0.7;
    /// Confidence floor for MEDIUM priority
    pub const MEDIUM_CONFIDENCE: f32 = 0.4;
}

/// Service endpoints
pub mod endpoints {
    pub const QDRANT_DEFAULT: &str = "http://localhost:6334";
    pub const REDIS_DEFAULT: &str = "redis://localhost:6379";
    pub const LLAMA_SERVER_DEFAULT: &str = "http://localhost:8080";
    pub const EMBEDDING_DEFAULT: &str = "http://localhost:11434";
}
