//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::{cache, endpoints, prefetch, rerank, retrieval};
use crate::ConfigError;

/// Rerank preset options for performance/quality tradeoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RerankPreset {
    /// 2 documents - fastest
    Quick,
    /// 3 documents - balanced
    #[default]
    Quality,
    /// 5 documents - highest quality
    Deep,
}

impl RerankPreset {
    /// Fine-pass document count for this preset
    pub fn rerank_count(&self) -> usize {
        match self {
            RerankPreset::Quick => 2,
            RerankPreset::Quality => 3,
            RerankPreset::Deep => 5,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub rerank: RerankConfig,

    #[serde(default)]
    pub transform: TransformConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub prefetch: PrefetchConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins; empty means localhost only
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7860
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            cors_enabled: true,
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidate count from the initial search
    #[serde(default = "default_initial_k")]
    pub initial_k: usize,
    /// Survivors kept after cross-variant fusion
    #[serde(default = "default_rerank_k")]
    pub rerank_k: usize,
    /// Documents returned to the generator
    #[serde(default = "default_final_k")]
    pub final_k: usize,
    /// Enable multi-query fusion for vague queries
    #[serde(default = "default_true")]
    pub use_multi_query: bool,
    /// Query variants generated for multi-query fusion
    #[serde(default = "default_multi_query_variants")]
    pub multi_query_variants: usize,
    /// Enable the reranking stage
    #[serde(default = "default_true")]
    pub use_reranking: bool,
    /// Cross-encoder model identifier (onnx feature)
    #[serde(default = "default_cross_encoder_model")]
    pub cross_encoder_model: String,
    /// Weight of dense scores in hybrid fusion (0.0 - 1.0)
    #[serde(default = "default_dense_weight")]
    pub dense_weight: f32,
    /// Weight of sparse scores in hybrid fusion (0.0 - 1.0)
    #[serde(default = "default_sparse_weight")]
    pub sparse_weight: f32,
    /// RRF rank constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,
    /// Dense prefetch size for server-side hybrid fusion
    #[serde(default = "default_dense_prefetch")]
    pub dense_prefetch: usize,
    /// Sparse prefetch size for server-side hybrid fusion
    #[serde(default = "default_sparse_prefetch")]
    pub sparse_prefetch: usize,
}

fn default_initial_k() -> usize {
    retrieval::INITIAL_K
}
fn default_rerank_k() -> usize {
    retrieval::RERANK_K
}
fn default_final_k() -> usize {
    retrieval::FINAL_K
}
fn default_multi_query_variants() -> usize {
    retrieval::MULTI_QUERY_VARIANTS
}
fn default_cross_encoder_model() -> String {
    "cross-encoder/ms-marco-MiniLM-L-12-v2".to_string()
}
fn default_dense_weight() -> f32 {
    retrieval::DENSE_WEIGHT
}
fn default_sparse_weight() -> f32 {
    retrieval::SPARSE_WEIGHT
}
fn default_rrf_k() -> f32 {
    retrieval::RRF_K
}
fn default_dense_prefetch() -> usize {
    retrieval::DENSE_PREFETCH
}
fn default_sparse_prefetch() -> usize {
    retrieval::SPARSE_PREFETCH
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            initial_k: default_initial_k(),
            rerank_k: default_rerank_k(),
            final_k: default_final_k(),
            use_multi_query: true,
            multi_query_variants: default_multi_query_variants(),
            use_reranking: true,
            cross_encoder_model: default_cross_encoder_model(),
            dense_weight: default_dense_weight(),
            sparse_weight: default_sparse_weight(),
            rrf_k: default_rrf_k(),
            dense_prefetch: default_dense_prefetch(),
            sparse_prefetch: default_sparse_prefetch(),
        }
    }
}

/// Reranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    /// Enable the LLM fine pass
    #[serde(default = "default_true")]
    pub enable_llm_reranking: bool,
    /// Base fine-pass document count (presets and classification adapt it)
    #[serde(default = "default_llm_rerank_top_n")]
    pub llm_rerank_top_n: usize,
    /// Preset overriding the fine-pass count
    #[serde(default)]
    pub preset: RerankPreset,
    /// Weight of the cross-encoder score in hybrid fusion (0.0 - 1.0)
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f32,
    /// Prefer a dedicated neural reranker when available
    #[serde(default)]
    pub enable_neural_reranker: bool,
}

fn default_llm_rerank_top_n() -> usize {
    rerank::LLM_RERANK_TOP_N
}
fn default_hybrid_alpha() -> f32 {
    rerank::HYBRID_ALPHA
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enable_llm_reranking: true,
            llm_rerank_top_n: default_llm_rerank_top_n(),
            preset: RerankPreset::Quality,
            hybrid_alpha: default_hybrid_alpha(),
            enable_neural_reranker: false,
        }
    }
}

impl RerankConfig {
    /// Effective fine-pass count after applying the preset
    pub fn effective_top_n(&self) -> usize {
        self.preset.rerank_count()
    }
}

/// Query transformation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Enable hypothetical-document expansion
    #[serde(default = "default_true")]
    pub enable_hyde: bool,
    /// Enable rule-based query rewrites
    #[serde(default = "default_true")]
    pub enable_multiquery_rewrite: bool,
    /// Enable query classification
    #[serde(default = "default_true")]
    pub enable_classification: bool,
    /// LLM temperature for HyDE passages
    #[serde(default = "default_hyde_temperature")]
    pub hyde_temperature: f32,
    /// LLM temperature for generative rewrites
    #[serde(default = "default_rewrite_temperature")]
    pub rewrite_temperature: f32,
}

fn default_hyde_temperature() -> f32 {
    0.3
}
fn default_rewrite_temperature() -> f32 {
    0.5
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            enable_hyde: true,
            enable_multiquery_rewrite: true,
            enable_classification: true,
            hyde_temperature: default_hyde_temperature(),
            rewrite_temperature: default_rewrite_temperature(),
        }
    }
}

/// Cache configuration (result cache L1-L3 and embedding cache L4)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the caches; disabled means every lookup is a miss
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// TTL for exact and normalized answer entries, seconds
    #[serde(default = "default_ttl_exact")]
    pub ttl_exact: u64,
    /// TTL for semantic answer entries, seconds
    #[serde(default = "default_ttl_semantic")]
    pub ttl_semantic: u64,
    /// Minimum cosine similarity for a semantic candidate
    #[serde(default = "default_semantic_threshold")]
    pub semantic_threshold: f32,
    /// Minimum Jaccard doc-id overlap to validate a semantic candidate
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f32,
    /// Maximum semantic candidates examined per lookup
    #[serde(default = "default_semantic_candidates_max")]
    pub semantic_candidates_max: usize,
    /// TTL for cached embeddings, seconds
    #[serde(default = "default_embedding_ttl")]
    pub embedding_ttl: u64,
}

fn default_redis_url() -> String {
    endpoints::REDIS_DEFAULT.to_string()
}
fn default_ttl_exact() -> u64 {
    cache::TTL_EXACT_SECS
}
fn default_ttl_semantic() -> u64 {
    cache::TTL_SEMANTIC_SECS
}
fn default_semantic_threshold() -> f32 {
    cache::SEMANTIC_THRESHOLD
}
fn default_overlap_threshold() -> f32 {
    cache::OVERLAP_THRESHOLD
}
fn default_semantic_candidates_max() -> usize {
    cache::SEMANTIC_CANDIDATES_MAX
}
fn default_embedding_ttl() -> u64 {
    cache::EMBEDDING_TTL_SECS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: default_redis_url(),
            ttl_exact: default_ttl_exact(),
            ttl_semantic: default_ttl_semantic(),
            semantic_threshold: default_semantic_threshold(),
            overlap_threshold: default_overlap_threshold(),
            semantic_candidates_max: default_semantic_candidates_max(),
            embedding_ttl: default_embedding_ttl(),
        }
    }
}

/// Prefetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum concurrent prefetch executions
    #[serde(default = "default_prefetch_concurrent")]
    pub max_concurrent: usize,
    /// Recent queries analyzed for prediction
    #[serde(default = "default_prefetch_window")]
    pub window_size: usize,
    /// Bound on each priority queue
    #[serde(default = "default_prefetch_queue")]
    pub queue_capacity: usize,
}

fn default_prefetch_concurrent() -> usize {
    prefetch::MAX_CONCURRENT
}
fn default_prefetch_window() -> usize {
    prefetch::WINDOW_SIZE
}
fn default_prefetch_queue() -> usize {
    prefetch::QUEUE_CAPACITY
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent: default_prefetch_concurrent(),
            window_size: default_prefetch_window(),
            queue_capacity: default_prefetch_queue(),
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// llama.cpp server endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    /// Model artifact path (informational; the server loads it)
    #[serde(default = "default_model_path")]
    pub model_path: String,
    /// Optional draft model for speculative decoding
    #[serde(default)]
    pub draft_model_path: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Context window size
    #[serde(default = "default_context_size")]
    pub context_size: usize,
    /// GPU layers offloaded by the runtime
    #[serde(default = "default_gpu_layers")]
    pub n_gpu_layers: usize,
    /// Pending requests beyond the in-flight one before fast-failing busy
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Per-request generation timeout, seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Keep the engine KV cache warm between requests.
    /// Preserved trades minor context bleed for large warm-start savings.
    #[serde(default = "default_true")]
    pub preserve_kv_cache: bool,
}

fn default_llm_endpoint() -> String {
    endpoints::LLAMA_SERVER_DEFAULT.to_string()
}
fn default_model_path() -> String {
    "./models/llama-3.1-8b-instruct.Q5_K_M.gguf".to_string()
}
fn default_top_p() -> f32 {
    0.9
}
fn default_top_k() -> u32 {
    40
}
fn default_max_tokens() -> usize {
    2048
}
fn default_context_size() -> usize {
    8192
}
fn default_gpu_layers() -> usize {
    33
}
fn default_queue_depth() -> usize {
    16
}
fn default_llm_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model_path: default_model_path(),
            draft_model_path: None,
            temperature: 0.0,
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_tokens: default_max_tokens(),
            context_size: default_context_size(),
            n_gpu_layers: default_gpu_layers(),
            queue_depth: default_queue_depth(),
            timeout_secs: default_llm_timeout(),
            preserve_kv_cache: true,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_embedding_model")]
    pub model_name: String,
    /// Vector dimension; must match the vector store collection
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// L2-normalize vectors after embedding
    #[serde(default = "default_true")]
    pub normalize: bool,
}

fn default_embedding_endpoint() -> String {
    endpoints::EMBEDDING_DEFAULT.to_string()
}
fn default_embedding_model() -> String {
    "bge-large-en-v1.5".to_string()
}
fn default_dimension() -> usize {
    1024
}
fn default_batch_size() -> usize {
    64
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            model_name: default_embedding_model(),
            dimension: default_dimension(),
            batch_size: default_batch_size(),
            normalize: true,
        }
    }
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_qdrant_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_qdrant_endpoint() -> String {
    endpoints::QDRANT_DEFAULT.to_string()
}
fn default_collection() -> String {
    "policy_documents".to_string()
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: default_qdrant_endpoint(),
            collection: default_collection(),
            api_key: None,
        }
    }
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from a TOML file plus `POLICY_QA__*` env overrides.
    ///
    /// The env separator is `__`, e.g. `POLICY_QA__RETRIEVAL__FINAL_K=5`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        } else {
            builder = builder.add_source(File::with_name("config/default").required(false));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("POLICY_QA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings ranges and cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_retrieval()?;
        self.validate_rerank()?;
        self.validate_cache()?;
        self.validate_transform()?;
        Ok(())
    }

    fn validate_retrieval(&self) -> Result<(), ConfigError> {
        let r = &self.retrieval;

        if !(0.0..=1.0).contains(&r.dense_weight) {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.dense_weight".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", r.dense_weight),
            });
        }

        if !(0.0..=1.0).contains(&r.sparse_weight) {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.sparse_weight".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", r.sparse_weight),
            });
        }

        if r.rrf_k <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.rrf_k".to_string(),
                message: format!("Must be positive, got {}", r.rrf_k),
            });
        }

        if r.final_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.final_k".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if r.final_k > r.rerank_k {
            tracing::warn!(
                "retrieval.final_k ({}) exceeds rerank_k ({}), results limited by fusion",
                r.final_k,
                r.rerank_k
            );
        }

        if r.multi_query_variants == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.multi_query_variants".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    fn validate_rerank(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.rerank.hybrid_alpha) {
            return Err(ConfigError::InvalidValue {
                field: "rerank.hybrid_alpha".to_string(),
                message: format!(
                    "Must be between 0.0 and 1.0, got {}",
                    self.rerank.hybrid_alpha
                ),
            });
        }
        Ok(())
    }

    fn validate_cache(&self) -> Result<(), ConfigError> {
        let c = &self.cache;

        // A loose semantic threshold returns wrong answers for near-synonyms
        if !(0.95..=1.0).contains(&c.semantic_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "cache.semantic_threshold".to_string(),
                message: format!("Must be between 0.95 and 1.0, got {}", c.semantic_threshold),
            });
        }

        if !(0.0..=1.0).contains(&c.overlap_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "cache.overlap_threshold".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", c.overlap_threshold),
            });
        }

        if c.semantic_candidates_max == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.semantic_candidates_max".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    fn validate_transform(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.transform.hyde_temperature) {
            return Err(ConfigError::InvalidValue {
                field: "transform.hyde_temperature".to_string(),
                message: format!(
                    "Must be between 0.0 and 2.0, got {}",
                    self.transform.hyde_temperature
                ),
            });
        }
        Ok(())
    }
}
