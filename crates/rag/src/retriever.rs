//! Adaptive retriever
//!
//! Orchestrates the retrieval half of the pipeline: query
//! transformation, cache-first embedding, hybrid (or dense) search per
//! variant, reciprocal rank fusion across variants, then two-stage
//! reranking down to the final set.

use std::collections::HashMap;
use std::sync::Arc;

use policy_qa_config::constants::retrieval as defaults;
use policy_qa_config::RetrievalConfig;
use policy_qa_core::{Document, RetrievalResult, RetrievalStrategy, StageTimer};

use crate::embeddings::Embedder;
use crate::rerank::{min_max_normalize, HybridReranker};
use crate::transform::QueryTransformer;
use crate::vector_store::{FusionMethod, ScoredDocument, SearchBackend, SearchFilter};
use crate::RagError;

/// Retriever configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Candidate count from the initial search
    pub initial_k: usize,
    /// Survivors kept after cross-variant fusion
    pub rerank_k: usize,
    /// Documents returned
    pub final_k: usize,
    /// RRF rank constant
    pub rrf_k: f32,
    /// Enable multi-query fusion for vague queries
    pub use_multi_query: bool,
    /// Enable the reranking stage
    pub use_reranking: bool,
    /// Fusion method for the store's hybrid search
    pub fusion: FusionMethod,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            initial_k: defaults::INITIAL_K,
            rerank_k: defaults::RERANK_K,
            final_k: defaults::FINAL_K,
            rrf_k: defaults::RRF_K,
            use_multi_query: true,
            use_reranking: true,
            fusion: FusionMethod::Rrf,
        }
    }
}

impl From<&RetrievalConfig> for RetrieverConfig {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            initial_k: config.initial_k,
            rerank_k: config.rerank_k,
            final_k: config.final_k,
            rrf_k: config.rrf_k,
            use_multi_query: config.use_multi_query,
            use_reranking: config.use_reranking,
            fusion: FusionMethod::Rrf,
        }
    }
}

/// Adaptive retrieval engine
pub struct AdaptiveRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn SearchBackend>,
    transformer: Arc<QueryTransformer>,
    reranker: Arc<HybridReranker>,
    config: RetrieverConfig,
}

impl AdaptiveRetriever {
    /// Indicators of vague queries that benefit from multi-query fusion
    const VAGUE_INDICATORS: &'static [&'static str] = &[
        "how",
        "what",
        "when",
        "requirements",
        "policy",
        "rules",
        "must",
        "should",
        "frequency",
        "often",
    ];

    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn SearchBackend>,
        transformer: Arc<QueryTransformer>,
        reranker: Arc<HybridReranker>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            transformer,
            reranker,
            config,
        }
    }

    /// Embed a query through the cache-first embedder.
    ///
    /// Exposed for the prefetcher (cache warming) and the result
    /// cache's semantic layer.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, RagError> {
        self.embedder.embed(text).await
    }

    /// Simple mode: one dense search, no transformation or reranking
    pub async fn retrieve_simple(
        &self,
        query: &str,
        k: usize,
    ) -> Result<RetrievalResult, RagError> {
        let mut timer = StageTimer::start();

        timer.start_stage("retrieval.embedding");
        let vector = self.embedder.embed(query).await?;

        timer.start_stage("retrieval.dense_search");
        let hits = self.store.search_dense(&vector, k, None).await?;
        timer.end_stage();

        let (documents, scores) = split_hits(hits);
        let scores = min_max_normalize(&scores);

        Ok(RetrievalResult {
            documents,
            scores,
            strategy: RetrievalStrategy::SimpleDense,
            query_type: None,
            variant_count: 1,
            timings: timer.breakdown(),
        })
    }

    /// Full adaptive retrieval with the startup configuration
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult, RagError> {
        self.retrieve_with(query, k, &self.config.clone()).await
    }

    /// Full adaptive retrieval against a per-request configuration
    /// snapshot, so mid-request settings changes never mix stages.
    pub async fn retrieve_with(
        &self,
        query: &str,
        k: usize,
        config: &RetrieverConfig,
    ) -> Result<RetrievalResult, RagError> {
        self.retrieve_contextual(query, query, k, config).await
    }

    /// Adaptive retrieval where the retrieval query may be
    /// context-augmented. Classification, strategy selection and
    /// reranking always use the original user query; only the searches
    /// run against the augmented form.
    pub async fn retrieve_contextual(
        &self,
        user_query: &str,
        retrieval_query: &str,
        k: usize,
        config: &RetrieverConfig,
    ) -> Result<RetrievalResult, RagError> {
        let mut timer = StageTimer::start();
        let final_k = if k == 0 { config.final_k } else { k };

        // 1. Transform: classification + variants
        timer.start_stage("retrieval.transform");
        let transform = self.transformer.transform(retrieval_query).await;
        let classification = if user_query != retrieval_query {
            self.transformer.classify_query(user_query).await
        } else {
            transform.classification
        };

        // 2. Pick the strategy from the user query
        let strategy = Self::pick_strategy(
            config,
            user_query,
            transform.variants.len(),
            transform.hyde.is_some(),
        );

        let retrieval_queries: Vec<String> = match strategy {
            RetrievalStrategy::MultiQuery => transform.variants.clone(),
            RetrievalStrategy::HydeSingle => {
                // Retrieval runs against the hypothetical passage; the
                // user query is kept for reranking and generation.
                vec![transform
                    .hyde
                    .clone()
                    .unwrap_or_else(|| retrieval_query.to_string())]
            }
            _ => vec![retrieval_query.to_string()],
        };

        // 3. Search every retrieval query concurrently
        timer.start_stage("retrieval.search");
        let searches = retrieval_queries
            .iter()
            .map(|variant| self.search_one(variant, config));
        let variant_hits: Vec<Vec<ScoredDocument>> =
            futures::future::try_join_all(searches).await?;

        // 4. Fuse across variants
        timer.start_stage("retrieval.fusion");
        let candidates: Vec<(Document, f32)> = if variant_hits.len() > 1 {
            rrf_fuse(&variant_hits, config.rrf_k, config.rerank_k)
        } else {
            variant_hits
                .into_iter()
                .next()
                .unwrap_or_default()
                .into_iter()
                .take(config.rerank_k)
                .map(|hit| (hit.document, hit.score))
                .collect()
        };

        if candidates.is_empty() {
            // Nothing retrieved: skip the reranker entirely
            timer.end_stage();
            let mut result = RetrievalResult::empty(strategy, classification);
            result.timings = timer.breakdown();
            return Ok(result);
        }

        // 5. Rerank down to final_k (against the user query, never a variant)
        let (documents, scores) = if config.use_reranking {
            timer.start_stage("retrieval.rerank");
            let docs: Vec<Document> = candidates.iter().map(|(d, _)| d.clone()).collect();
            let ranked = self.reranker.rerank(user_query, docs, classification).await?;

            let documents: Vec<Document> = ranked
                .iter()
                .take(final_k)
                .map(|r| r.document.clone())
                .collect();
            let scores: Vec<f32> = ranked.iter().take(final_k).map(|r| r.score).collect();
            (documents, scores)
        } else {
            let documents: Vec<Document> = candidates
                .iter()
                .take(final_k)
                .map(|(d, _)| d.clone())
                .collect();
            let scores: Vec<f32> = candidates
                .iter()
                .take(final_k)
                .map(|(_, s)| *s)
                .collect();
            (documents, scores)
        };
        timer.end_stage();

        let scores = min_max_normalize(&scores);
        let variant_count = retrieval_queries.len();

        tracing::debug!(
            strategy = strategy.as_str(),
            variants = variant_count,
            returned = documents.len(),
            "Retrieval complete"
        );

        Ok(RetrievalResult {
            documents,
            scores,
            strategy,
            query_type: classification,
            variant_count,
            timings: timer.breakdown(),
        })
    }

    fn pick_strategy(
        config: &RetrieverConfig,
        query: &str,
        variant_count: usize,
        has_hyde: bool,
    ) -> RetrievalStrategy {
        if config.use_multi_query && variant_count > 1 && Self::is_vague(query) {
            return RetrievalStrategy::MultiQuery;
        }
        if has_hyde {
            return RetrievalStrategy::HydeSingle;
        }
        RetrievalStrategy::Single
    }

    fn is_vague(query: &str) -> bool {
        let lower = query.to_lowercase();
        Self::VAGUE_INDICATORS.iter().any(|w| lower.contains(w))
    }

    /// Embed one retrieval query and run the widest available search
    async fn search_one(
        &self,
        variant: &str,
        config: &RetrieverConfig,
    ) -> Result<Vec<ScoredDocument>, RagError> {
        let vector = self.embedder.embed(variant).await?;
        let filter: Option<&SearchFilter> = None;

        if self.store.supports_hybrid() {
            self.store
                .hybrid_search(&vector, variant, config.initial_k, filter, config.fusion)
                .await
        } else {
            self.store
                .search_dense(&vector, config.initial_k, filter)
                .await
        }
    }
}

fn split_hits(hits: Vec<ScoredDocument>) -> (Vec<Document>, Vec<f32>) {
    let mut documents = Vec::with_capacity(hits.len());
    let mut scores = Vec::with_capacity(hits.len());
    for hit in hits {
        documents.push(hit.document);
        scores.push(hit.score);
    }
    (documents, scores)
}

/// Reciprocal rank fusion across variant result lists.
///
/// Each document scores `Σ 1/(k + rank + 1)` over the lists containing
/// it. Ties break by the lowest best-rank across lists, then by first
/// appearance. Input order of equal-ranked lists does not change the
/// scores (addition commutes).
fn rrf_fuse(
    lists: &[Vec<ScoredDocument>],
    rrf_k: f32,
    top_k: usize,
) -> Vec<(Document, f32)> {
    struct Fused {
        document: Document,
        score: f32,
        best_rank: usize,
        first_seen: usize,
    }

    let mut fused: HashMap<String, Fused> = HashMap::new();
    let mut order = 0usize;

    for list in lists {
        for (rank, hit) in list.iter().enumerate() {
            let contribution = 1.0 / (rrf_k + rank as f32 + 1.0);
            fused
                .entry(hit.document.id.clone())
                .and_modify(|f| {
                    f.score += contribution;
                    f.best_rank = f.best_rank.min(rank);
                })
                .or_insert_with(|| {
                    order += 1;
                    Fused {
                        document: hit.document.clone(),
                        score: contribution,
                        best_rank: rank,
                        first_seen: order,
                    }
                });
        }
    }

    let mut entries: Vec<Fused> = fused.into_values().collect();
    entries.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.best_rank.cmp(&b.best_rank))
            .then(a.first_seen.cmp(&b.first_seen))
    });

    entries
        .into_iter()
        .take(top_k)
        .map(|f| (f.document, f.score))
        .collect()
}
