//! Two-stage reranker
//!
//! Stage 1 scores every (query, document) pair with a cross-encoder;
//! stage 2 refines the top few with a fine scorer (LLM-as-judge, or a
//! dedicated neural reranker implementing the same trait). Final order
//! comes from a weighted fusion of both scores, min-max normalized per
//! call. The reranker is a permutation of its input: it never adds or
//! drops documents, and a fine-pass failure falls back to stage-1
//! order.

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use policy_qa_config::constants::rerank::NEUTRAL_SCORE;
use policy_qa_config::RerankConfig;
use policy_qa_core::{text_hash, Document, QueryClass};
use policy_qa_llm::{GenerationOptions, LlmClient};

use crate::RagError;

#[cfg(feature = "onnx")]
use std::path::Path;

/// Pairwise relevance scorer, deterministic given inputs
pub trait CrossEncoder: Send + Sync {
    /// Score (query, document) pairs; output length equals input length
    fn score_pairs(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>, RagError>;
}

/// Fine-grained second-pass scorer on a 1-10 scale
#[async_trait]
pub trait FineScorer: Send + Sync {
    async fn score(
        &self,
        query: &str,
        documents: &[&str],
        query_type: Option<QueryClass>,
    ) -> Result<Vec<f32>, RagError>;
}

/// Reranked document with its score components
#[derive(Debug, Clone)]
pub struct RerankedDocument {
    pub document: Document,
    /// Fused score used for the final order
    pub score: f32,
    pub cross_score: f32,
    /// Fine-pass score on the 1-10 scale; 0.0 when not scored
    pub fine_score: f32,
}

/// Lexical cross-encoder fallback
///
/// TF-IDF approximation over query terms: sublinear term frequency,
/// word-length IDF proxy, position weighting and a coverage bonus.
/// Used when no model-backed cross-encoder is configured.
pub struct LexicalScorer;

impl LexicalScorer {
    const STOPWORDS: &'static [&'static str] = &[
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has",
        "had", "do", "does", "did", "will", "would", "could", "should", "may", "might", "must",
        "shall", "can", "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into",
        "through", "during", "before", "after", "between", "under", "again", "then", "once",
        "here", "there", "when", "where", "why", "how", "all", "each", "few", "more", "most",
        "other", "some", "such", "no", "nor", "not", "only", "same", "so", "than", "too",
        "very", "just", "and", "but", "if", "or", "because", "until", "while", "about", "i",
        "me", "my", "we", "our", "you", "your", "it", "its", "they", "them", "their", "what",
        "which", "who", "whom", "this", "that", "these", "those",
    ];

    /// Score a single pair in [0, 1]
    pub fn score(query: &str, document: &str) -> f32 {
        let query_lower = query.to_lowercase();
        let doc_lower = document.to_lowercase();

        let stopwords: std::collections::HashSet<&str> = Self::STOPWORDS.iter().copied().collect();

        let query_terms: Vec<&str> = query_lower
            .split_whitespace()
            .filter(|w| w.len() > 1 && !stopwords.contains(*w))
            .collect();

        if query_terms.is_empty() {
            return 0.0;
        }

        let doc_words: Vec<&str> = doc_lower.split_whitespace().collect();
        let doc_len = doc_words.len().max(1) as f32;

        let mut total_score = 0.0f32;
        let mut matched_terms = 0usize;

        for (pos, term) in query_terms.iter().enumerate() {
            let tf = doc_words.iter().filter(|w| **w == *term).count() as f32;

            if tf > 0.0 {
                matched_terms += 1;

                let tf_score = tf.sqrt();
                let idf_approx = (1.0 + term.len() as f32).ln();
                let position_weight = 1.0 / (1.0 + pos as f32 * 0.1);
                let length_norm = 1.0 / (1.0 + (doc_len / 50.0).sqrt());

                total_score += tf_score * idf_approx * position_weight * length_norm;
            }
        }

        let coverage = matched_terms as f32 / query_terms.len() as f32;
        let raw_score = total_score + coverage * 0.3;
        (raw_score / (raw_score + 1.0)).min(1.0)
    }
}

impl CrossEncoder for LexicalScorer {
    fn score_pairs(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>, RagError> {
        Ok(documents
            .iter()
            .map(|doc| Self::score(query, doc))
            .collect())
    }
}

/// ONNX cross-encoder (feature `onnx`)
///
/// Jointly encodes (query, document) and returns the relevant-class
/// probability from the model logits.
#[cfg(feature = "onnx")]
pub struct OnnxCrossEncoder {
    session: ort::session::Session,
    tokenizer: tokenizers::Tokenizer,
    max_seq_len: usize,
}

#[cfg(feature = "onnx")]
impl OnnxCrossEncoder {
    pub fn new(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        max_seq_len: usize,
    ) -> Result<Self, RagError> {
        use ort::session::builder::GraphOptimizationLevel;

        let session = ort::session::Session::builder()
            .map_err(|e| RagError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RagError::Model(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e| RagError::Model(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| RagError::Model(e.to_string()))?;

        let tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path)
            .map_err(|e| RagError::Model(e.to_string()))?;

        Ok(Self {
            session,
            tokenizer,
            max_seq_len,
        })
    }

    fn score_pair(&self, query: &str, document: &str) -> Result<f32, RagError> {
        use ndarray::Array2;
        use ort::value::Tensor;

        let encoding = self
            .tokenizer
            .encode((query, document), true)
            .map_err(|e| RagError::Reranker(e.to_string()))?;

        let ids: Vec<i64> = encoding
            .get_ids()
            .iter()
            .take(self.max_seq_len)
            .map(|&id| id as i64)
            .collect();
        let attention: Vec<i64> = vec![1i64; ids.len()];

        let mut padded_ids = vec![0i64; self.max_seq_len];
        let mut padded_mask = vec![0i64; self.max_seq_len];
        padded_ids[..ids.len()].copy_from_slice(&ids);
        padded_mask[..attention.len()].copy_from_slice(&attention);

        let input_ids = Array2::from_shape_vec((1, self.max_seq_len), padded_ids)
            .map_err(|e| RagError::Reranker(e.to_string()))?;
        let attention_mask = Array2::from_shape_vec((1, self.max_seq_len), padded_mask)
            .map_err(|e| RagError::Reranker(e.to_string()))?;

        let input_ids_tensor =
            Tensor::from_array(input_ids).map_err(|e| RagError::Model(e.to_string()))?;
        let attention_tensor =
            Tensor::from_array(attention_mask).map_err(|e| RagError::Model(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_tensor,
            ])
            .map_err(|e| RagError::Model(e.to_string()))?;

        let (_shape, logits) = outputs
            .get("logits")
            .ok_or_else(|| RagError::Model("missing logits output".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| RagError::Model(e.to_string()))?;

        Ok(relevance_from_logits(logits))
    }
}

#[cfg(feature = "onnx")]
impl CrossEncoder for OnnxCrossEncoder {
    fn score_pairs(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>, RagError> {
        documents
            .iter()
            .map(|doc| self.score_pair(query, doc))
            .collect()
    }
}

/// Softmax relevant-class probability from raw logits
#[cfg(feature = "onnx")]
fn relevance_from_logits(logits: &[f32]) -> f32 {
    if logits.len() >= 2 {
        let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exp_sum: f32 = logits.iter().map(|&x| (x - max).exp()).sum();
        (logits[1] - max).exp() / exp_sum
    } else if logits.len() == 1 {
        1.0 / (1.0 + (-logits[0]).exp())
    } else {
        0.0
    }
}

static FIRST_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("valid regex"));
static LABELED_SCORE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:score|rating|relevance)[:\s]+(\d+(?:\.\d+)?)").expect("valid regex")
});

/// Parse a relevance score out of LLM text.
///
/// Strategies, in order: direct numeric parse; first number in the
/// response (scaled down when the model answered out of 100); an
/// explicit `score: X` label. Unparseable responses get the neutral
/// score so one malformed reply cannot sink a document.
pub fn parse_llm_score(response: &str) -> f32 {
    let cleaned = response.trim();

    if let Ok(score) = cleaned.parse::<f32>() {
        return score.clamp(1.0, 10.0);
    }

    if let Some(captures) = FIRST_NUMBER.captures(cleaned) {
        if let Ok(mut score) = captures[1].parse::<f32>() {
            if score > 10.0 {
                score /= 10.0;
            }
            return score.clamp(1.0, 10.0);
        }
    }

    if let Some(captures) = LABELED_SCORE.captures(cleaned) {
        if let Ok(score) = captures[1].parse::<f32>() {
            return score.clamp(1.0, 10.0);
        }
    }

    tracing::warn!(
        response = %truncate_chars(cleaned, 80),
        "Could not parse LLM relevance score, using neutral"
    );
    NEUTRAL_SCORE
}

/// Truncate on a char boundary
fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// LLM-as-judge fine scorer
///
/// Scores are cached per (query, document) content hash; 2-5 documents
/// are scored in one batched call instead of parallel per-document
/// calls.
pub struct LlmJudge {
    llm: LlmClient,
    score_cache: DashMap<String, f32>,
}

impl LlmJudge {
    pub fn new(llm: LlmClient) -> Self {
        Self {
            llm,
            score_cache: DashMap::new(),
        }
    }

    fn cache_key(query: &str, document: &str) -> String {
        text_hash(&format!(
            "{}|{}",
            truncate_chars(query, 100),
            truncate_chars(document, 500)
        ))
    }

    async fn score_one(
        &self,
        query: &str,
        document: &str,
        query_type: Option<QueryClass>,
    ) -> f32 {
        let key = Self::cache_key(query, document);
        if let Some(cached) = self.score_cache.get(&key) {
            return *cached;
        }

        let prompt = format!(
            "You are an expert at evaluating the relevance of policy documents to user \
             questions.\n\n\
             Query Type: {}\n\
             User Question: {}\n\n\
             Document Content:\n{}\n\n\
             On a scale of 1-10, rate how relevant this document is to answering the \
             user's question. Consider:\n\
             - Does it contain the specific information needed?\n\
             - Are the regulatory details, timeframes, or procedures directly applicable?\n\
             - Is it the primary source or just contextual?\n\n\
             CRITICAL: Respond with ONLY a number between 1 and 10 (decimals allowed, \
             e.g., 8.5). Do NOT include explanations.\n\nScore:",
            query_type.map(|c| c.as_str()).unwrap_or("general"),
            query,
            truncate_chars(document, 1500),
        );

        let options = GenerationOptions::default()
            .with_temperature(0.0)
            .with_max_tokens(8);

        let score = match self.llm.generate(&prompt, options).await {
            Ok(result) => parse_llm_score(&result.text),
            Err(e) => {
                tracing::warn!(error = %e, "LLM scoring failed, using neutral");
                NEUTRAL_SCORE
            }
        };

        self.score_cache.insert(key, score);
        score
    }

    /// Score several documents in one call; responses are a
    /// comma-separated score list matching document order.
    async fn score_batched(
        &self,
        query: &str,
        documents: &[&str],
        query_type: Option<QueryClass>,
    ) -> Vec<f32> {
        let mut prompt = format!(
            "You are an expert at evaluating policy documents.\n\n\
             Query Type: {}\n\
             User Question: {}\n\n\
             Below are {} documents. Rate each on a scale of 1-10 for relevance.\n",
            query_type.map(|c| c.as_str()).unwrap_or("general"),
            query,
            documents.len(),
        );

        for (idx, doc) in documents.iter().enumerate() {
            prompt.push_str(&format!(
                "\n=== DOCUMENT {} ===\n{}\n",
                idx + 1,
                truncate_chars(doc, 800)
            ));
        }

        prompt.push_str(
            "\nProvide ONLY the scores as a comma-separated list \
             (e.g., \"8.5, 6.0, 9.2\"):\n\nScores:",
        );

        let options = GenerationOptions::default()
            .with_temperature(0.0)
            .with_max_tokens(48);

        let mut scores: Vec<f32> = match self.llm.generate(&prompt, options).await {
            Ok(result) => result
                .text
                .split(',')
                .map(|s| {
                    s.trim()
                        .parse::<f32>()
                        .map(|v| v.clamp(1.0, 10.0))
                        .unwrap_or(NEUTRAL_SCORE)
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Batched LLM scoring failed, using neutral");
                vec![NEUTRAL_SCORE; documents.len()]
            }
        };

        // Pad or truncate to match the document count
        scores.resize(documents.len(), NEUTRAL_SCORE);

        for (doc, score) in documents.iter().zip(&scores) {
            self.score_cache
                .insert(Self::cache_key(query, doc), *score);
        }

        scores
    }
}

#[async_trait]
impl FineScorer for LlmJudge {
    async fn score(
        &self,
        query: &str,
        documents: &[&str],
        query_type: Option<QueryClass>,
    ) -> Result<Vec<f32>, RagError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        // All cached: skip the LLM entirely
        let cached: Vec<Option<f32>> = documents
            .iter()
            .map(|doc| {
                self.score_cache
                    .get(&Self::cache_key(query, doc))
                    .map(|v| *v)
            })
            .collect();
        if cached.iter().all(Option::is_some) {
            return Ok(cached.into_iter().flatten().collect());
        }

        // One batched call beats parallel per-document calls for small
        // sets; the engine serializes them anyway.
        if (2..=5).contains(&documents.len()) {
            return Ok(self.score_batched(query, documents, query_type).await);
        }

        let mut scores = Vec::with_capacity(documents.len());
        for doc in documents {
            scores.push(self.score_one(query, doc, query_type).await);
        }
        Ok(scores)
    }
}

/// Hybrid two-stage reranker
pub struct HybridReranker {
    cross_encoder: Arc<dyn CrossEncoder>,
    fine: Option<Arc<dyn FineScorer>>,
    config: RerankConfig,
}

impl HybridReranker {
    pub fn new(
        cross_encoder: Arc<dyn CrossEncoder>,
        fine: Option<Arc<dyn FineScorer>>,
        config: RerankConfig,
    ) -> Self {
        Self {
            cross_encoder,
            fine,
            config,
        }
    }

    /// Fine-pass document count, adapted to the query class
    fn fine_count(&self, query_type: Option<QueryClass>) -> usize {
        match query_type {
            Some(QueryClass::Factual) => 3,
            Some(QueryClass::Procedure) => 4,
            Some(QueryClass::Complex) => 5,
            _ => self.config.effective_top_n(),
        }
    }

    /// Rerank documents; the output is always a permutation of the input.
    pub async fn rerank(
        &self,
        query: &str,
        documents: Vec<Document>,
        query_type: Option<QueryClass>,
    ) -> Result<Vec<RerankedDocument>, RagError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        // Stage 1: cross-encoder over everything
        let texts: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
        let mut cross_scores = self.cross_encoder.score_pairs(query, &texts)?;

        if cross_scores.len() != documents.len() {
            tracing::warn!(
                expected = documents.len(),
                actual = cross_scores.len(),
                "Cross-encoder score length mismatch, repairing"
            );
            cross_scores.resize(documents.len(), 0.0);
        }

        let mut ranked: Vec<RerankedDocument> = documents
            .into_iter()
            .zip(cross_scores)
            .map(|(document, cross_score)| RerankedDocument {
                document,
                score: cross_score,
                cross_score,
                fine_score: 0.0,
            })
            .collect();

        // Stable: equal scores keep original retrieval order
        ranked.sort_by(|a, b| {
            b.cross_score
                .partial_cmp(&a.cross_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Stage 2: fine pass on the head
        if self.config.enable_llm_reranking {
            if let Some(fine) = &self.fine {
                let count = self.fine_count(query_type).min(ranked.len());
                let head: Vec<&str> = ranked[..count]
                    .iter()
                    .map(|r| r.document.content.as_str())
                    .collect();

                match fine.score(query, &head, query_type).await {
                    Ok(fine_scores) => {
                        for (entry, fine_score) in ranked.iter_mut().zip(fine_scores) {
                            entry.fine_score = fine_score;
                        }
                    }
                    Err(e) => {
                        // Keep stage-1 order; scored nothing
                        tracing::warn!(error = %e, "Fine rerank pass failed, keeping stage-1 order");
                    }
                }
            }
        }

        self.fuse(&mut ranked);
        Ok(ranked)
    }

    /// Weighted fusion of min-max normalized score components
    fn fuse(&self, ranked: &mut [RerankedDocument]) {
        let alpha = self.config.hybrid_alpha;

        let cross_norm = min_max_normalize(&ranked.iter().map(|r| r.cross_score).collect::<Vec<_>>());

        let fine_raw: Vec<f32> = ranked
            .iter()
            .filter(|r| r.fine_score > 0.0)
            .map(|r| r.fine_score)
            .collect();
        let fine_norm = min_max_normalize(&fine_raw);
        let mut fine_iter = fine_norm.into_iter();

        for (entry, cross) in ranked.iter_mut().zip(cross_norm) {
            entry.score = if entry.fine_score > 0.0 {
                let fine = fine_iter.next().unwrap_or(0.5);
                alpha * cross + (1.0 - alpha) * fine
            } else {
                // Docs the fine pass never saw keep their stage-1 standing
                alpha * cross
            };
        }

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
}

/// Min-max normalize into [0, 1]; a constant slice maps to 0.5
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

    if (max - min).abs() < f32::EPSILON {
        return vec![0.5; scores.len()];
    }

    scores.iter().map(|s| (s - min) / (max - min)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_direct_number() {
        assert_eq!(parse_llm_score("8.5"), 8.5);
        assert_eq!(parse_llm_score(" 7 "), 7.0);
    }

    #[test]
    fn test_parse_number_with_trailing_text() {
        assert_eq!(parse_llm_score("8.5\n\nThe document contains..."), 8.5);
        assert_eq!(parse_llm_score("I would rate this 6 because"), 6.0);
    }

    #[test]
    fn test_parse_out_of_hundred() {
        assert_eq!(parse_llm_score("85 out of 100"), 8.5);
    }

    #[test]
    fn test_parse_labeled_score() {
        assert_eq!(parse_llm_score("Score: 9.2"), 9.2);
    }

    #[test]
    fn test_parse_garbage_is_neutral() {
        assert_eq!(parse_llm_score("highly relevant document"), NEUTRAL_SCORE);
        assert_eq!(parse_llm_score(""), NEUTRAL_SCORE);
    }

    #[test]
    fn test_parse_clamps() {
        assert_eq!(parse_llm_score("0.2"), 1.0);
        // First-number strategy rescales >10
        assert_eq!(parse_llm_score("200"), 2.0);
    }

    #[test]
    fn test_lexical_scorer_relevance() {
        let relevant = LexicalScorer::score(
            "fitness assessment frequency",
            "Fitness assessment frequency is annual for all members",
        );
        let irrelevant = LexicalScorer::score(
            "fitness assessment frequency",
            "The dining facility serves three meals daily",
        );
        assert!(relevant > irrelevant);
        assert!(irrelevant >= 0.0);
    }

    #[test]
    fn test_lexical_scorer_stopword_only_query() {
        assert_eq!(LexicalScorer::score("what is the", "any document"), 0.0);
    }

    #[test]
    fn test_min_max_normalize() {
        let normalized = min_max_normalize(&[2.0, 4.0, 6.0]);
        assert_eq!(normalized, vec![0.0, 0.5, 1.0]);
        assert_eq!(min_max_normalize(&[3.0, 3.0]), vec![0.5, 0.5]);
        assert!(min_max_normalize(&[]).is_empty());
    }

    fn docs(texts: &[&str]) -> Vec<Document> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Document::new(format!("d{}", i), *t))
            .collect()
    }

    #[tokio::test]
    async fn test_rerank_is_permutation() {
        let reranker = HybridReranker::new(
            Arc::new(LexicalScorer),
            None,
            RerankConfig::default(),
        );
        let input = docs(&[
            "fitness assessment policy",
            "dining hours",
            "fitness testing frequency requirements",
            "parking regulations",
        ]);
        let mut input_ids: Vec<String> = input.iter().map(|d| d.id.clone()).collect();

        let ranked = reranker
            .rerank("fitness testing frequency", input, None)
            .await
            .unwrap();

        let mut output_ids: Vec<String> =
            ranked.iter().map(|r| r.document.id.clone()).collect();
        input_ids.sort();
        output_ids.sort();
        assert_eq!(input_ids, output_ids);
    }

    #[tokio::test]
    async fn test_rerank_orders_by_relevance() {
        let reranker = HybridReranker::new(
            Arc::new(LexicalScorer),
            None,
            RerankConfig::default(),
        );
        let ranked = reranker
            .rerank(
                "shaving waiver",
                docs(&["mess hall menu", "shaving waiver request procedure"]),
                None,
            )
            .await
            .unwrap();
        assert_eq!(ranked[0].document.id, "d1");
    }

    #[tokio::test]
    async fn test_rerank_empty_input() {
        let reranker = HybridReranker::new(
            Arc::new(LexicalScorer),
            None,
            RerankConfig::default(),
        );
        let ranked = reranker.rerank("anything", Vec::new(), None).await.unwrap();
        assert!(ranked.is_empty());
    }

    struct FailingFine;

    #[async_trait]
    impl FineScorer for FailingFine {
        async fn score(
            &self,
            _query: &str,
            _documents: &[&str],
            _query_type: Option<QueryClass>,
        ) -> Result<Vec<f32>, RagError> {
            Err(RagError::Reranker("fine pass unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_fine_failure_keeps_stage1_order_and_count() {
        let reranker = HybridReranker::new(
            Arc::new(LexicalScorer),
            Some(Arc::new(FailingFine)),
            RerankConfig::default(),
        );
        let ranked = reranker
            .rerank(
                "uniform standards",
                docs(&[
                    "uniform standards for dress",
                    "travel voucher filing",
                    "uniform wear policy standards detail",
                ]),
                None,
            )
            .await
            .unwrap();

        assert_eq!(ranked.len(), 3);
        assert!(ranked.iter().all(|r| r.fine_score == 0.0));
        // Still ordered by cross-encoder relevance
        assert!(ranked[0].cross_score >= ranked[1].cross_score);
        assert!(ranked[1].cross_score >= ranked[2].cross_score);
    }

    struct FixedFine(Vec<f32>);

    #[async_trait]
    impl FineScorer for FixedFine {
        async fn score(
            &self,
            _query: &str,
            documents: &[&str],
            _query_type: Option<QueryClass>,
        ) -> Result<Vec<f32>, RagError> {
            Ok(self.0.iter().cloned().take(documents.len()).collect())
        }
    }

    #[tokio::test]
    async fn test_fine_scores_can_reorder_head() {
        let config = RerankConfig {
            hybrid_alpha: 0.1,
            ..RerankConfig::default()
        };
        // Cross-encoder slightly prefers doc0; fine pass strongly
        // prefers doc1; low alpha lets the fine pass win.
        let reranker = HybridReranker::new(
            Arc::new(LexicalScorer),
            Some(Arc::new(FixedFine(vec![2.0, 9.5, 2.0]))),
            config,
        );
        let ranked = reranker
            .rerank(
                "leave policy",
                docs(&[
                    "leave policy summary and leave policy overview",
                    "leave policy details",
                    "unrelated cafeteria notice",
                ]),
                Some(QueryClass::Factual),
            )
            .await
            .unwrap();

        assert_eq!(ranked[0].document.id, "d1");
    }

    #[test]
    fn test_fine_count_adapts_to_class() {
        let reranker = HybridReranker::new(
            Arc::new(LexicalScorer),
            None,
            RerankConfig::default(),
        );
        assert_eq!(reranker.fine_count(Some(QueryClass::Factual)), 3);
        assert_eq!(reranker.fine_count(Some(QueryClass::Procedure)), 4);
        assert_eq!(reranker.fine_count(Some(QueryClass::Complex)), 5);
        // Preset drives the default
        assert_eq!(reranker.fine_count(None), 3);
    }
}
