//! Multi-stage result cache (L1-L3)
//!
//! Three layers tried in order:
//! - L1 exact: key over the raw query, O(1), always correct
//! - L2 normalized: key over the normalized query, O(1), correct by
//!   construction of the normalization
//! - L3 semantic: embedding similarity above a strict threshold, then
//!   validated by document-overlap so near-synonym queries never return
//!   stale answers after the retrieval set shifts
//!
//! All storage is Redis; every failure degrades to a miss and writes
//! are best-effort.

use chrono::Utc;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use policy_qa_config::CacheConfig;
use policy_qa_core::{normalize_query, text_hash, Answer};

use crate::EngineError;

const EXACT_PREFIX: &str = "answers:v1:exact:";
const NORMALIZED_PREFIX: &str = "answers:v1:normalized:";
const SEMANTIC_PREFIX: &str = "answers:v1:semantic:";

/// Complete cache entry with validation data
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    query: String,
    query_normalized: String,
    answer: Answer,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    retrieved_doc_ids: Option<Vec<String>>,
    created_at: String,
    #[serde(default)]
    hit_count: u64,
}

#[derive(Debug, Default, Clone)]
struct StatsInner {
    exact_hits: u64,
    normalized_hits: u64,
    semantic_hits: u64,
    semantic_validated: u64,
    semantic_rejected: u64,
    misses: u64,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResultCacheStats {
    pub exact_hits: u64,
    pub normalized_hits: u64,
    pub semantic_hits: u64,
    pub semantic_validated: u64,
    pub semantic_rejected: u64,
    pub misses: u64,
    pub total_hits: u64,
    pub total_requests: u64,
    pub hit_rate: f64,
    /// Validated / attempted semantic matches
    pub semantic_precision: f64,
}

/// Multi-stage result cache
#[derive(Clone)]
pub struct ResultCache {
    conn: ConnectionManager,
    config: CacheConfig,
    stats: Arc<Mutex<StatsInner>>,
}

impl ResultCache {
    pub async fn connect(config: CacheConfig) -> Result<Self, EngineError> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| EngineError::Cache(format!("redis: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| EngineError::Cache(format!("redis: {}", e)))?;

        tracing::info!(
            semantic_threshold = config.semantic_threshold,
            overlap_threshold = config.overlap_threshold,
            "Result cache connected"
        );

        Ok(Self {
            conn,
            config,
            stats: Arc::new(Mutex::new(StatsInner::default())),
        })
    }

    /// L1/L2 lookup; runs before retrieval.
    ///
    /// Returns the answer and the layer name on a hit.
    pub async fn get_fast(&self, query: &str) -> Option<(Answer, &'static str)> {
        if let Some(answer) = self
            .read_entry(&format!("{}{}", EXACT_PREFIX, text_hash(query)), self.config.ttl_exact)
            .await
        {
            self.stats.lock().exact_hits += 1;
            tracing::info!(query = %truncate(query, 50), "Cache exact hit");
            return Some((answer, "exact"));
        }

        let normalized = normalize_query(query);
        if let Some(answer) = self
            .read_entry(
                &format!("{}{}", NORMALIZED_PREFIX, text_hash(&normalized)),
                self.config.ttl_exact,
            )
            .await
        {
            self.stats.lock().normalized_hits += 1;
            tracing::info!(query = %truncate(query, 50), "Cache normalized hit");
            return Some((answer, "normalized"));
        }

        None
    }

    /// L3 lookup; runs only after retrieval so candidates can be
    /// validated against the fresh document set.
    pub async fn get_semantic(
        &self,
        query_embedding: &[f32],
        current_doc_ids: &[String],
    ) -> Option<Answer> {
        if query_embedding.is_empty() || current_doc_ids.is_empty() {
            return None;
        }

        let candidates = self.semantic_candidates(query_embedding).await;
        let attempted = !candidates.is_empty();

        for (entry, similarity) in candidates {
            let Some(cached_ids) = entry.retrieved_doc_ids.as_ref() else {
                continue;
            };

            let overlap = jaccard_overlap(current_doc_ids, cached_ids);
            if overlap >= self.config.overlap_threshold {
                tracing::info!(
                    similarity,
                    overlap,
                    "Semantic cache hit (validated)"
                );
                let mut stats = self.stats.lock();
                stats.semantic_hits += 1;
                stats.semantic_validated += 1;
                return Some(entry.answer);
            }

            tracing::debug!(
                similarity,
                overlap,
                threshold = self.config.overlap_threshold,
                "Semantic candidate rejected by document overlap"
            );
        }

        if attempted {
            self.stats.lock().semantic_rejected += 1;
        }
        None
    }

    /// Record a full miss (no layer hit for this request)
    pub fn record_miss(&self) {
        self.stats.lock().misses += 1;
    }

    /// Store a non-error answer in all applicable layers
    pub async fn put(
        &self,
        query: &str,
        answer: &Answer,
        embedding: Option<&[f32]>,
        doc_ids: Option<&[String]>,
    ) {
        // Error answers are never cached
        if answer.error {
            return;
        }

        let normalized = normalize_query(query);
        let created_at = Utc::now().to_rfc3339();

        let entry = CacheEntry {
            query: query.to_string(),
            query_normalized: normalized.clone(),
            answer: answer.clone(),
            embedding: None,
            retrieved_doc_ids: None,
            created_at: created_at.clone(),
            hit_count: 0,
        };

        self.write_entry(
            &format!("{}{}", EXACT_PREFIX, text_hash(query)),
            &entry,
            self.config.ttl_exact,
        )
        .await;

        if normalized != query {
            self.write_entry(
                &format!("{}{}", NORMALIZED_PREFIX, text_hash(&normalized)),
                &entry,
                self.config.ttl_exact,
            )
            .await;
        }

        // Semantic layer needs the embedding and the doc ids that
        // produced the answer; without them validation is impossible.
        if let (Some(embedding), Some(doc_ids)) = (embedding, doc_ids) {
            let semantic_entry = CacheEntry {
                embedding: Some(embedding.to_vec()),
                retrieved_doc_ids: Some(doc_ids.to_vec()),
                ..entry
            };
            self.write_entry(
                &format!("{}{}", SEMANTIC_PREFIX, text_hash(query)),
                &semantic_entry,
                self.config.ttl_semantic,
            )
            .await;
        }
    }

    /// Drop every layer's entry for this query
    pub async fn invalidate(&self, query: &str) {
        let normalized = normalize_query(query);
        let keys = [
            format!("{}{}", EXACT_PREFIX, text_hash(query)),
            format!("{}{}", NORMALIZED_PREFIX, text_hash(&normalized)),
            format!("{}{}", SEMANTIC_PREFIX, text_hash(query)),
        ];

        let mut conn = self.conn.clone();
        for key in keys {
            if let Err(e) = conn.del::<_, ()>(&key).await {
                tracing::warn!(error = %e, "Cache invalidate failed");
            }
        }
    }

    /// Destructive, global clear of all three layers
    pub async fn clear_all(&self) {
        for prefix in [EXACT_PREFIX, NORMALIZED_PREFIX, SEMANTIC_PREFIX] {
            let keys = self.scan_keys(prefix).await;
            if keys.is_empty() {
                continue;
            }
            let mut conn = self.conn.clone();
            if let Err(e) = conn.del::<_, ()>(keys).await {
                tracing::warn!(error = %e, "Cache clear failed");
            }
        }
        tracing::info!("Result cache cleared");
    }

    pub fn stats(&self) -> ResultCacheStats {
        let stats = self.stats.lock().clone();
        let total_hits = stats.exact_hits + stats.normalized_hits + stats.semantic_hits;
        let total_requests = total_hits + stats.misses;
        let attempted_semantic = stats.semantic_validated + stats.semantic_rejected;

        ResultCacheStats {
            exact_hits: stats.exact_hits,
            normalized_hits: stats.normalized_hits,
            semantic_hits: stats.semantic_hits,
            semantic_validated: stats.semantic_validated,
            semantic_rejected: stats.semantic_rejected,
            misses: stats.misses,
            total_hits,
            total_requests,
            hit_rate: if total_requests > 0 {
                total_hits as f64 / total_requests as f64
            } else {
                0.0
            },
            semantic_precision: if attempted_semantic > 0 {
                stats.semantic_validated as f64 / attempted_semantic as f64
            } else {
                0.0
            },
        }
    }

    pub async fn is_available(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    /// Read an entry, bumping its hit counter best-effort
    async fn read_entry(&self, key: &str, ttl: u64) -> Option<Answer> {
        let mut conn = self.conn.clone();

        let data: Option<Vec<u8>> = match conn.get(key).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "Cache lookup failed");
                return None;
            }
        };

        let mut entry: CacheEntry = serde_json::from_slice(&data?).ok()?;

        entry.hit_count += 1;
        if let Ok(serialized) = serde_json::to_vec(&entry) {
            if let Err(e) = conn.set_ex::<_, _, ()>(key, serialized, ttl).await {
                tracing::debug!(error = %e, "Hit counter bump failed");
            }
        }

        Some(entry.answer)
    }

    async fn write_entry(&self, key: &str, entry: &CacheEntry, ttl: u64) {
        let Ok(serialized) = serde_json::to_vec(entry) else {
            return;
        };
        let mut conn = self.conn.clone();
        if let Err(e) = conn.set_ex::<_, _, ()>(key, serialized, ttl).await {
            tracing::warn!(error = %e, "Cache write failed");
        }
    }

    /// Collect semantic candidates above the similarity threshold,
    /// best first, bounded by `semantic_candidates_max`.
    async fn semantic_candidates(&self, query_embedding: &[f32]) -> Vec<(CacheEntry, f32)> {
        let keys = self.scan_keys(SEMANTIC_PREFIX).await;
        if keys.is_empty() {
            return Vec::new();
        }

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for key in &keys {
            pipe.get(key);
        }
        let values: Vec<Option<Vec<u8>>> = match pipe.query_async(&mut conn).await {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!(error = %e, "Semantic candidate fetch failed");
                return Vec::new();
            }
        };

        let mut candidates: Vec<(CacheEntry, f32)> = values
            .into_iter()
            .flatten()
            .filter_map(|data| serde_json::from_slice::<CacheEntry>(&data).ok())
            .filter_map(|entry| {
                let similarity =
                    cosine_similarity(query_embedding, entry.embedding.as_deref()?);
                (similarity >= self.config.semantic_threshold).then_some((entry, similarity))
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(self.config.semantic_candidates_max);
        candidates
    }

    async fn scan_keys(&self, prefix: &str) -> Vec<String> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let result: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await;

            match result {
                Ok((next, batch)) => {
                    keys.extend(batch);
                    cursor = next;
                    if cursor == 0 {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Cache scan failed");
                    break;
                }
            }
        }
        keys
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Jaccard overlap of two document-id sets
pub fn jaccard_overlap(a: &[String], b: &[String]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let set_a: HashSet<&String> = a.iter().collect();
    let set_b: HashSet<&String> = b.iter().collect();

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();

    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Cosine similarity of two vectors; mismatched lengths score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
