//! Embedding cache (L4)
//!
//! Redis-backed key to vector cache. Keys are version-prefixed SHA-256
//! digests of the exact text; values are raw little-endian f32 arrays
//! of the configured dimension. Every failure degrades to a miss or a
//! dropped write; the cache never fails a caller.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use policy_qa_core::text_hash;

use crate::embeddings::Embedder;
use crate::RagError;

/// Key prefix; bump the version to invalidate the whole cache
const KEY_PREFIX: &str = "emb:v1:";

#[derive(Debug, Default)]
struct StatsInner {
    hits: u64,
    misses: u64,
    get_latency_us_total: u64,
    get_count: u64,
}

/// Cache statistics exposed to monitoring
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbeddingCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub avg_get_latency_ms: f64,
    pub ttl_seconds: u64,
}

/// Redis-backed embedding cache
#[derive(Clone)]
pub struct EmbeddingCache {
    conn: ConnectionManager,
    ttl_seconds: u64,
    dimension: usize,
    stats: Arc<Mutex<StatsInner>>,
}

impl EmbeddingCache {
    /// Connect to Redis. Connection failure is an error here (startup);
    /// later failures degrade to misses.
    pub async fn connect(
        redis_url: &str,
        ttl_seconds: u64,
        dimension: usize,
    ) -> Result<Self, RagError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| RagError::Connection(format!("redis: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| RagError::Connection(format!("redis: {}", e)))?;

        tracing::info!(url = redis_url, ttl_seconds, "Embedding cache connected");

        Ok(Self {
            conn,
            ttl_seconds,
            dimension,
            stats: Arc::new(Mutex::new(StatsInner::default())),
        })
    }

    fn key(text: &str) -> String {
        format!("{}{}", KEY_PREFIX, text_hash(text))
    }

    /// Get a cached vector; any error or size mismatch is a miss
    pub async fn get(&self, text: &str) -> Option<Vec<f32>> {
        let start = Instant::now();
        let mut conn = self.conn.clone();

        let result: Result<Option<Vec<u8>>, _> = conn.get(Self::key(text)).await;
        let vector = match result {
            Ok(Some(bytes)) => decode_vector(&bytes, self.dimension),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Embedding cache get failed");
                None
            }
        };

        let mut stats = self.stats.lock();
        stats.get_count += 1;
        stats.get_latency_us_total += start.elapsed().as_micros() as u64;
        if vector.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }

        vector
    }

    /// Store a vector; write failures are logged and dropped
    pub async fn set(&self, text: &str, vector: &[f32]) {
        if vector.len() != self.dimension {
            tracing::warn!(
                expected = self.dimension,
                actual = vector.len(),
                "Refusing to cache embedding with wrong dimension"
            );
            return;
        }

        let mut conn = self.conn.clone();
        let result: Result<(), _> = conn
            .set_ex(Self::key(text), encode_vector(vector), self.ttl_seconds)
            .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, "Embedding cache set failed");
        }
    }

    /// Batch get via a pipeline; result order matches input order
    pub async fn batch_get(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        if texts.is_empty() {
            return Vec::new();
        }

        let start = Instant::now();
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for text in texts {
            pipe.get(Self::key(text));
        }

        let results: Vec<Option<Vec<u8>>> = match pipe.query_async(&mut conn).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(error = %e, "Embedding cache batch get failed");
                vec![None; texts.len()]
            }
        };

        let vectors: Vec<Option<Vec<f32>>> = results
            .into_iter()
            .map(|bytes| bytes.and_then(|b| decode_vector(&b, self.dimension)))
            .collect();

        let mut stats = self.stats.lock();
        stats.get_count += 1;
        stats.get_latency_us_total += start.elapsed().as_micros() as u64;
        for v in &vectors {
            if v.is_some() {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }

        vectors
    }

    /// Batch set via a pipeline; failures are logged and dropped
    pub async fn batch_set(&self, pairs: &[(String, Vec<f32>)]) {
        if pairs.is_empty() {
            return;
        }

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for (text, vector) in pairs {
            if vector.len() != self.dimension {
                continue;
            }
            pipe.set_ex(Self::key(text), encode_vector(vector), self.ttl_seconds);
        }

        if let Err(e) = pipe.query_async::<()>(&mut conn).await {
            tracing::warn!(error = %e, "Embedding cache batch set failed");
        }
    }

    /// Drop the cached vector for a text
    pub async fn invalidate(&self, text: &str) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn.del::<_, ()>(Self::key(text)).await {
            tracing::warn!(error = %e, "Embedding cache invalidate failed");
        }
    }

    /// Reachability probe for health checks
    pub async fn is_available(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    pub fn stats(&self) -> EmbeddingCacheStats {
        let stats = self.stats.lock();
        let total = stats.hits + stats.misses;
        EmbeddingCacheStats {
            hits: stats.hits,
            misses: stats.misses,
            hit_rate: if total > 0 {
                stats.hits as f64 / total as f64
            } else {
                0.0
            },
            avg_get_latency_ms: if stats.get_count > 0 {
                stats.get_latency_us_total as f64 / stats.get_count as f64 / 1000.0
            } else {
                0.0
            },
            ttl_seconds: self.ttl_seconds,
        }
    }
}

/// Encode as raw little-endian f32 bytes
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes; wrong length means a stale or
/// foreign value and reads as a miss
fn decode_vector(bytes: &[u8], dimension: usize) -> Option<Vec<f32>> {
    if bytes.len() != dimension * 4 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// Embedder wrapper with cache-first lookups and write-back.
///
/// Drop-in `Embedder`: callers never see cache failures.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Option<EmbeddingCache>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache: Option<EmbeddingCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache_stats(&self) -> Option<EmbeddingCacheStats> {
        self.cache.as_ref().map(EmbeddingCache::stats)
    }

    pub fn cache(&self) -> Option<&EmbeddingCache> {
        self.cache.as_ref()
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        if let Some(cache) = &self.cache {
            if let Some(vector) = cache.get(text).await {
                return Ok(vector);
            }
        }

        let vector = self.inner.embed(text).await?;

        if let Some(cache) = &self.cache {
            cache.set(text, &vector).await;
        }

        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let Some(cache) = &self.cache else {
            return self.inner.embed_batch(texts).await;
        };

        let cached = cache.batch_get(texts).await;

        let mut results: Vec<Option<Vec<f32>>> = cached;
        let mut missing_texts = Vec::new();
        let mut missing_indices = Vec::new();

        for (i, slot) in results.iter().enumerate() {
            if slot.is_none() {
                missing_texts.push(texts[i].clone());
                missing_indices.push(i);
            }
        }

        if !missing_texts.is_empty() {
            let computed = self.inner.embed_batch(&missing_texts).await?;

            let pairs: Vec<(String, Vec<f32>)> = missing_texts
                .iter()
                .cloned()
                .zip(computed.iter().cloned())
                .collect();
            cache.batch_set(&pairs).await;

            for (idx, vector) in missing_indices.into_iter().zip(computed) {
                results[idx] = Some(vector);
            }
        }

        // All slots are filled by now
        Ok(results.into_iter().flatten().collect())
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn healthy(&self) -> bool {
        self.inner.healthy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_roundtrip() {
        let vector = vec![0.25f32, -1.5, 3.75, 0.0];
        let bytes = encode_vector(&vector);
        assert_eq!(bytes.len(), 16);
        let decoded = decode_vector(&bytes, 4).unwrap();
        assert_eq!(decoded, vector);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let bytes = encode_vector(&[1.0, 2.0]);
        assert!(decode_vector(&bytes, 4).is_none());
        assert!(decode_vector(&bytes[..7], 2).is_none());
    }

    #[test]
    fn test_key_is_versioned_digest() {
        let key = EmbeddingCache::key("What are the uniform regulations?");
        assert!(key.starts_with("emb:v1:"));
        // Version prefix + 64 hex chars
        assert_eq!(key.len(), "emb:v1:".len() + 64);
        // Same text, same key
        assert_eq!(key, EmbeddingCache::key("What are the uniform regulations?"));
    }
}
