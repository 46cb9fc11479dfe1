//! Embedding client
//!
//! Text to fixed-dimension vector over an HTTP embedding service. The
//! output dimension is configured at startup and must match the vector
//! store collection; the probe in `init()` enforces this before the
//! service accepts traffic.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use policy_qa_config::EmbeddingConfig;

use crate::RagError;

/// Text to vector contract
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single non-empty text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;

    /// Embed a batch; result order matches input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;

    /// Configured output dimension
    fn dimension(&self) -> usize;

    /// Reachability probe for health checks
    async fn healthy(&self) -> bool {
        true
    }
}

/// Request to the embedding API
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

/// Response from the embedding API
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// HTTP embedder against an Ollama-style `/api/embed` endpoint
pub struct HttpEmbedder {
    client: Client,
    config: EmbeddingConfig,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Probe the model once and verify the served dimension.
    ///
    /// A mismatch is fatal at startup: retrieving against a collection
    /// built with a different model silently returns garbage.
    pub async fn init(&self) -> Result<(), RagError> {
        let probe = self.embed_raw(&["dimension probe".to_string()]).await?;
        let actual = probe.first().map(Vec::len).unwrap_or(0);
        if actual != self.config.dimension {
            return Err(RagError::ModelMismatch {
                expected: self.config.dimension,
                actual,
            });
        }
        tracing::info!(
            model = %self.config.model_name,
            dimension = actual,
            "Embedding model verified"
        );
        Ok(())
    }

    async fn probe(&self) -> bool {
        self.embed_raw(&["ping".to_string()]).await.is_ok()
    }

    async fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let url = format!("{}/api/embed", self.config.endpoint.trim_end_matches('/'));
        let request = EmbedRequest {
            model: &self.config.model_name,
            input: texts.iter().map(String::as_str).collect(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::EmbeddingUnavailable(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("invalid response: {}", e)))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }

        let mut vectors = parsed.embeddings;
        if self.config.normalize {
            for vector in &mut vectors {
                l2_normalize(vector);
            }
        }

        Ok(vectors)
    }
}

/// Normalize a vector to unit length in place; zero vectors stay zero
fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        if text.trim().is_empty() {
            return Err(RagError::Embedding("empty input text".to_string()));
        }
        let mut vectors = self.embed_raw(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(RagError::Embedding("empty input text in batch".to_string()));
        }

        // Coalesce into model-sized chunks
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            let vectors = self.embed_raw(chunk).await?;
            all.extend(vectors);
        }
        Ok(all)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn healthy(&self) -> bool {
        self.probe().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let embedder = HttpEmbedder::new(EmbeddingConfig::default());
        let result = embedder.embed("   ").await;
        assert!(matches!(result, Err(RagError::Embedding(_))));
    }

    #[tokio::test]
    async fn test_empty_batch_is_ok() {
        let embedder = HttpEmbedder::new(EmbeddingConfig::default());
        let result = embedder.embed_batch(&[]).await.unwrap();
        assert!(result.is_empty());
    }
}
