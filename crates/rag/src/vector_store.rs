//! Vector store client (Qdrant)
//!
//! Dense, sparse and hybrid search over a pre-built collection with
//! named `dense`/`sparse` vectors. Hybrid search fuses server-side over
//! dense and sparse prefetch with RRF or DBSF. Scores are opaque and
//! comparable only within one call.

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Fusion, HnswConfigDiffBuilder,
    PrefetchQueryBuilder, Query, QueryPointsBuilder, ScoredPoint, SparseVectorParamsBuilder,
    SparseVectorsConfigBuilder, VectorInput, VectorParamsBuilder, VectorsConfigBuilder,
};
use qdrant_client::Qdrant;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use policy_qa_core::Document;
use policy_qa_config::VectorStoreConfig;

use crate::sparse::SparseEncoder;
use crate::RagError;

/// Logical name of the dense vector in the collection
const DENSE_VECTOR: &str = "dense";
/// Logical name of the sparse vector in the collection
const SPARSE_VECTOR: &str = "sparse";
/// Payload key holding the passage text
const TEXT_KEY: &str = "text";

/// Fusion method for hybrid search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FusionMethod {
    /// Reciprocal rank fusion
    #[default]
    Rrf,
    /// Distribution-based score fusion
    Dbsf,
}

/// Metadata filter applied to a search.
///
/// Every entry is a must-match keyword condition on a payload field.
/// A filter the backend cannot express is refused with `FilterInvalid`,
/// never silently ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub conditions: HashMap<String, String>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must_match(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// A document with its similarity score
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

/// Search capability interface over the vector store
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Approximate nearest neighbor over the dense index
    async fn search_dense(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredDocument>, RagError>;

    /// Keyword search over the sparse index
    async fn search_sparse(
        &self,
        query_text: &str,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredDocument>, RagError>;

    /// Server-side fusion of dense and sparse prefetch
    async fn hybrid_search(
        &self,
        vector: &[f32],
        query_text: &str,
        k: usize,
        filter: Option<&SearchFilter>,
        fusion: FusionMethod,
    ) -> Result<Vec<ScoredDocument>, RagError>;

    /// Whether hybrid search is available on this backend
    fn supports_hybrid(&self) -> bool;

    /// Reachability probe for health checks
    async fn healthy(&self) -> bool {
        true
    }
}

/// Qdrant-backed search client
pub struct QdrantStore {
    client: Qdrant,
    config: VectorStoreConfig,
    dimension: usize,
    dense_prefetch: usize,
    sparse_prefetch: usize,
}

impl QdrantStore {
    pub fn new(
        config: VectorStoreConfig,
        dimension: usize,
        dense_prefetch: usize,
        sparse_prefetch: usize,
    ) -> Result<Self, RagError> {
        let mut builder = Qdrant::from_url(&config.endpoint);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
            tracing::info!("Qdrant connection using API key authentication");
        }

        let client = builder
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            config,
            dimension,
            dense_prefetch,
            sparse_prefetch,
        })
    }

    /// Create the collection if it does not exist.
    ///
    /// Named dense vector with cosine distance and an HNSW graph, plus
    /// a named sparse vector with inverted-index semantics.
    pub async fn ensure_collection(&self) -> Result<(), RagError> {
        let exists = self
            .client
            .collection_exists(&self.config.collection)
            .await
            .map_err(|e| RagError::StoreUnavailable(e.to_string()))?;

        if exists {
            return Ok(());
        }

        let mut vectors_config = VectorsConfigBuilder::default();
        vectors_config.add_named_vector_params(
            DENSE_VECTOR,
            VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine),
        );

        let mut sparse_config = SparseVectorsConfigBuilder::default();
        sparse_config.add_named_vector_params(SPARSE_VECTOR, SparseVectorParamsBuilder::default());

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.config.collection)
                    .vectors_config(vectors_config)
                    .sparse_vectors_config(sparse_config)
                    .hnsw_config(HnswConfigDiffBuilder::default().m(16).ef_construct(128)),
            )
            .await
            .map_err(|e| RagError::StoreUnavailable(e.to_string()))?;

        tracing::info!(
            collection = %self.config.collection,
            dimension = self.dimension,
            "Collection created with hybrid search support"
        );
        Ok(())
    }

    /// Point count, used by health checks
    pub async fn collection_info(&self) -> Result<u64, RagError> {
        let info = self
            .client
            .collection_info(&self.config.collection)
            .await
            .map_err(|e| RagError::StoreUnavailable(e.to_string()))?;

        Ok(info
            .result
            .and_then(|r| r.points_count)
            .unwrap_or(0))
    }

    pub async fn is_available(&self) -> bool {
        self.client.health_check().await.is_ok()
    }

    fn to_qdrant_filter(
        filter: &SearchFilter,
    ) -> Result<qdrant_client::qdrant::Filter, RagError> {
        if filter.is_empty() {
            return Err(RagError::FilterInvalid("empty filter".to_string()));
        }

        let mut conditions = Vec::new();
        for (field, value) in &filter.conditions {
            if field.trim().is_empty() {
                return Err(RagError::FilterInvalid("empty field name".to_string()));
            }
            conditions.push(Condition::matches(field.clone(), value.clone()));
        }

        Ok(qdrant_client::qdrant::Filter::must(conditions))
    }

    fn to_document(point: ScoredPoint) -> ScoredDocument {
        let mut metadata = HashMap::new();
        let mut content = String::new();

        for (key, value) in point.payload {
            if key == TEXT_KEY {
                if let Some(Kind::StringValue(s)) = value.kind {
                    content = s;
                }
            } else if let Some(Kind::StringValue(s)) = value.kind {
                metadata.insert(key, s);
            }
        }

        let id = point
            .id
            .map(|pid| match pid.point_id_options {
                Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u)) => u,
                Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => n.to_string(),
                None => String::new(),
            })
            .unwrap_or_default();

        ScoredDocument {
            document: Document {
                id,
                content,
                metadata,
            },
            score: point.score,
        }
    }

    /// Execute a query, retrying once with jitter on transient failures
    async fn run_query(
        &self,
        builder: QueryPointsBuilder,
    ) -> Result<Vec<ScoredDocument>, RagError> {
        let request: qdrant_client::qdrant::QueryPoints = builder.into();

        let response = match self.client.query(request.clone()).await {
            Ok(response) => response,
            Err(first) => {
                let jitter_ms = 50 + rand::Rng::gen_range(&mut rand::thread_rng(), 0..100u64);
                tracing::warn!(error = %first, retry_in_ms = jitter_ms, "Search failed, retrying once");
                tokio::time::sleep(std::time::Duration::from_millis(jitter_ms)).await;

                self.client
                    .query(request)
                    .await
                    .map_err(|e| RagError::StoreUnavailable(e.to_string()))?
            }
        };

        Ok(response.result.into_iter().map(Self::to_document).collect())
    }
}

#[async_trait]
impl SearchBackend for QdrantStore {
    async fn search_dense(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredDocument>, RagError> {
        let mut builder = QueryPointsBuilder::new(&self.config.collection)
            .query(Query::new_nearest(vector.to_vec()))
            .using(DENSE_VECTOR)
            .limit(k as u64)
            .with_payload(true);

        if let Some(filter) = filter {
            builder = builder.filter(Self::to_qdrant_filter(filter)?);
        }

        self.run_query(builder).await
    }

    async fn search_sparse(
        &self,
        query_text: &str,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredDocument>, RagError> {
        let sparse = SparseEncoder::encode(query_text);
        if sparse.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryPointsBuilder::new(&self.config.collection)
            .query(Query::new_nearest(VectorInput::new_sparse(
                sparse.indices,
                sparse.values,
            )))
            .using(SPARSE_VECTOR)
            .limit(k as u64)
            .with_payload(true);

        if let Some(filter) = filter {
            builder = builder.filter(Self::to_qdrant_filter(filter)?);
        }

        self.run_query(builder).await
    }

    async fn hybrid_search(
        &self,
        vector: &[f32],
        query_text: &str,
        k: usize,
        filter: Option<&SearchFilter>,
        fusion: FusionMethod,
    ) -> Result<Vec<ScoredDocument>, RagError> {
        let sparse = SparseEncoder::encode(query_text);
        if sparse.is_empty() {
            // No usable keywords; hybrid degenerates to dense
            return self.search_dense(vector, k, filter).await;
        }

        let qdrant_filter = filter.map(Self::to_qdrant_filter).transpose()?;

        let mut dense_prefetch = PrefetchQueryBuilder::default()
            .query(Query::new_nearest(vector.to_vec()))
            .using(DENSE_VECTOR)
            .limit(self.dense_prefetch as u64);
        let mut sparse_prefetch = PrefetchQueryBuilder::default()
            .query(Query::new_nearest(VectorInput::new_sparse(
                sparse.indices,
                sparse.values,
            )))
            .using(SPARSE_VECTOR)
            .limit(self.sparse_prefetch as u64);

        if let Some(ref qdrant_filter) = qdrant_filter {
            dense_prefetch = dense_prefetch.filter(qdrant_filter.clone());
            sparse_prefetch = sparse_prefetch.filter(qdrant_filter.clone());
        }

        let builder = QueryPointsBuilder::new(&self.config.collection)
            .add_prefetch(dense_prefetch)
            .add_prefetch(sparse_prefetch)
            .query(Query::new_fusion(match fusion {
                FusionMethod::Rrf => Fusion::Rrf,
                FusionMethod::Dbsf => Fusion::Dbsf,
            }))
            .limit(k as u64)
            .with_payload(true);

        self.run_query(builder).await
    }

    fn supports_hybrid(&self) -> bool {
        true
    }

    async fn healthy(&self) -> bool {
        self.is_available().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_builder() {
        let filter = SearchFilter::new()
            .must_match("file_name", "dafi36-2903.pdf")
            .must_match("category", "grooming");
        assert_eq!(filter.conditions.len(), 2);
        assert!(!filter.is_empty());
    }

    #[test]
    fn test_empty_filter_refused() {
        let filter = SearchFilter::new();
        let result = QdrantStore::to_qdrant_filter(&filter);
        assert!(matches!(result, Err(RagError::FilterInvalid(_))));
    }

    #[test]
    fn test_blank_field_refused() {
        let filter = SearchFilter::new().must_match("  ", "value");
        let result = QdrantStore::to_qdrant_filter(&filter);
        assert!(matches!(result, Err(RagError::FilterInvalid(_))));
    }

    #[test]
    fn test_valid_filter_translates() {
        let filter = SearchFilter::new().must_match("category", "fitness");
        assert!(QdrantStore::to_qdrant_filter(&filter).is_ok());
    }

    #[test]
    fn test_fusion_method_serde() {
        assert_eq!(
            serde_json::to_string(&FusionMethod::Rrf).unwrap(),
            "\"rrf\""
        );
        let parsed: FusionMethod = serde_json::from_str("\"dbsf\"").unwrap();
        assert_eq!(parsed, FusionMethod::Dbsf);
    }
}
