//! Application state and component bootstrap

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use policy_qa_config::Settings;
use policy_qa_engine::{
    AnswerGenerator, EngineComponents, QueryPrefetcher, RagEngine, ResultCache,
};
use policy_qa_llm::{GenerationOptions, LlamaServerBackend, LlmClient};
use policy_qa_rag::{
    AdaptiveRetriever, CachedEmbedder, CrossEncoder, Embedder, EmbeddingCache, HttpEmbedder,
    HybridReranker, LexicalScorer, LlmJudge, QdrantStore, QueryTransformer, RagError,
    RetrieverConfig, SearchBackend,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RagEngine>,
    pub metrics: PrometheusHandle,
}

/// Assemble the production component graph and the engine.
///
/// The embedding dimension mismatch is fatal; unavailable collaborators
/// (store, caches, embedding service) degrade and surface through
/// `/health` instead of failing startup.
pub async fn build_engine(settings: Settings) -> anyhow::Result<Arc<RagEngine>> {
    // LLM: single worker over the llama.cpp server
    let backend = LlamaServerBackend::new(settings.llm.clone())?;
    let llm = LlmClient::spawn(Arc::new(backend), settings.llm.queue_depth);

    // Embedding client with a startup dimension probe
    let http_embedder = HttpEmbedder::new(settings.embedding.clone());
    match http_embedder.init().await {
        Ok(()) => {}
        Err(RagError::ModelMismatch { expected, actual }) => {
            anyhow::bail!(
                "embedding model serves dimension {} but the index expects {}",
                actual,
                expected
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, "Embedding service unavailable at startup");
        }
    }

    // L4 embedding cache; absence degrades to computing every embedding
    let embedding_cache = if settings.cache.enabled {
        match EmbeddingCache::connect(
            &settings.cache.redis_url,
            settings.cache.embedding_ttl,
            settings.embedding.dimension,
        )
        .await
        {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!(error = %e, "Embedding cache unavailable, continuing without it");
                None
            }
        }
    } else {
        None
    };

    let embedder: Arc<dyn Embedder> = Arc::new(CachedEmbedder::new(
        Arc::new(http_embedder),
        embedding_cache.clone(),
    ));

    // Vector store
    let store = QdrantStore::new(
        settings.vector_store.clone(),
        settings.embedding.dimension,
        settings.retrieval.dense_prefetch,
        settings.retrieval.sparse_prefetch,
    )?;
    if let Err(e) = store.ensure_collection().await {
        tracing::warn!(error = %e, "Vector store unavailable at startup");
    }
    let store: Arc<dyn SearchBackend> = Arc::new(store);

    // Query transformation
    let transformer = Arc::new(QueryTransformer::new(
        settings.transform.clone(),
        Some(llm.clone()),
        settings.retrieval.multi_query_variants,
    ));

    // Reranker: cross-encoder pass + LLM judge fine pass
    let cross_encoder = load_cross_encoder(&settings);
    let fine: Option<Arc<dyn policy_qa_rag::FineScorer>> = settings
        .rerank
        .enable_llm_reranking
        .then(|| Arc::new(LlmJudge::new(llm.clone())) as Arc<dyn policy_qa_rag::FineScorer>);
    let reranker = Arc::new(HybridReranker::new(
        cross_encoder,
        fine,
        settings.rerank.clone(),
    ));

    let retriever = Arc::new(AdaptiveRetriever::new(
        Arc::clone(&embedder),
        Arc::clone(&store),
        transformer,
        reranker,
        RetrieverConfig::from(&settings.retrieval),
    ));

    // Result cache (L1-L3)
    let result_cache = if settings.cache.enabled {
        match ResultCache::connect(settings.cache.clone()).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!(error = %e, "Result cache unavailable, continuing without it");
                None
            }
        }
    } else {
        None
    };

    // Prefetcher (L5)
    let prefetcher = if settings.prefetch.enabled {
        let prefetcher = QueryPrefetcher::new(Arc::clone(&retriever), settings.prefetch.clone());
        prefetcher.start();
        Some(prefetcher)
    } else {
        None
    };

    let generator = Arc::new(AnswerGenerator::new(
        llm.clone(),
        GenerationOptions::from_config(&settings.llm),
    ));

    Ok(Arc::new(RagEngine::new(
        settings,
        EngineComponents {
            retriever,
            generator,
            llm,
            store,
            embedder,
            result_cache,
            embedding_cache,
            prefetcher,
        },
    )))
}

/// Pick the cross-encoder implementation.
///
/// With the `onnx` feature, `retrieval.cross_encoder_model` may point
/// at an exported `.onnx` file (with a `tokenizer.json` beside it);
/// otherwise the lexical scorer stands in.
#[cfg(feature = "onnx")]
fn load_cross_encoder(settings: &Settings) -> Arc<dyn CrossEncoder> {
    use policy_qa_rag::OnnxCrossEncoder;
    use std::path::Path;

    let model_path = Path::new(&settings.retrieval.cross_encoder_model);
    if model_path.extension().is_some_and(|e| e == "onnx") {
        let tokenizer_path = model_path.with_file_name("tokenizer.json");
        match OnnxCrossEncoder::new(model_path, &tokenizer_path, 256) {
            Ok(encoder) => {
                tracing::info!(model = %model_path.display(), "ONNX cross-encoder loaded");
                return Arc::new(encoder);
            }
            Err(e) => {
                tracing::warn!(error = %e, "ONNX cross-encoder failed to load, using lexical scorer");
            }
        }
    }
    Arc::new(LexicalScorer)
}

#[cfg(not(feature = "onnx"))]
fn load_cross_encoder(_settings: &Settings) -> Arc<dyn CrossEncoder> {
    Arc::new(LexicalScorer)
}
