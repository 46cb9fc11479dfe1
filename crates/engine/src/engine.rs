//! RAG engine orchestrator
//!
//! Owns the component handles and runs the request pipeline:
//! fast cache lookup, context enrichment, adaptive retrieval, the
//! overlap-validated semantic cache (after retrieval, so candidates can
//! be checked against the fresh document set), grounded generation,
//! then best-effort cache/memory writes. A settings snapshot is taken
//! per request so live updates never mix stages.

use futures::Stream;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use policy_qa_config::Settings;
use policy_qa_core::{
    Answer, AnswerMetadata, Citation, Error, QueryMode, Result, RetrievalResult, StageTimer,
};
use policy_qa_llm::LlmClient;
use policy_qa_rag::{
    AdaptiveRetriever, Embedder, EmbeddingCache, RetrieverConfig, SearchBackend,
};

use crate::generator::AnswerGenerator;
use crate::memory::ConversationMemory;
use crate::prefetch::QueryPrefetcher;
use crate::result_cache::ResultCache;

/// Fixed answer when retrieval finds nothing
const NO_DOCUMENTS_ANSWER: &str =
    "I couldn't find any relevant documents to answer your question.";

/// A query request
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub mode: QueryMode,
    #[serde(default = "default_use_context")]
    pub use_context: bool,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

fn default_use_context() -> bool {
    true
}

/// Events emitted by a streaming query
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum QueryEvent {
    Sources(Vec<Citation>),
    Token(String),
    Metadata(AnswerMetadata),
    Done,
    Error(String),
}

/// Component handles owned by the engine
pub struct EngineComponents {
    pub retriever: Arc<AdaptiveRetriever>,
    pub generator: Arc<AnswerGenerator>,
    pub llm: LlmClient,
    pub store: Arc<dyn SearchBackend>,
    pub embedder: Arc<dyn Embedder>,
    pub result_cache: Option<ResultCache>,
    pub embedding_cache: Option<EmbeddingCache>,
    pub prefetcher: Option<Arc<QueryPrefetcher>>,
}

/// The query engine
pub struct RagEngine {
    settings: RwLock<Arc<Settings>>,
    initial_settings: Settings,
    retriever: Arc<AdaptiveRetriever>,
    generator: Arc<AnswerGenerator>,
    llm: LlmClient,
    store: Arc<dyn SearchBackend>,
    embedder: Arc<dyn Embedder>,
    result_cache: Option<ResultCache>,
    embedding_cache: Option<EmbeddingCache>,
    prefetcher: Option<Arc<QueryPrefetcher>>,
    memory: ConversationMemory,
}

impl RagEngine {
    pub fn new(settings: Settings, components: EngineComponents) -> Self {
        let memory = ConversationMemory::new(Some(components.llm.clone()));
        Self {
            settings: RwLock::new(Arc::new(settings.clone())),
            initial_settings: settings,
            retriever: components.retriever,
            generator: components.generator,
            llm: components.llm,
            store: components.store,
            embedder: components.embedder,
            result_cache: components.result_cache,
            embedding_cache: components.embedding_cache,
            prefetcher: components.prefetcher,
            memory,
        }
    }

    /// Immutable settings snapshot for one request
    pub fn settings(&self) -> Arc<Settings> {
        self.settings.read().clone()
    }

    /// Process a query end to end
    pub async fn query(&self, request: QueryRequest) -> Result<Answer> {
        let settings = self.settings();
        let mut timer = StageTimer::start();

        // Stage 1: fast cache layers (exact, normalized)
        timer.start_stage("cache_lookup");
        if settings.cache.enabled {
            if let Some(cache) = &self.result_cache {
                if let Some((mut answer, layer)) = cache.get_fast(&request.question).await {
                    timer.end_stage();
                    answer.metadata.cache_hit = true;
                    answer.metadata.cache_layer = Some(layer.to_string());
                    answer.metadata.mode = Some(request.mode);
                    let breakdown = timer.breakdown();
                    answer.metadata.processing_time_ms = breakdown.total_ms;
                    answer.metadata.timing_breakdown = breakdown;
                    metrics::counter!("query_cache_hits_total", "layer" => layer).increment(1);
                    return Ok(answer);
                }
            }
        }

        // Stage 2: context enrichment (retrieval only; the original
        // query stays authoritative everywhere else)
        timer.start_stage("context_enhancement");
        let enhanced_query = match (&request.conversation_id, request.use_context) {
            (Some(id), true) => self.memory.context_for(id, &request.question, 3).0,
            _ => request.question.clone(),
        };

        // Stage 3: retrieval
        timer.start_stage("retrieval");
        let retriever_config = RetrieverConfig::from(&settings.retrieval);
        let retrieval = match request.mode {
            QueryMode::Simple => {
                self.retriever
                    .retrieve_simple(&enhanced_query, settings.retrieval.final_k)
                    .await
            }
            QueryMode::Adaptive => {
                self.retriever
                    .retrieve_contextual(
                        &request.question,
                        &enhanced_query,
                        settings.retrieval.final_k,
                        &retriever_config,
                    )
                    .await
            }
        }
        .map_err(Error::from)?;
        timer.end_stage();

        self.observe_for_prefetch(&request.question);

        if retrieval.is_empty() {
            return Ok(self.no_documents_answer(&request, &retrieval, timer));
        }

        let doc_ids = retrieval.doc_ids();

        // Stage 4: semantic cache, only now that the fresh document
        // set exists to validate candidates against
        timer.start_stage("semantic_cache");
        let query_embedding = if settings.cache.enabled && self.result_cache.is_some() {
            self.retriever.embed_query(&request.question).await.ok()
        } else {
            None
        };

        if let (Some(cache), Some(embedding)) = (&self.result_cache, &query_embedding) {
            if let Some(mut answer) = cache.get_semantic(embedding, &doc_ids).await {
                timer.end_stage();
                answer.metadata.cache_hit = true;
                answer.metadata.cache_layer = Some("semantic".to_string());
                answer.metadata.mode = Some(request.mode);
                let breakdown = timer.breakdown();
                answer.metadata.processing_time_ms = breakdown.total_ms;
                answer.metadata.timing_breakdown = breakdown;
                metrics::counter!("query_cache_hits_total", "layer" => "semantic").increment(1);
                return Ok(answer);
            }
            cache.record_miss();
        }

        // Stage 5: grounded generation
        timer.start_stage("answer_generation");
        let generated = self
            .generator
            .generate(&request.question, &retrieval)
            .await
            .map_err(Error::from)?;
        timer.end_stage();

        // Stage 6: best-effort post-processing
        timer.start_stage("post_processing");
        if let Some(id) = &request.conversation_id {
            self.memory
                .add(
                    id,
                    &request.question,
                    &generated.text,
                    doc_ids.clone(),
                    retrieval.query_type,
                    Some(retrieval.strategy.as_str().to_string()),
                )
                .await;
        }

        let mut answer = self.assemble_answer(&request, &retrieval, generated.text, generated.citations, timer);

        if settings.cache.enabled && !generated.cancelled {
            if let Some(cache) = &self.result_cache {
                cache
                    .put(
                        &request.question,
                        &answer,
                        query_embedding.as_deref(),
                        Some(&doc_ids),
                    )
                    .await;
            }
        }

        answer.metadata.cache_hit = false;
        metrics::histogram!("query_duration_ms").record(answer.metadata.processing_time_ms);
        Ok(answer)
    }

    /// Process a query with streamed events: sources, tokens, metadata,
    /// then done. Dropping the stream cancels generation at the next
    /// token boundary and suppresses cache writes.
    pub fn query_stream(
        self: Arc<Self>,
        request: QueryRequest,
    ) -> impl Stream<Item = QueryEvent> {
        async_stream::stream! {
            let settings = self.settings();
            let mut timer = StageTimer::start();

            // Fast cache layers replay the whole answer
            timer.start_stage("cache_lookup");
            if settings.cache.enabled {
                if let Some(cache) = &self.result_cache {
                    if let Some((mut answer, layer)) = cache.get_fast(&request.question).await {
                        timer.end_stage();
                        answer.metadata.cache_hit = true;
                        answer.metadata.cache_layer = Some(layer.to_string());
                        answer.metadata.mode = Some(request.mode);
                        let breakdown = timer.breakdown();
                        answer.metadata.processing_time_ms = breakdown.total_ms;
                        answer.metadata.timing_breakdown = breakdown;

                        yield QueryEvent::Sources(answer.citations.clone());
                        yield QueryEvent::Token(answer.text.clone());
                        yield QueryEvent::Metadata(answer.metadata.clone());
                        yield QueryEvent::Done;
                        return;
                    }
                }
            }

            timer.start_stage("context_enhancement");
            let enhanced_query = match (&request.conversation_id, request.use_context) {
                (Some(id), true) => self.memory.context_for(id, &request.question, 3).0,
                _ => request.question.clone(),
            };

            timer.start_stage("retrieval");
            let retriever_config = RetrieverConfig::from(&settings.retrieval);
            let retrieval = match request.mode {
                QueryMode::Simple => {
                    self.retriever
                        .retrieve_simple(&enhanced_query, settings.retrieval.final_k)
                        .await
                }
                QueryMode::Adaptive => {
                    self.retriever
                        .retrieve_contextual(
                            &request.question,
                            &enhanced_query,
                            settings.retrieval.final_k,
                            &retriever_config,
                        )
                        .await
                }
            };
            timer.end_stage();

            let retrieval = match retrieval {
                Ok(retrieval) => retrieval,
                Err(e) => {
                    yield QueryEvent::Error(e.to_string());
                    return;
                }
            };

            self.observe_for_prefetch(&request.question);

            if retrieval.is_empty() {
                let answer = self.no_documents_answer(&request, &retrieval, timer);
                yield QueryEvent::Sources(Vec::new());
                yield QueryEvent::Token(answer.text.clone());
                yield QueryEvent::Metadata(answer.metadata.clone());
                yield QueryEvent::Done;
                return;
            }

            let doc_ids = retrieval.doc_ids();

            timer.start_stage("semantic_cache");
            let query_embedding = if settings.cache.enabled && self.result_cache.is_some() {
                self.retriever.embed_query(&request.question).await.ok()
            } else {
                None
            };

            if let (Some(cache), Some(embedding)) = (&self.result_cache, &query_embedding) {
                if let Some(mut answer) = cache.get_semantic(embedding, &doc_ids).await {
                    timer.end_stage();
                    answer.metadata.cache_hit = true;
                    answer.metadata.cache_layer = Some("semantic".to_string());
                    answer.metadata.mode = Some(request.mode);
                    let breakdown = timer.breakdown();
                    answer.metadata.processing_time_ms = breakdown.total_ms;
                    answer.metadata.timing_breakdown = breakdown;

                    yield QueryEvent::Sources(answer.citations.clone());
                    yield QueryEvent::Token(answer.text.clone());
                    yield QueryEvent::Metadata(answer.metadata.clone());
                    yield QueryEvent::Done;
                    return;
                }
                cache.record_miss();
            }

            // Sources go out before generation starts
            yield QueryEvent::Sources(AnswerGenerator::sources(&retrieval, retrieval.query_type));

            timer.start_stage("answer_generation");
            let (token_tx, mut token_rx) = mpsc::channel::<String>(32);
            let generator = Arc::clone(&self.generator);
            let question = request.question.clone();
            let retrieval_for_task = retrieval.clone();

            let generation = tokio::spawn(async move {
                generator
                    .generate_stream(&question, &retrieval_for_task, token_tx)
                    .await
            });

            while let Some(token) = token_rx.recv().await {
                yield QueryEvent::Token(token);
            }

            let generated = match generation.await {
                Ok(Ok(generated)) => generated,
                Ok(Err(e)) => {
                    yield QueryEvent::Error(Error::from(e).to_string());
                    return;
                }
                Err(e) => {
                    yield QueryEvent::Error(format!("generation task failed: {}", e));
                    return;
                }
            };
            timer.end_stage();

            timer.start_stage("post_processing");
            if let Some(id) = &request.conversation_id {
                self.memory
                    .add(
                        id,
                        &request.question,
                        &generated.text,
                        doc_ids.clone(),
                        retrieval.query_type,
                        Some(retrieval.strategy.as_str().to_string()),
                    )
                    .await;
            }

            let cancelled = generated.cancelled;
            let answer = self.assemble_answer(
                &request,
                &retrieval,
                generated.text,
                generated.citations,
                timer,
            );

            if settings.cache.enabled && !cancelled {
                if let Some(cache) = &self.result_cache {
                    cache
                        .put(&request.question, &answer, query_embedding.as_deref(), Some(&doc_ids))
                        .await;
                }
            }

            yield QueryEvent::Metadata(answer.metadata.clone());
            yield QueryEvent::Done;
        }
    }

    fn assemble_answer(
        &self,
        request: &QueryRequest,
        retrieval: &RetrievalResult,
        text: String,
        citations: Vec<Citation>,
        timer: StageTimer,
    ) -> Answer {
        let breakdown = timer.breakdown();
        Answer {
            text,
            citations,
            metadata: AnswerMetadata {
                strategy: Some(retrieval.strategy.as_str().to_string()),
                query_type: retrieval.query_type,
                mode: Some(request.mode),
                cache_hit: false,
                cache_layer: None,
                processing_time_ms: breakdown.total_ms,
                timing_breakdown: breakdown,
                error_kind: None,
            },
            error: false,
        }
    }

    fn no_documents_answer(
        &self,
        request: &QueryRequest,
        retrieval: &RetrievalResult,
        timer: StageTimer,
    ) -> Answer {
        // Not an error, and never cached
        self.assemble_answer(
            request,
            retrieval,
            NO_DOCUMENTS_ANSWER.to_string(),
            Vec::new(),
            timer,
        )
    }

    fn observe_for_prefetch(&self, question: &str) {
        if let Some(prefetcher) = &self.prefetcher {
            prefetcher.on_query_observed(question);
        }
    }

    /// Clear one conversation's memory
    pub fn clear_conversation(&self, conversation_id: &str) -> bool {
        self.memory.clear(conversation_id)
    }

    /// Merge a JSON patch into the live settings, validate and swap
    pub fn update_settings(&self, patch: serde_json::Value) -> Result<Arc<Settings>> {
        let current = self.settings();
        let mut merged = serde_json::to_value(&*current)
            .map_err(|e| Error::Internal(e.to_string()))?;
        merge_json(&mut merged, patch);

        let updated: Settings = serde_json::from_value(merged)
            .map_err(|e| Error::InvalidInput(format!("invalid settings: {}", e)))?;
        updated
            .validate()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;

        let updated = Arc::new(updated);
        *self.settings.write() = updated.clone();
        tracing::info!("Settings updated");
        Ok(updated)
    }

    /// Restore the settings loaded at startup
    pub fn reset_settings(&self) -> Arc<Settings> {
        let initial = Arc::new(self.initial_settings.clone());
        *self.settings.write() = initial.clone();
        tracing::info!("Settings reset to startup values");
        initial
    }

    /// Combined cache and prefetch statistics
    pub fn cache_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "result_cache": self.result_cache.as_ref().map(ResultCache::stats),
            "embedding_cache": self.embedding_cache.as_ref().map(EmbeddingCache::stats),
            "prefetch": self.prefetcher.as_ref().map(|p| p.metrics()),
        })
    }

    /// Invalidate a single text in both caches
    pub async fn cache_invalidate(&self, text: &str) {
        if let Some(cache) = &self.result_cache {
            cache.invalidate(text).await;
        }
        if let Some(cache) = &self.embedding_cache {
            cache.invalidate(text).await;
        }
    }

    /// Destructive, global clear of the result cache
    pub async fn cache_clear_all(&self) {
        if let Some(cache) = &self.result_cache {
            cache.clear_all().await;
        }
    }

    /// Per-component health report
    pub async fn health(&self) -> serde_json::Value {
        let vector_store = self.store.healthy().await;
        let llm = self.llm.is_available().await;
        let embedding = self.embedder.healthy().await;
        let cache = match &self.result_cache {
            Some(cache) => {
                if cache.is_available().await {
                    "ok"
                } else {
                    "down"
                }
            }
            None => "disabled",
        };

        let core_ready = vector_store && llm && embedding;
        serde_json::json!({
            "status": if core_ready { "ok" } else { "degraded" },
            "components": {
                "vector_store": if vector_store { "ok" } else { "down" },
                "llm": if llm { "ok" } else { "down" },
                "embedding": if embedding { "ok" } else { "down" },
                "cache": cache,
            }
        })
    }
}

/// Deep-merge `patch` into `base`; objects merge recursively, anything
/// else replaces.
fn merge_json(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, patch_value) => *base_slot = patch_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_json_nested() {
        let mut base = serde_json::json!({
            "retrieval": {"final_k": 8, "initial_k": 100},
            "cache": {"enabled": true}
        });
        merge_json(
            &mut base,
            serde_json::json!({"retrieval": {"final_k": 5}}),
        );
        assert_eq!(base["retrieval"]["final_k"], 5);
        assert_eq!(base["retrieval"]["initial_k"], 100);
        assert_eq!(base["cache"]["enabled"], true);
    }

    #[test]
    fn test_merge_json_replaces_scalars() {
        let mut base = serde_json::json!({"a": 1});
        merge_json(&mut base, serde_json::json!({"a": {"b": 2}}));
        assert_eq!(base["a"]["b"], 2);
    }

    #[test]
    fn test_query_request_defaults() {
        let request: QueryRequest =
            serde_json::from_str(r#"{"question": "beards?"}"#).unwrap();
        assert_eq!(request.mode, QueryMode::Adaptive);
        assert!(request.use_context);
        assert!(request.conversation_id.is_none());
    }

    #[test]
    fn test_query_event_wire_shape() {
        let event = QueryEvent::Token("hel".to_string());
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"token","content":"hel"}"#);

        let done = serde_json::to_string(&QueryEvent::Done).unwrap();
        assert_eq!(done, r#"{"type":"done"}"#);
    }
}
