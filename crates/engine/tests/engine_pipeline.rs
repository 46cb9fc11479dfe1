//! End-to-end pipeline tests over in-memory mock components
//!
//! Exercises the full query path (transform, search, fusion, rerank,
//! generation, post-processing) without external services.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;

use policy_qa_config::{PrefetchConfig, RerankConfig, Settings};
use policy_qa_core::{Document, QueryMode};
use policy_qa_engine::{
    AnswerGenerator, EngineComponents, QueryEvent, QueryPrefetcher, QueryRequest, RagEngine,
};
use policy_qa_llm::{
    FinishReason, GenerationOptions, GenerationResult, LlmBackend, LlmClient, LlmError,
};
use policy_qa_rag::{
    AdaptiveRetriever, Embedder, FusionMethod, HybridReranker, LexicalScorer, LlmJudge,
    QueryTransformer, RagError, RetrieverConfig, ScoredDocument, SearchBackend, SearchFilter,
};

/// Deterministic embedder: tiny vectors derived from the text bytes
struct MockEmbedder;

fn pseudo_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; 8];
    for (i, byte) in text.bytes().enumerate() {
        vector[i % 8] += byte as f32 / 255.0;
    }
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        Ok(pseudo_embedding(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Ok(texts.iter().map(|t| pseudo_embedding(t)).collect())
    }

    fn dimension(&self) -> usize {
        8
    }
}

/// In-memory store scoring documents by keyword overlap with the query
struct MockStore {
    documents: Vec<Document>,
}

impl MockStore {
    fn overlap(query: &str, content: &str) -> f32 {
        let query_lower = query.to_lowercase();
        let content_lower = content.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return 0.0;
        }
        let hits = terms
            .iter()
            .filter(|t| t.len() > 2 && content_lower.contains(**t))
            .count();
        hits as f32 / terms.len() as f32
    }

    fn ranked(&self, query_text: &str, k: usize) -> Vec<ScoredDocument> {
        let mut hits: Vec<ScoredDocument> = self
            .documents
            .iter()
            .map(|doc| ScoredDocument {
                document: doc.clone(),
                score: Self::overlap(query_text, &doc.content),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        hits.truncate(k);
        hits
    }
}

#[async_trait]
impl SearchBackend for MockStore {
    async fn search_dense(
        &self,
        _vector: &[f32],
        k: usize,
        _filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredDocument>, RagError> {
        // Dense ranking is opaque here: fixed order, descending scores
        Ok(self
            .documents
            .iter()
            .take(k)
            .enumerate()
            .map(|(i, doc)| ScoredDocument {
                document: doc.clone(),
                score: 1.0 - i as f32 * 0.05,
            })
            .collect())
    }

    async fn search_sparse(
        &self,
        query_text: &str,
        k: usize,
        _filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredDocument>, RagError> {
        Ok(self.ranked(query_text, k))
    }

    async fn hybrid_search(
        &self,
        _vector: &[f32],
        query_text: &str,
        k: usize,
        _filter: Option<&SearchFilter>,
        _fusion: FusionMethod,
    ) -> Result<Vec<ScoredDocument>, RagError> {
        Ok(self.ranked(query_text, k))
    }

    fn supports_hybrid(&self) -> bool {
        true
    }
}

/// Scripted LLM: answers by prompt kind
struct MockLlm {
    refuse: bool,
    answer: String,
}

impl MockLlm {
    fn respond(&self, prompt: &str) -> String {
        if prompt.contains("Classify the question") {
            return "factual".to_string();
        }
        if prompt.contains("Write a short passage") {
            return "Members may request a shaving waiver through their medical provider."
                .to_string();
        }
        if prompt.contains("Rate each on a scale") {
            return "8.0, 6.5, 5.0, 4.0, 3.0".to_string();
        }
        if prompt.contains("rate how relevant") {
            return "7".to_string();
        }
        if prompt.contains("Summarize the following exchanges") {
            return "Earlier questions covered grooming waivers.".to_string();
        }
        if self.refuse {
            return "The answer is not found in the provided sources.".to_string();
        }
        self.answer.clone()
    }
}

#[async_trait]
impl LlmBackend for MockLlm {
    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<GenerationResult, LlmError> {
        let text = self.respond(prompt);
        Ok(GenerationResult {
            tokens: text.split_whitespace().count(),
            text,
            time_to_first_token_ms: 1,
            total_time_ms: 2,
            tokens_per_second: 10.0,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError> {
        let text = self.respond(prompt);
        let mut cancelled = false;
        for word in text.split_inclusive(' ') {
            if tx.send(word.to_string()).await.is_err() {
                cancelled = true;
                break;
            }
        }
        Ok(GenerationResult {
            tokens: text.split_whitespace().count(),
            text,
            time_to_first_token_ms: 1,
            total_time_ms: 2,
            tokens_per_second: 10.0,
            finish_reason: if cancelled {
                FinishReason::Cancelled
            } else {
                FinishReason::Stop
            },
        })
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

fn corpus() -> Vec<Document> {
    vec![
        Document::new(
            "doc-beards-1",
            "Beards are authorized only with an approved shaving waiver. Members must \
             present the waiver to their commander.",
        )
        .with_meta("file_name", "dafi36-2903.pdf"),
        Document::new(
            "doc-beards-2",
            "Shaving waiver renewal procedures require a medical evaluation every five years.",
        )
        .with_meta("file_name", "dafi36-2903.pdf"),
        Document::new(
            "doc-fitness-1",
            "Fitness assessments are required annually for all members scoring above 75.",
        )
        .with_meta("file_name", "dafman36-2905.pdf"),
        Document::new(
            "doc-fitness-2",
            "Members scoring below 75 on the fitness assessment retest every six months.",
        )
        .with_meta("file_name", "dafman36-2905.pdf"),
        Document::new(
            "doc-uniform-1",
            "Uniform wear standards apply during official travel and duty hours.",
        )
        .with_meta("file_name", "dafi36-2903.pdf"),
    ]
}

fn build_engine(llm_backend: MockLlm, documents: Vec<Document>) -> Arc<RagEngine> {
    let llm = LlmClient::spawn(Arc::new(llm_backend), 16);
    let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder);
    let store: Arc<dyn SearchBackend> = Arc::new(MockStore { documents });

    let settings = Settings::default();

    let transformer = Arc::new(QueryTransformer::new(
        settings.transform.clone(),
        Some(llm.clone()),
        settings.retrieval.multi_query_variants,
    ));

    let reranker = Arc::new(HybridReranker::new(
        Arc::new(LexicalScorer),
        Some(Arc::new(LlmJudge::new(llm.clone()))),
        RerankConfig::default(),
    ));

    let retriever_config = RetrieverConfig {
        initial_k: 10,
        rerank_k: 5,
        final_k: 3,
        ..RetrieverConfig::default()
    };

    let retriever = Arc::new(AdaptiveRetriever::new(
        Arc::clone(&embedder),
        Arc::clone(&store),
        transformer,
        reranker,
        retriever_config,
    ));

    let generator = Arc::new(AnswerGenerator::new(
        llm.clone(),
        GenerationOptions::default(),
    ));

    let prefetcher = QueryPrefetcher::new(Arc::clone(&retriever), PrefetchConfig::default());

    let mut settings = settings;
    settings.cache.enabled = false;
    settings.retrieval.final_k = 3;

    Arc::new(RagEngine::new(
        settings,
        EngineComponents {
            retriever,
            generator,
            llm,
            store,
            embedder,
            result_cache: None,
            embedding_cache: None,
            prefetcher: Some(prefetcher),
        },
    ))
}

fn request(question: &str) -> QueryRequest {
    QueryRequest {
        question: question.to_string(),
        mode: QueryMode::Adaptive,
        use_context: false,
        conversation_id: None,
    }
}

#[tokio::test]
async fn test_answer_carries_citations_from_retrieval() {
    let engine = build_engine(
        MockLlm {
            refuse: false,
            answer: "Beards require an approved shaving waiver [1].".to_string(),
        },
        corpus(),
    );

    let answer = engine
        .query(request("What are the rules for beards waiver?"))
        .await
        .unwrap();

    assert!(!answer.error);
    assert!(!answer.citations.is_empty());
    assert!(!answer.metadata.cache_hit);
    assert!(answer.metadata.strategy.is_some());

    // Every citation document came from the corpus
    let corpus_ids: Vec<String> = corpus().iter().map(|d| d.id.clone()).collect();
    for citation in &answer.citations {
        assert!(corpus_ids.contains(&citation.document_id));
    }
}

#[tokio::test]
async fn test_unknown_citation_indices_are_stripped() {
    let engine = build_engine(
        MockLlm {
            refuse: false,
            answer: "Waivers are required [1], see also [9].".to_string(),
        },
        corpus(),
    );

    let answer = engine
        .query(request("What are the rules for beards waiver?"))
        .await
        .unwrap();

    assert!(answer.text.contains("[1]"));
    assert!(!answer.text.contains("[9]"));
}

#[tokio::test]
async fn test_out_of_corpus_question_refuses_without_citations() {
    let engine = build_engine(
        MockLlm {
            refuse: true,
            answer: String::new(),
        },
        corpus(),
    );

    let answer = engine
        .query(request("What is the capital of France?"))
        .await
        .unwrap();

    assert!(!answer.error);
    assert!(answer.text.to_lowercase().contains("not found in the provided sources"));
    assert!(answer.citations.is_empty());
}

#[tokio::test]
async fn test_empty_corpus_returns_fixed_answer() {
    let engine = build_engine(
        MockLlm {
            refuse: false,
            answer: "irrelevant".to_string(),
        },
        Vec::new(),
    );

    let answer = engine.query(request("anything at all?")).await.unwrap();

    assert!(!answer.error);
    assert!(answer.text.contains("couldn't find any relevant documents"));
    assert!(answer.citations.is_empty());
}

#[tokio::test]
async fn test_vague_query_uses_multi_query_fusion() {
    let engine = build_engine(
        MockLlm {
            refuse: false,
            answer: "Fitness assessments are annual [1].".to_string(),
        },
        corpus(),
    );

    let answer = engine
        .query(request("how often is fitness required"))
        .await
        .unwrap();

    assert_eq!(answer.metadata.strategy.as_deref(), Some("multi_query"));
}

#[tokio::test]
async fn test_simple_mode_skips_transformation() {
    let engine = build_engine(
        MockLlm {
            refuse: false,
            answer: "Answer [1].".to_string(),
        },
        corpus(),
    );

    let mut req = request("what are fitness requirements");
    req.mode = QueryMode::Simple;
    let answer = engine.query(req).await.unwrap();

    assert_eq!(answer.metadata.strategy.as_deref(), Some("simple_dense"));
}

#[tokio::test]
async fn test_stream_event_order() {
    let engine = build_engine(
        MockLlm {
            refuse: false,
            answer: "Waivers are required for beards [1].".to_string(),
        },
        corpus(),
    );

    let stream = engine.query_stream(request("What are the rules for beards waiver?"));
    futures::pin_mut!(stream);

    let mut kinds = Vec::new();
    let mut token_count = 0usize;
    while let Some(event) = stream.next().await {
        match event {
            QueryEvent::Sources(sources) => {
                kinds.push("sources");
                assert!(!sources.is_empty());
            }
            QueryEvent::Token(_) => {
                if kinds.last() != Some(&"token") {
                    kinds.push("token");
                }
                token_count += 1;
            }
            QueryEvent::Metadata(_) => kinds.push("metadata"),
            QueryEvent::Done => kinds.push("done"),
            QueryEvent::Error(e) => panic!("unexpected error event: {}", e),
        }
    }

    assert_eq!(kinds, vec!["sources", "token", "metadata", "done"]);
    assert!(token_count > 1);
}

#[tokio::test]
async fn test_conversation_memory_roundtrip() {
    let engine = build_engine(
        MockLlm {
            refuse: false,
            answer: "Waivers last five years [1].".to_string(),
        },
        corpus(),
    );

    let mut req = request("How long does a shaving waiver last?");
    req.conversation_id = Some("conv-1".to_string());
    req.use_context = true;
    engine.query(req).await.unwrap();

    // The conversation now exists and can be cleared exactly once
    assert!(engine.clear_conversation("conv-1"));
    assert!(!engine.clear_conversation("conv-1"));
}

#[tokio::test]
async fn test_settings_update_and_reset() {
    let engine = build_engine(
        MockLlm {
            refuse: false,
            answer: "x".to_string(),
        },
        corpus(),
    );

    let updated = engine
        .update_settings(serde_json::json!({"retrieval": {"final_k": 5}}))
        .unwrap();
    assert_eq!(updated.retrieval.final_k, 5);

    // Invalid patches are rejected and leave settings untouched
    let rejected = engine.update_settings(serde_json::json!({"retrieval": {"final_k": 0}}));
    assert!(rejected.is_err());
    assert_eq!(engine.settings().retrieval.final_k, 5);

    let reset = engine.reset_settings();
    assert_eq!(reset.retrieval.final_k, 3);
}

#[tokio::test]
async fn test_sparse_search_contract() {
    let store = MockStore {
        documents: corpus(),
    };
    let hits = store
        .search_sparse("fitness assessment", 3, None)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.len() <= 3);
    // Ordered non-increasing
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn test_batch_embedding_matches_single() {
    let embedder = MockEmbedder;
    let texts = vec![
        "beard waiver".to_string(),
        "fitness assessment".to_string(),
        "uniform standards".to_string(),
    ];
    let batch = embedder.embed_batch(&texts).await.unwrap();
    assert_eq!(batch.len(), texts.len());
    for (text, vector) in texts.iter().zip(&batch) {
        let single = embedder.embed(text).await.unwrap();
        assert_eq!(&single, vector);
    }
}

#[tokio::test]
async fn test_health_reports_components() {
    let engine = build_engine(
        MockLlm {
            refuse: false,
            answer: "x".to_string(),
        },
        corpus(),
    );

    let health = engine.health().await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["components"]["llm"], "ok");
    assert_eq!(health["components"]["cache"], "disabled");
}
