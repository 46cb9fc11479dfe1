//! Query prefetcher (L5)
//!
//! Predicts likely follow-up queries from the conversation stream and
//! warms the embedding cache in the background so the next real query
//! is a cache hit. Observation never blocks the request path; workers
//! drop to the most permissive priority current capacity allows, and
//! overflow drops work instead of queueing unboundedly.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

use policy_qa_config::constants::prefetch as defaults;
use policy_qa_config::PrefetchConfig;
use policy_qa_core::{text_hash, QueryClass};
use policy_qa_rag::{AdaptiveRetriever, QueryClassifier};

/// Priority bands for prefetch execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefetchPriority {
    High,
    Medium,
    Low,
}

impl PrefetchPriority {
    fn from_confidence(confidence: f32) -> Self {
        if confidence >= defaults::HIGH_CONFIDENCE {
            PrefetchPriority::High
        } else if confidence >= defaults::MEDIUM_CONFIDENCE {
            PrefetchPriority::Medium
        } else {
            PrefetchPriority::Low
        }
    }
}

/// A queued prediction
#[derive(Debug, Clone)]
struct PrefetchTask {
    query: String,
    priority: PrefetchPriority,
}

#[derive(Default)]
struct Queues {
    high: VecDeque<PrefetchTask>,
    medium: VecDeque<PrefetchTask>,
    low: VecDeque<PrefetchTask>,
}

#[derive(Debug, Default, Clone)]
struct MetricsInner {
    total_predictions: u64,
    total_prefetches: u64,
    successful_hits: u64,
    failed_prefetches: u64,
    dropped_tasks: u64,
}

/// Prefetch metrics snapshot
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PrefetchMetricsSnapshot {
    pub total_predictions: u64,
    pub total_prefetches: u64,
    pub successful_hits: u64,
    pub failed_prefetches: u64,
    pub dropped_tasks: u64,
    pub queued_high: usize,
    pub queued_medium: usize,
    pub queued_low: usize,
    pub active_tasks: usize,
}

/// Analyzes the query stream and produces predictions
struct PatternAnalyzer {
    classifier: QueryClassifier,
}

impl PatternAnalyzer {
    const STOPWORDS: &'static [&'static str] = &[
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in",
        "is", "it", "its", "of", "on", "that", "the", "to", "was", "will", "with", "you",
        "your", "i", "me", "my", "we", "our", "can", "could", "would", "should", "do",
        "does", "did", "have", "had", "what", "when", "where", "who", "which", "why", "how",
        "about", "more", "tell", "give",
    ];

    fn new() -> Self {
        Self {
            classifier: QueryClassifier::new(),
        }
    }

    /// Follow-up templates per classification; `{K}` and `{K2}` are
    /// filled with extracted keywords.
    fn templates(query_type: QueryClass) -> &'static [&'static str] {
        match query_type {
            QueryClass::Clarification => &[
                "What do you mean by {K}?",
                "Can you explain {K} in more detail?",
                "What exactly is {K}?",
            ],
            QueryClass::Elaboration => &[
                "Tell me more about {K}",
                "Can you expand on {K}?",
                "What are more details about {K}?",
            ],
            QueryClass::Example => &[
                "Can you give an example of {K}?",
                "What's a specific example of {K}?",
            ],
            QueryClass::Comparison => &[
                "How does {K} compare to {K2}?",
                "What's the difference between {K} and {K2}?",
            ],
            QueryClass::Procedure => &[
                "How do I {K}?",
                "What are the steps to {K}?",
            ],
            QueryClass::Definition => &["What is {K}?", "Define {K}"],
            QueryClass::Factual => &["How often is {K} required?", "When is {K} required?"],
            _ => &["Tell me more about {K}"],
        }
    }

    /// Likely follow-up classes, forming a small transition graph
    fn follow_up_types(current: QueryClass) -> &'static [QueryClass] {
        match current {
            QueryClass::Definition => &[QueryClass::Elaboration, QueryClass::Example],
            QueryClass::Elaboration => &[QueryClass::Example, QueryClass::Clarification],
            QueryClass::Example => &[QueryClass::Procedure, QueryClass::Comparison],
            QueryClass::Procedure => &[QueryClass::Clarification, QueryClass::Example],
            QueryClass::Comparison => &[QueryClass::Clarification, QueryClass::Elaboration],
            QueryClass::Clarification => &[QueryClass::Elaboration, QueryClass::Example],
            QueryClass::FollowUp => &[QueryClass::Elaboration, QueryClass::Example],
            QueryClass::Factual => &[QueryClass::Elaboration, QueryClass::Procedure],
            QueryClass::Complex => &[QueryClass::Clarification, QueryClass::Elaboration],
            QueryClass::NewTopic => &[QueryClass::Definition, QueryClass::Elaboration],
        }
    }

    /// Base confidence by classification specificity
    fn base_confidence(query_type: QueryClass) -> f32 {
        match query_type {
            QueryClass::Clarification => 0.8,
            QueryClass::Elaboration => 0.75,
            QueryClass::Example => 0.7,
            QueryClass::Procedure => 0.7,
            QueryClass::Comparison => 0.65,
            QueryClass::Definition => 0.65,
            QueryClass::FollowUp => 0.6,
            QueryClass::Factual => 0.6,
            QueryClass::Complex => 0.5,
            QueryClass::NewTopic => 0.3,
        }
    }

    /// Frequency-based keyword extraction over the query plus recent
    /// history; top 5 alphabetic non-stopwords longer than 3 chars.
    fn extract_keywords(query: &str, history: &[String]) -> Vec<String> {
        let stopwords: std::collections::HashSet<&str> =
            Self::STOPWORDS.iter().copied().collect();

        let recent: Vec<&str> = history
            .iter()
            .rev()
            .take(3)
            .map(String::as_str)
            .collect();

        let mut text = query.to_lowercase();
        for h in recent {
            text.push(' ');
            text.push_str(&h.to_lowercase());
        }

        let mut freq: HashMap<String, (usize, usize)> = HashMap::new();
        for (position, word) in text.split_whitespace().enumerate() {
            let word: String = word.chars().filter(|c| c.is_alphabetic()).collect();
            if word.len() > 3 && !stopwords.contains(word.as_str()) {
                let entry = freq.entry(word).or_insert((0, position));
                entry.0 += 1;
            }
        }

        let mut ranked: Vec<(String, (usize, usize))> = freq.into_iter().collect();
        // Most frequent first; earliest occurrence breaks ties
        ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
        ranked.into_iter().take(5).map(|(word, _)| word).collect()
    }

    /// Predict follow-up queries and a confidence for them
    fn predict(
        &self,
        query: &str,
        history: &[String],
        max_predictions: usize,
    ) -> (Vec<String>, f32) {
        let query_type = self.classifier.classify(query);
        let keywords = Self::extract_keywords(query, history);

        if keywords.is_empty() {
            return (Vec::new(), 0.1);
        }

        let mut predictions = Vec::new();

        for template in Self::templates(query_type) {
            if predictions.len() >= max_predictions {
                break;
            }
            if let Some(filled) = fill_template(template, &keywords) {
                predictions.push(filled);
            }
        }

        for follow_type in Self::follow_up_types(query_type) {
            if predictions.len() >= max_predictions {
                break;
            }
            if let Some(template) = Self::templates(*follow_type).first() {
                if let Some(filled) = fill_template(template, &keywords) {
                    if !predictions.contains(&filled) {
                        predictions.push(filled);
                    }
                }
            }
        }

        let keyword_factor = (keywords.len() as f32 / 5.0).min(1.0) * 0.2;
        let context_factor = (history.len() as f32 / 5.0).min(1.0) * 0.1;
        let confidence =
            (Self::base_confidence(query_type) + keyword_factor + context_factor).min(1.0);

        (predictions, confidence)
    }
}

/// Fill a template; comparison templates need two keywords
fn fill_template(template: &str, keywords: &[String]) -> Option<String> {
    if template.contains("{K2}") {
        if keywords.len() < 2 {
            return None;
        }
        Some(
            template
                .replace("{K}", &keywords[0])
                .replace("{K2}", &keywords[1]),
        )
    } else {
        keywords.first().map(|k| template.replace("{K}", k))
    }
}

struct Predicted {
    executed: bool,
}

/// Background query prefetcher
pub struct QueryPrefetcher {
    analyzer: PatternAnalyzer,
    retriever: Arc<AdaptiveRetriever>,
    config: PrefetchConfig,
    history: Mutex<VecDeque<String>>,
    queues: Mutex<Queues>,
    predicted: DashMap<String, Predicted>,
    active: Arc<AtomicUsize>,
    metrics: Mutex<MetricsInner>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
}

impl QueryPrefetcher {
    pub fn new(retriever: Arc<AdaptiveRetriever>, config: PrefetchConfig) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            analyzer: PatternAnalyzer::new(),
            retriever,
            config,
            history: Mutex::new(VecDeque::new()),
            queues: Mutex::new(Queues::default()),
            predicted: DashMap::new(),
            active: Arc::new(AtomicUsize::new(0)),
            metrics: Mutex::new(MetricsInner::default()),
            wake: Notify::new(),
            shutdown,
        })
    }

    /// Start the background dispatcher
    pub fn start(self: &Arc<Self>) {
        let prefetcher = Arc::clone(self);
        tokio::spawn(async move {
            prefetcher.dispatch_loop().await;
        });
        tracing::info!(
            max_concurrent = self.config.max_concurrent,
            window_size = self.config.window_size,
            "Prefetch worker started"
        );
    }

    /// Stop the dispatcher; queued work is abandoned
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        self.wake.notify_waiters();
        tracing::info!("Prefetch worker stopped");
    }

    /// Observe a real query: attribute prefetch hits, extend the
    /// history window, and enqueue predictions. Purely in-memory; never
    /// blocks the request path.
    pub fn on_query_observed(&self, query: &str) {
        // Hit attribution against still-tracked predictions
        let hash = hash_query(query);
        if let Some(entry) = self.predicted.get(&hash) {
            if entry.executed {
                self.metrics.lock().successful_hits += 1;
                metrics::counter!("prefetch_hits_total").increment(1);
                tracing::info!(query = %truncate(query, 50), "Prefetch hit");
            }
        }

        let history: Vec<String> = {
            let mut history = self.history.lock();
            history.push_back(query.to_string());
            while history.len() > self.config.window_size {
                history.pop_front();
            }
            history.iter().cloned().collect()
        };

        if !self.config.enabled {
            return;
        }

        let (predictions, confidence) = self.analyzer.predict(query, &history, 3);
        self.metrics.lock().total_predictions += 1;

        if predictions.is_empty() {
            return;
        }

        let priority = PrefetchPriority::from_confidence(confidence);
        tracing::debug!(
            count = predictions.len(),
            confidence,
            ?priority,
            "Queueing prefetch predictions"
        );

        for prediction in predictions {
            self.predicted
                .insert(hash_query(&prediction), Predicted { executed: false });
            self.enqueue(PrefetchTask {
                query: prediction,
                priority,
            });
        }
        self.wake.notify_one();
    }

    /// Enqueue with drop-newest overflow: LOW first, then MEDIUM, then
    /// HIGH with a warning.
    fn enqueue(&self, task: PrefetchTask) {
        let capacity = self.config.queue_capacity.max(1);
        let mut queues = self.queues.lock();

        let total = queues.high.len() + queues.medium.len() + queues.low.len();
        if total >= capacity * 3 {
            let dropped = if queues.low.pop_back().is_some() {
                "low"
            } else if queues.medium.pop_back().is_some() {
                "medium"
            } else if queues.high.pop_back().is_some() {
                tracing::warn!("Prefetch overflow dropped a high-priority task");
                "high"
            } else {
                "none"
            };
            if dropped != "none" {
                self.metrics.lock().dropped_tasks += 1;
            }
        }

        match task.priority {
            PrefetchPriority::High => queues.high.push_back(task),
            PrefetchPriority::Medium => queues.medium.push_back(task),
            PrefetchPriority::Low => queues.low.push_back(task),
        }
    }

    /// Pop the next task the current capacity allows: HIGH always,
    /// MEDIUM below 50% utilization, LOW below 25%.
    fn next_task(&self) -> Option<PrefetchTask> {
        let capacity_used =
            self.active.load(Ordering::SeqCst) as f32 / self.config.max_concurrent.max(1) as f32;

        let mut queues = self.queues.lock();
        if let Some(task) = queues.high.pop_front() {
            return Some(task);
        }
        if capacity_used < 0.5 {
            if let Some(task) = queues.medium.pop_front() {
                return Some(task);
            }
        }
        if capacity_used < 0.25 {
            if let Some(task) = queues.low.pop_front() {
                return Some(task);
            }
        }
        None
    }

    async fn dispatch_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                return;
            }

            while self.active.load(Ordering::SeqCst) < self.config.max_concurrent {
                let Some(task) = self.next_task() else {
                    break;
                };
                self.active.fetch_add(1, Ordering::SeqCst);

                let prefetcher = Arc::clone(&self);
                tokio::spawn(async move {
                    prefetcher.execute(task).await;
                    prefetcher.active.fetch_sub(1, Ordering::SeqCst);
                    prefetcher.wake.notify_one();
                });
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
    }

    /// Warm the embedding cache for one predicted query
    async fn execute(&self, task: PrefetchTask) {
        match self.retriever.embed_query(&task.query).await {
            Ok(_) => {
                if let Some(mut entry) = self.predicted.get_mut(&hash_query(&task.query)) {
                    entry.executed = true;
                }
                self.metrics.lock().total_prefetches += 1;
                metrics::counter!("prefetch_executed_total").increment(1);
                tracing::debug!(query = %truncate(&task.query, 50), "Prefetch complete");
            }
            Err(e) => {
                // Internal only; counted, never surfaced
                self.metrics.lock().failed_prefetches += 1;
                metrics::counter!("prefetch_failed_total").increment(1);
                tracing::debug!(error = %e, "Prefetch execution failed");
            }
        }
    }

    pub fn metrics(&self) -> PrefetchMetricsSnapshot {
        // Snapshot before touching the queue lock: enqueue takes the
        // locks in the opposite order
        let inner = self.metrics.lock().clone();
        let queues = self.queues.lock();
        PrefetchMetricsSnapshot {
            total_predictions: inner.total_predictions,
            total_prefetches: inner.total_prefetches,
            successful_hits: inner.successful_hits,
            failed_prefetches: inner.failed_prefetches,
            dropped_tasks: inner.dropped_tasks,
            queued_high: queues.high.len(),
            queued_medium: queues.medium.len(),
            queued_low: queues.low.len(),
            active_tasks: self.active.load(Ordering::SeqCst),
        }
    }

    /// Reset history and queued predictions
    pub fn clear_history(&self) {
        self.history.lock().clear();
        self.predicted.clear();
        let mut queues = self.queues.lock();
        queues.high.clear();
        queues.medium.clear();
        queues.low.clear();
    }
}

/// Hash for hit attribution: case and whitespace insensitive
fn hash_query(query: &str) -> String {
    text_hash(&query.trim().to_lowercase())
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_bands() {
        assert_eq!(
            PrefetchPriority::from_confidence(0.9),
            PrefetchPriority::High
        );
        assert_eq!(
            PrefetchPriority::from_confidence(0.7),
            PrefetchPriority::High
        );
        assert_eq!(
            PrefetchPriority::from_confidence(0.5),
            PrefetchPriority::Medium
        );
        assert_eq!(
            PrefetchPriority::from_confidence(0.2),
            PrefetchPriority::Low
        );
    }

    #[test]
    fn test_keyword_extraction() {
        let keywords = PatternAnalyzer::extract_keywords(
            "What are the grooming standards for beards?",
            &["Tell me about grooming policy".to_string()],
        );
        assert!(keywords.contains(&"grooming".to_string()));
        assert!(keywords.contains(&"beards".to_string()));
        // Stopwords never appear
        assert!(!keywords.contains(&"what".to_string()));
        assert!(keywords.len() <= 5);
    }

    #[test]
    fn test_keyword_frequency_ranks_first() {
        let keywords = PatternAnalyzer::extract_keywords(
            "fitness assessment fitness scoring",
            &["fitness requirements".to_string()],
        );
        assert_eq!(keywords[0], "fitness");
    }

    #[test]
    fn test_prediction_uses_templates() {
        let analyzer = PatternAnalyzer::new();
        let (predictions, confidence) = analyzer.predict(
            "What is a shaving waiver?",
            &[],
            3,
        );
        assert!(!predictions.is_empty());
        assert!(predictions.len() <= 3);
        assert!(confidence > 0.0);
        // Keywords flow into the templates
        assert!(predictions.iter().any(|p| p.contains("shaving") || p.contains("waiver")));
    }

    #[test]
    fn test_prediction_without_keywords_is_low_confidence() {
        let analyzer = PatternAnalyzer::new();
        let (predictions, confidence) = analyzer.predict("why?", &[], 3);
        assert!(predictions.is_empty());
        assert!(confidence < 0.2);
    }

    #[test]
    fn test_comparison_template_needs_two_keywords() {
        assert!(fill_template("{K} vs {K2}", &["alpha".into()]).is_none());
        assert_eq!(
            fill_template("{K} vs {K2}", &["alpha".into(), "beta".into()]).unwrap(),
            "alpha vs beta"
        );
    }

    #[test]
    fn test_transition_graph_covers_all_classes() {
        for class in [
            QueryClass::Clarification,
            QueryClass::Elaboration,
            QueryClass::Example,
            QueryClass::Comparison,
            QueryClass::Procedure,
            QueryClass::Definition,
            QueryClass::FollowUp,
            QueryClass::NewTopic,
            QueryClass::Factual,
            QueryClass::Complex,
        ] {
            assert!(!PatternAnalyzer::follow_up_types(class).is_empty());
            assert!(PatternAnalyzer::base_confidence(class) > 0.0);
        }
    }

    #[test]
    fn test_hash_query_normalizes_case_and_space() {
        assert_eq!(hash_query("  Beard Rules "), hash_query("beard rules"));
    }
}
