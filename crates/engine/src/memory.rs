//! Conversation memory
//!
//! Bounded per-conversation history used to enrich follow-up queries.
//! The augmented form is consumed only by retrieval and prefetch;
//! classification and user-visible text always use the original query.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

use policy_qa_core::QueryClass;
use policy_qa_llm::{GenerationOptions, LlmClient};

/// Maximum entries kept per conversation
const MAX_ENTRIES: usize = 10;
/// History length that triggers summarization of the oldest entries
const SUMMARIZE_THRESHOLD: usize = 8;
/// Oldest entries compressed per summarization pass
const SUMMARIZE_BATCH: usize = 3;
/// Answer characters included per exchange in the augmented query
const ANSWER_SNIPPET_CHARS: usize = 200;

/// One exchange in a conversation
#[derive(Debug, Clone)]
pub struct ConversationEntry {
    pub query: String,
    pub answer_text: String,
    pub retrieved_doc_ids: Vec<String>,
    pub classification: Option<QueryClass>,
    pub strategy: Option<String>,
    pub created_at: DateTime<Utc>,
    /// True when this entry is a compressed summary of older exchanges
    pub summary: bool,
}

/// Bounded per-conversation log
pub struct ConversationMemory {
    conversations: DashMap<String, VecDeque<ConversationEntry>>,
    llm: Option<LlmClient>,
}

impl ConversationMemory {
    pub fn new(llm: Option<LlmClient>) -> Self {
        Self {
            conversations: DashMap::new(),
            llm,
        }
    }

    /// Append an exchange; history is append-only and trimming drops
    /// the oldest entries.
    pub async fn add(
        &self,
        conversation_id: &str,
        query: &str,
        answer_text: &str,
        retrieved_doc_ids: Vec<String>,
        classification: Option<QueryClass>,
        strategy: Option<String>,
    ) {
        let entry = ConversationEntry {
            query: query.to_string(),
            answer_text: answer_text.to_string(),
            retrieved_doc_ids,
            classification,
            strategy,
            created_at: Utc::now(),
            summary: false,
        };

        let needs_compression = {
            let mut history = self
                .conversations
                .entry(conversation_id.to_string())
                .or_default();
            history.push_back(entry);
            while history.len() > MAX_ENTRIES {
                history.pop_front();
            }
            history.len() >= SUMMARIZE_THRESHOLD
        };

        if needs_compression {
            self.compress_oldest(conversation_id).await;
        }
    }

    /// Build an augmented retrieval query from recent exchanges.
    ///
    /// The original query is preserved verbatim at the end. Returns the
    /// augmented text and the number of exchanges used.
    pub fn context_for(
        &self,
        conversation_id: &str,
        query: &str,
        max_entries: usize,
    ) -> (String, usize) {
        let Some(history) = self.conversations.get(conversation_id) else {
            return (query.to_string(), 0);
        };

        if history.is_empty() {
            return (query.to_string(), 0);
        }

        let recent: Vec<&ConversationEntry> =
            history.iter().rev().take(max_entries).collect();
        let used = recent.len();

        let mut augmented = String::from("Previous conversation:\n");
        for entry in recent.iter().rev() {
            if entry.summary {
                augmented.push_str(&format!("Summary: {}\n", entry.answer_text));
            } else {
                augmented.push_str(&format!(
                    "Q: {}\nA: {}\n",
                    entry.query,
                    snippet(&entry.answer_text, ANSWER_SNIPPET_CHARS)
                ));
            }
        }
        augmented.push_str(&format!("\nCurrent question: {}", query));

        (augmented, used)
    }

    /// Recent raw queries, oldest first, for prefetch keyword analysis
    pub fn recent_queries(&self, conversation_id: &str, max_entries: usize) -> Vec<String> {
        self.conversations
            .get(conversation_id)
            .map(|history| {
                history
                    .iter()
                    .rev()
                    .take(max_entries)
                    .map(|e| e.query.clone())
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear(&self, conversation_id: &str) -> bool {
        self.conversations.remove(conversation_id).is_some()
    }

    pub fn clear_all(&self) {
        self.conversations.clear();
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    /// Compress the oldest exchanges into one summary entry via the
    /// LLM. Summarization failure reduces to plain truncation.
    async fn compress_oldest(&self, conversation_id: &str) {
        let oldest: Vec<ConversationEntry> = {
            let Some(history) = self.conversations.get(conversation_id) else {
                return;
            };
            history
                .iter()
                .filter(|e| !e.summary)
                .take(SUMMARIZE_BATCH)
                .cloned()
                .collect()
        };

        if oldest.len() < SUMMARIZE_BATCH {
            return;
        }

        let summary_text = match self.summarize(&oldest).await {
            Some(text) => text,
            None => {
                // Fall back to dropping the oldest entry
                if let Some(mut history) = self.conversations.get_mut(conversation_id) {
                    history.pop_front();
                }
                return;
            }
        };

        if let Some(mut history) = self.conversations.get_mut(conversation_id) {
            let doc_ids: Vec<String> = oldest
                .iter()
                .flat_map(|e| e.retrieved_doc_ids.iter().cloned())
                .collect();

            // Remove exactly the compressed entries; an existing
            // summary entry at the front stays where it is
            let mut indices: Vec<usize> = history
                .iter()
                .enumerate()
                .filter(|(_, e)| !e.summary)
                .take(oldest.len())
                .map(|(i, _)| i)
                .collect();
            indices.reverse();
            for idx in indices {
                history.remove(idx);
            }

            history.push_front(ConversationEntry {
                query: String::from("(earlier exchanges)"),
                answer_text: summary_text,
                retrieved_doc_ids: doc_ids,
                classification: None,
                strategy: None,
                created_at: Utc::now(),
                summary: true,
            });
        }
    }

    async fn summarize(&self, entries: &[ConversationEntry]) -> Option<String> {
        let llm = self.llm.as_ref()?;

        let mut transcript = String::new();
        for entry in entries {
            transcript.push_str(&format!(
                "Q: {}\nA: {}\n",
                entry.query,
                snippet(&entry.answer_text, 300)
            ));
        }

        let prompt = format!(
            "Summarize the following exchanges in 1-2 sentences, keeping the topics \
             and key facts:\n\n{}\nSummary:",
            transcript
        );

        let options = GenerationOptions::default()
            .with_temperature(0.0)
            .with_max_tokens(80);

        match llm.generate(&prompt, options).await {
            Ok(result) if !result.text.trim().is_empty() => {
                Some(result.text.trim().to_string())
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Conversation summarization failed, truncating");
                None
            }
        }
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn add_simple(memory: &ConversationMemory, id: &str, q: &str, a: &str) {
        memory
            .add(id, q, a, vec!["d1".into()], None, Some("single".into()))
            .await;
    }

    #[tokio::test]
    async fn test_context_preserves_original_query_last() {
        let memory = ConversationMemory::new(None);
        add_simple(&memory, "c1", "What is a waiver?", "A waiver is an exception.").await;

        let (augmented, used) = memory.context_for("c1", "How do I get one?", 3);
        assert_eq!(used, 1);
        assert!(augmented.contains("Q: What is a waiver?"));
        assert!(augmented.ends_with("Current question: How do I get one?"));
    }

    #[tokio::test]
    async fn test_empty_conversation_passthrough() {
        let memory = ConversationMemory::new(None);
        let (augmented, used) = memory.context_for("none", "Hello?", 3);
        assert_eq!(augmented, "Hello?");
        assert_eq!(used, 0);
    }

    #[tokio::test]
    async fn test_history_bounded_drops_oldest() {
        let memory = ConversationMemory::new(None);
        for i in 0..15 {
            add_simple(&memory, "c1", &format!("q{}", i), &format!("a{}", i)).await;
        }

        let recent = memory.recent_queries("c1", 100);
        assert!(recent.len() <= MAX_ENTRIES);
        // Oldest entries are gone
        assert!(!recent.contains(&"q0".to_string()));
        assert!(recent.contains(&"q14".to_string()));
    }

    #[tokio::test]
    async fn test_context_uses_most_recent_entries() {
        let memory = ConversationMemory::new(None);
        for i in 0..5 {
            add_simple(&memory, "c1", &format!("q{}", i), &format!("a{}", i)).await;
        }

        let (augmented, used) = memory.context_for("c1", "next", 2);
        assert_eq!(used, 2);
        assert!(augmented.contains("q3"));
        assert!(augmented.contains("q4"));
        assert!(!augmented.contains("q1"));
        // Order within the context is oldest first
        let pos3 = augmented.find("q3").unwrap();
        let pos4 = augmented.find("q4").unwrap();
        assert!(pos3 < pos4);
    }

    #[tokio::test]
    async fn test_clear() {
        let memory = ConversationMemory::new(None);
        add_simple(&memory, "c1", "q", "a").await;
        assert!(memory.clear("c1"));
        assert!(!memory.clear("c1"));
        let (augmented, used) = memory.context_for("c1", "again", 3);
        assert_eq!(augmented, "again");
        assert_eq!(used, 0);
    }

    #[tokio::test]
    async fn test_recent_queries_order() {
        let memory = ConversationMemory::new(None);
        for q in ["first", "second", "third"] {
            add_simple(&memory, "c1", q, "a").await;
        }
        let recent = memory.recent_queries("c1", 2);
        assert_eq!(recent, vec!["second".to_string(), "third".to_string()]);
    }

    #[tokio::test]
    async fn test_truncation_fallback_without_llm() {
        // No LLM: summarization degrades to dropping the oldest entry
        let memory = ConversationMemory::new(None);
        for i in 0..SUMMARIZE_THRESHOLD + 1 {
            add_simple(&memory, "c1", &format!("q{}", i), "a").await;
        }
        let recent = memory.recent_queries("c1", 100);
        assert!(recent.len() < SUMMARIZE_THRESHOLD + 1);
    }

    #[test]
    fn test_snippet() {
        assert_eq!(snippet("short", 10), "short");
        assert_eq!(snippet("abcdefghij", 4), "abcd...");
    }
}
