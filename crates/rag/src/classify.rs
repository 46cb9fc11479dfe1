//! Query classification
//!
//! Deterministic keyword rules over the closed classification set.
//! Rules run first and are cheap enough for the prefetcher's hot path;
//! the transformer may refine ambiguous cases with the LLM.

use policy_qa_core::QueryClass;

/// Rule-based query classifier
#[derive(Debug, Default, Clone)]
pub struct QueryClassifier;

impl QueryClassifier {
    const CLARIFICATION: &'static [&'static str] = &[
        "what do you mean",
        "can you explain",
        "could you clarify",
        "clarify",
        "meaning of",
    ];

    const ELABORATION: &'static [&'static str] = &[
        "tell me more",
        "expand on",
        "more details",
        "elaborate",
        "in depth",
        "further information",
        "more about",
    ];

    const EXAMPLE: &'static [&'static str] = &[
        "example",
        "for instance",
        "such as",
        "can you show",
        "demonstrate",
        "case study",
    ];

    const COMPARISON: &'static [&'static str] = &[
        "compare",
        "difference between",
        "versus",
        " vs ",
        "better than",
        "worse than",
        "compared to",
        "contrast",
    ];

    const PROCEDURE: &'static [&'static str] = &[
        "how do i",
        "how to",
        "steps to",
        "guide to",
        "tutorial",
        "instructions",
        "process for",
        "procedure",
        "way to",
    ];

    const DEFINITION: &'static [&'static str] =
        &["what is", "what are", "define", "definition of"];

    const FOLLOW_UP: &'static [&'static str] = &[
        "also",
        "additionally",
        "furthermore",
        "moreover",
        "what about",
        "how about",
    ];

    const FACTUAL: &'static [&'static str] = &[
        "how often",
        "how many",
        "how long",
        "when is",
        "when are",
        "when must",
        "who is",
        "who must",
        "where is",
    ];

    /// Words above which a query counts as complex
    const COMPLEX_WORD_COUNT: usize = 25;

    pub fn new() -> Self {
        Self
    }

    /// Classify a query from keyword patterns, most specific first
    pub fn classify(&self, query: &str) -> QueryClass {
        let q = query.to_lowercase();

        if Self::contains_any(&q, Self::COMPARISON) {
            return QueryClass::Comparison;
        }
        if Self::contains_any(&q, Self::PROCEDURE) {
            return QueryClass::Procedure;
        }
        if Self::contains_any(&q, Self::EXAMPLE) {
            return QueryClass::Example;
        }
        if Self::contains_any(&q, Self::ELABORATION) {
            return QueryClass::Elaboration;
        }
        if Self::contains_any(&q, Self::CLARIFICATION) {
            return QueryClass::Clarification;
        }
        if Self::contains_any(&q, Self::FACTUAL) {
            return QueryClass::Factual;
        }
        if Self::contains_any(&q, Self::DEFINITION) {
            return QueryClass::Definition;
        }
        if Self::contains_any(&q, Self::FOLLOW_UP) {
            return QueryClass::FollowUp;
        }
        if q.split_whitespace().count() >= Self::COMPLEX_WORD_COUNT {
            return QueryClass::Complex;
        }

        QueryClass::NewTopic
    }

    fn contains_any(query: &str, patterns: &[&str]) -> bool {
        patterns.iter().any(|p| query.contains(p))
    }

    /// Parse an LLM-produced label back into the closed set
    pub fn parse_label(label: &str) -> Option<QueryClass> {
        match label.trim().to_lowercase().as_str() {
            "clarification" => Some(QueryClass::Clarification),
            "elaboration" => Some(QueryClass::Elaboration),
            "example" => Some(QueryClass::Example),
            "comparison" => Some(QueryClass::Comparison),
            "procedure" => Some(QueryClass::Procedure),
            "definition" => Some(QueryClass::Definition),
            "follow_up" | "follow-up" | "followup" => Some(QueryClass::FollowUp),
            "new_topic" | "new-topic" => Some(QueryClass::NewTopic),
            "factual" => Some(QueryClass::Factual),
            "complex" => Some(QueryClass::Complex),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_procedure() {
        let c = QueryClassifier::new();
        assert_eq!(
            c.classify("How do I request a shaving waiver?"),
            QueryClass::Procedure
        );
        assert_eq!(c.classify("steps to file a complaint"), QueryClass::Procedure);
    }

    #[test]
    fn test_comparison() {
        let c = QueryClassifier::new();
        assert_eq!(
            c.classify("What is the difference between a waiver and an exemption?"),
            QueryClass::Comparison
        );
    }

    #[test]
    fn test_definition() {
        let c = QueryClassifier::new();
        assert_eq!(c.classify("What is a DAFI?"), QueryClass::Definition);
    }

    #[test]
    fn test_factual_beats_definition() {
        let c = QueryClassifier::new();
        assert_eq!(
            c.classify("How often is fitness testing required?"),
            QueryClass::Factual
        );
    }

    #[test]
    fn test_elaboration() {
        let c = QueryClassifier::new();
        assert_eq!(
            c.classify("tell me more about grooming standards"),
            QueryClass::Elaboration
        );
    }

    #[test]
    fn test_new_topic_fallback() {
        let c = QueryClassifier::new();
        assert_eq!(c.classify("beard regulations"), QueryClass::NewTopic);
    }

    #[test]
    fn test_complex_by_length() {
        let c = QueryClassifier::new();
        let long = "given that my unit recently deployed overseas under joint command \
                    regulations covering grooming fitness readiness reporting leave travel \
                    allowances uniforms insignia decorations promotions evaluations which \
                    provisions apply during the transition period";
        assert_eq!(c.classify(long), QueryClass::Complex);
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(
            QueryClassifier::parse_label(" Follow-Up \n"),
            Some(QueryClass::FollowUp)
        );
        assert_eq!(QueryClassifier::parse_label("banana"), None);
    }
}
