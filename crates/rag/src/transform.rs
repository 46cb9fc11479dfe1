//! Query transformation
//!
//! Produces a small ordered set of retrieval query variants plus an
//! optional classification. The original query always comes first;
//! a HyDE passage and rule-based rewrites follow. Every failure path
//! degrades to the original query alone.

use policy_qa_config::TransformConfig;
use policy_qa_core::QueryClass;
use policy_qa_llm::{GenerationOptions, LlmClient};

use crate::classify::QueryClassifier;

/// Output of a transformation
#[derive(Debug, Clone)]
pub struct TransformOutput {
    /// Query variants, original first, deduplicated
    pub variants: Vec<String>,
    /// Hypothetical-document passage, when generated
    pub hyde: Option<String>,
    pub classification: Option<QueryClass>,
}

impl TransformOutput {
    fn original_only(query: &str) -> Self {
        Self {
            variants: vec![query.to_string()],
            hyde: None,
            classification: None,
        }
    }
}

/// Query transformer combining classification and expansion
pub struct QueryTransformer {
    config: TransformConfig,
    classifier: QueryClassifier,
    llm: Option<LlmClient>,
    max_variants: usize,
}

impl QueryTransformer {
    /// Question-word rephrasings for rule-based rewrites
    const REPHRASES: &'static [(&'static str, &'static str)] = &[
        ("how often", "what frequency"),
        ("when", "what time"),
        ("how many", "what number"),
        ("what are", "list the"),
    ];

    pub fn new(config: TransformConfig, llm: Option<LlmClient>, max_variants: usize) -> Self {
        Self {
            config,
            classifier: QueryClassifier::new(),
            llm,
            max_variants: max_variants.max(1),
        }
    }

    /// Classify and expand a query.
    ///
    /// Rule paths cannot fail; a HyDE failure is logged and skipped.
    pub async fn transform(&self, query: &str) -> TransformOutput {
        if query.trim().is_empty() {
            return TransformOutput::original_only(query);
        }

        let classification = self.classify_query(query).await;

        let mut variants = vec![query.to_string()];

        let hyde = if self.config.enable_hyde {
            match self.hyde_passage(query).await {
                Ok(Some(passage)) => {
                    variants.push(passage.clone());
                    Some(passage)
                }
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "HyDE expansion failed, continuing without it");
                    None
                }
            }
        } else {
            None
        };

        if self.config.enable_multiquery_rewrite {
            variants.extend(Self::rule_rewrites(query));
        }

        let variants = dedup_preserving_order(variants, self.max_variants);

        tracing::debug!(
            variant_count = variants.len(),
            class = ?classification,
            "Query transformed"
        );

        TransformOutput {
            variants,
            hyde,
            classification,
        }
    }

    /// Classify a query, honoring the classification feature flag.
    ///
    /// Used directly when the retrieval query was context-augmented:
    /// classification always runs on the original user query.
    pub async fn classify_query(&self, query: &str) -> Option<QueryClass> {
        if self.config.enable_classification {
            Some(self.classify(query).await)
        } else {
            None
        }
    }

    /// Rules first; the LLM refines only ambiguous (new-topic) cases
    async fn classify(&self, query: &str) -> QueryClass {
        let rule_class = self.classifier.classify(query);
        if rule_class != QueryClass::NewTopic {
            return rule_class;
        }

        let Some(llm) = &self.llm else {
            return rule_class;
        };

        let prompt = format!(
            "Classify the question into exactly one of these categories:\n\
             clarification, elaboration, example, comparison, procedure, definition, \
             follow_up, new_topic, factual, complex\n\n\
             Question: {}\n\n\
             Respond with ONLY the category name.\n\nCategory:",
            query
        );

        let options = GenerationOptions::default()
            .with_temperature(0.0)
            .with_max_tokens(8);

        match llm.generate(&prompt, options).await {
            Ok(result) => QueryClassifier::parse_label(&result.text).unwrap_or(rule_class),
            Err(e) => {
                tracing::debug!(error = %e, "LLM classification refinement failed");
                rule_class
            }
        }
    }

    /// Ask the LLM to write a short passage that would answer the
    /// question; that passage becomes an additional retrieval query.
    async fn hyde_passage(&self, query: &str) -> Result<Option<String>, policy_qa_llm::LlmError> {
        let Some(llm) = &self.llm else {
            return Ok(None);
        };

        let prompt = format!(
            "Write a short passage (2-3 sentences) that could appear in a policy \
             document and directly answers the question below. Write only the passage, \
             no preamble.\n\nQuestion: {}\n\nPassage:",
            query
        );

        let options = GenerationOptions::default()
            .with_temperature(self.config.hyde_temperature)
            .with_max_tokens(150);

        let result = llm.generate(&prompt, options).await?;
        let passage = result.text.trim().to_string();

        if passage.is_empty() {
            Ok(None)
        } else {
            Ok(Some(passage))
        }
    }

    /// Deterministic rewrites over the policy domain
    fn rule_rewrites(query: &str) -> Vec<String> {
        let lower = query.to_lowercase();
        let mut rewrites = Vec::new();

        if !lower.contains("policy") && !lower.contains("regulation") {
            rewrites.push(format!("{} policy", query));
        }

        for (old, new) in Self::REPHRASES {
            if lower.contains(old) {
                rewrites.push(lower.replacen(old, new, 1));
                break;
            }
        }

        if ["how", "what", "requirements", "must"]
            .iter()
            .any(|w| lower.contains(w))
            && !lower.contains("requirements")
        {
            rewrites.push(format!("{} requirements", query));
        }

        rewrites
    }
}

/// Case-insensitive dedup keeping first occurrences, capped at `max`
fn dedup_preserving_order(variants: Vec<String>, max: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::new();
    for variant in variants {
        let key = variant.to_lowercase();
        if seen.insert(key) {
            result.push(variant);
            if result.len() >= max {
                break;
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transformer() -> QueryTransformer {
        // No LLM: HyDE and refinement are skipped, rules still run
        QueryTransformer::new(TransformConfig::default(), None, 4)
    }

    #[tokio::test]
    async fn test_original_always_first() {
        let output = transformer().transform("how often is fitness testing required").await;
        assert_eq!(output.variants[0], "how often is fitness testing required");
        assert!(output.variants.len() > 1);
    }

    #[tokio::test]
    async fn test_policy_rewrite_added() {
        let output = transformer().transform("beard rules").await;
        assert!(output
            .variants
            .iter()
            .any(|v| v == "beard rules policy"));
    }

    #[tokio::test]
    async fn test_policy_rewrite_skipped_when_present() {
        let output = transformer().transform("beard policy details").await;
        assert!(!output.variants.iter().any(|v| v.ends_with("details policy")));
    }

    #[tokio::test]
    async fn test_question_word_rephrase() {
        let output = transformer().transform("how often is PT required").await;
        assert!(output
            .variants
            .iter()
            .any(|v| v.contains("what frequency")));
    }

    #[tokio::test]
    async fn test_variant_cap_and_dedup() {
        let output = transformer().transform("what are the requirements").await;
        assert!(output.variants.len() <= 4);
        let mut lowered: Vec<String> =
            output.variants.iter().map(|v| v.to_lowercase()).collect();
        lowered.sort();
        lowered.dedup();
        assert_eq!(lowered.len(), output.variants.len());
    }

    #[tokio::test]
    async fn test_classification_attached() {
        let output = transformer().transform("how do i submit a waiver").await;
        assert_eq!(output.classification, Some(QueryClass::Procedure));
    }

    #[tokio::test]
    async fn test_empty_query_passthrough() {
        let output = transformer().transform("  ").await;
        assert_eq!(output.variants.len(), 1);
        assert!(output.classification.is_none());
    }

    #[test]
    fn test_dedup_preserving_order() {
        let variants = vec![
            "A".to_string(),
            "a".to_string(),
            "B".to_string(),
            "C".to_string(),
        ];
        let result = dedup_preserving_order(variants, 2);
        assert_eq!(result, vec!["A".to_string(), "B".to_string()]);
    }
}
