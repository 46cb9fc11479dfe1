//! Grounded answer generation
//!
//! Builds a prompt from the top retrieved documents as numbered context
//! blocks, asks the LLM for an answer with bracketed citations, and
//! post-processes the text: citation indices that reference no supplied
//! block are stripped, and refusals carry no citations.

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;

use policy_qa_core::{Citation, QueryClass, RetrievalResult};
use policy_qa_llm::{FinishReason, GenerationOptions, LlmClient, LlmError};

/// Context block count and per-block character bound for simple queries
const SIMPLE_BLOCKS: usize = 3;
const SIMPLE_BLOCK_CHARS: usize = 400;
/// Context block count and per-block character bound for complex queries
const COMPLEX_BLOCKS: usize = 5;
const COMPLEX_BLOCK_CHARS: usize = 1500;

/// Citation excerpt length in responses
const EXCERPT_CHARS: usize = 250;

static CITATION_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("valid regex"));

/// Phrases signalling the model refused for lack of grounding
const REFUSAL_PHRASES: &[&str] = &[
    "not found in the provided sources",
    "not found in provided sources",
    "context doesn't contain",
    "context does not contain",
    "don't have enough information",
    "do not have enough information",
    "insufficient information",
    "cannot answer",
    "couldn't find any relevant",
];

/// Generated answer before engine metadata is attached
#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub text: String,
    pub citations: Vec<Citation>,
    /// True when streaming was cancelled mid-generation
    pub cancelled: bool,
}

/// Answer generator over the serialized LLM client
pub struct AnswerGenerator {
    llm: LlmClient,
    options: GenerationOptions,
}

impl AnswerGenerator {
    pub fn new(llm: LlmClient, options: GenerationOptions) -> Self {
        Self { llm, options }
    }

    /// Number of context blocks and per-block bound for a query class
    fn context_shape(query_type: Option<QueryClass>) -> (usize, usize) {
        match query_type {
            Some(QueryClass::Complex) | Some(QueryClass::Comparison) => {
                (COMPLEX_BLOCKS, COMPLEX_BLOCK_CHARS)
            }
            _ => (SIMPLE_BLOCKS, SIMPLE_BLOCK_CHARS),
        }
    }

    /// Build the grounded prompt with numbered context blocks
    fn build_prompt(question: &str, retrieval: &RetrievalResult, blocks: usize, block_chars: usize) -> String {
        let mut context = String::new();
        for (i, doc) in retrieval.documents.iter().take(blocks).enumerate() {
            context.push_str(&format!(
                "[{}] {} ({})\n{}\n\n",
                i + 1,
                doc.file_name(),
                doc.id,
                doc.excerpt(block_chars)
            ));
        }

        format!(
            "You are an assistant answering questions about policy documents.\n\n\
             Answer ONLY from the context documents below. If the context does not \
             contain the information needed, reply that the answer is not found in \
             the provided sources.\n\
             Cite the documents you use with bracketed numbers matching the context \
             blocks, e.g. [1] or [2].\n\n\
             CONTEXT:\n{}\
             QUESTION: {}\n\nANSWER:",
            context, question
        )
    }

    /// Generate a grounded answer for the question
    pub async fn generate(
        &self,
        question: &str,
        retrieval: &RetrievalResult,
    ) -> Result<GeneratedAnswer, LlmError> {
        let (blocks, block_chars) = Self::context_shape(retrieval.query_type);
        let prompt = Self::build_prompt(question, retrieval, blocks, block_chars);

        let result = self.llm.generate(&prompt, self.options.clone()).await?;

        Ok(Self::post_process(
            &result.text,
            retrieval,
            blocks,
            result.finish_reason == FinishReason::Cancelled,
        ))
    }

    /// Generate with token streaming; post-processing runs on the
    /// assembled text once the stream ends.
    pub async fn generate_stream(
        &self,
        question: &str,
        retrieval: &RetrievalResult,
        token_tx: mpsc::Sender<String>,
    ) -> Result<GeneratedAnswer, LlmError> {
        let (blocks, block_chars) = Self::context_shape(retrieval.query_type);
        let prompt = Self::build_prompt(question, retrieval, blocks, block_chars);

        let result = self
            .llm
            .generate_stream(&prompt, self.options.clone(), token_tx)
            .await?;

        Ok(Self::post_process(
            &result.text,
            retrieval,
            blocks,
            result.finish_reason == FinishReason::Cancelled,
        ))
    }

    /// Citations for the context blocks actually supplied to the model
    pub fn sources(retrieval: &RetrievalResult, query_type: Option<QueryClass>) -> Vec<Citation> {
        let (blocks, _) = Self::context_shape(query_type);
        retrieval
            .documents
            .iter()
            .take(blocks)
            .zip(retrieval.scores.iter().chain(std::iter::repeat(&0.0)))
            .map(|(doc, score)| Citation {
                document_id: doc.id.clone(),
                excerpt: doc.excerpt(EXCERPT_CHARS),
                relevance: *score,
            })
            .collect()
    }

    fn post_process(
        raw: &str,
        retrieval: &RetrievalResult,
        blocks: usize,
        cancelled: bool,
    ) -> GeneratedAnswer {
        let supplied = retrieval.documents.len().min(blocks);
        let text = Self::scrub_citations(raw.trim(), supplied);
        let text = Self::tidy(&text);

        let citations = if Self::is_refusal(&text) {
            Vec::new()
        } else {
            Self::sources(retrieval, retrieval.query_type)
        };

        GeneratedAnswer {
            text,
            citations,
            cancelled,
        }
    }

    /// Strip bracketed indices that reference no supplied block
    fn scrub_citations(text: &str, supplied_blocks: usize) -> String {
        CITATION_INDEX
            .replace_all(text, |captures: &regex::Captures| {
                let index: usize = captures[1].parse().unwrap_or(0);
                if index >= 1 && index <= supplied_blocks {
                    captures[0].to_string()
                } else {
                    tracing::debug!(index, supplied_blocks, "Stripping unknown citation index");
                    String::new()
                }
            })
            .to_string()
    }

    fn is_refusal(text: &str) -> bool {
        let lower = text.to_lowercase();
        REFUSAL_PHRASES.iter().any(|p| lower.contains(p))
    }

    /// Whitespace repair after scrubbing
    fn tidy(text: &str) -> String {
        let mut tidied = text.trim().to_string();
        while tidied.contains("  ") {
            tidied = tidied.replace("  ", " ");
        }
        while tidied.contains("\n\n\n") {
            tidied = tidied.replace("\n\n\n", "\n\n");
        }
        tidied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_qa_core::{Document, RetrievalStrategy};

    fn retrieval(n: usize) -> RetrievalResult {
        RetrievalResult {
            documents: (0..n)
                .map(|i| {
                    Document::new(format!("doc{}", i), format!("passage {}", i))
                        .with_meta("file_name", "dafi36-2903.pdf")
                })
                .collect(),
            scores: (0..n).map(|i| 1.0 - i as f32 * 0.1).collect(),
            strategy: RetrievalStrategy::Single,
            query_type: None,
            variant_count: 1,
            timings: Default::default(),
        }
    }

    #[test]
    fn test_prompt_numbers_blocks() {
        let prompt = AnswerGenerator::build_prompt("beards?", &retrieval(4), 3, 400);
        assert!(prompt.contains("[1] dafi36-2903.pdf (doc0)"));
        assert!(prompt.contains("[3]"));
        // Only 3 blocks for a simple query
        assert!(!prompt.contains("[4] "));
        assert!(prompt.contains("QUESTION: beards?"));
    }

    #[test]
    fn test_context_shape_by_class() {
        assert_eq!(AnswerGenerator::context_shape(None), (3, 400));
        assert_eq!(
            AnswerGenerator::context_shape(Some(QueryClass::Complex)),
            (5, 1500)
        );
        assert_eq!(
            AnswerGenerator::context_shape(Some(QueryClass::Factual)),
            (3, 400)
        );
    }

    #[test]
    fn test_scrub_unknown_citation_indices() {
        let scrubbed = AnswerGenerator::scrub_citations("Allowed [1] and [2], not [7].", 2);
        assert!(scrubbed.contains("[1]"));
        assert!(scrubbed.contains("[2]"));
        assert!(!scrubbed.contains("[7]"));
    }

    #[test]
    fn test_scrub_zero_index() {
        let scrubbed = AnswerGenerator::scrub_citations("Bad [0] citation", 3);
        assert!(!scrubbed.contains("[0]"));
    }

    #[test]
    fn test_refusal_detection() {
        assert!(AnswerGenerator::is_refusal(
            "This is not found in the provided sources."
        ));
        assert!(AnswerGenerator::is_refusal(
            "The context does not contain that information."
        ));
        assert!(!AnswerGenerator::is_refusal("Members must shave daily [1]."));
    }

    #[test]
    fn test_post_process_refusal_clears_citations() {
        let answer = AnswerGenerator::post_process(
            "The answer is not found in the provided sources.",
            &retrieval(3),
            3,
            false,
        );
        assert!(answer.citations.is_empty());
        assert!(!answer.cancelled);
    }

    #[test]
    fn test_post_process_attaches_supplied_sources() {
        let answer =
            AnswerGenerator::post_process("Members must shave daily [1].", &retrieval(5), 3, false);
        // Citations cover exactly the supplied blocks
        assert_eq!(answer.citations.len(), 3);
        assert_eq!(answer.citations[0].document_id, "doc0");
        assert!(answer.citations[0].relevance > answer.citations[2].relevance);
    }

    #[test]
    fn test_tidy_collapses_whitespace() {
        assert_eq!(
            AnswerGenerator::tidy("a  b\n\n\n\nc"),
            "a b\n\nc"
        );
    }

    #[test]
    fn test_every_cited_index_references_supplied_citation() {
        let answer = AnswerGenerator::post_process(
            "See [1], then [3], ignore [9].",
            &retrieval(3),
            3,
            false,
        );
        for captures in CITATION_INDEX.captures_iter(&answer.text) {
            let index: usize = captures[1].parse().unwrap();
            assert!(index >= 1 && index <= answer.citations.len());
        }
    }
}
