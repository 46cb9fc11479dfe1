//! Sparse query vectors
//!
//! Deterministic keyword encoder for the vector store's sparse index.
//! Terms map to stable u32 indices via FNV-1a; values are sublinear
//! term-frequency weights. The store's inverted index does the IDF
//! side of the scoring.

use std::collections::HashMap;

/// Sparse vector in index/value form
#[derive(Debug, Clone, PartialEq)]
pub struct SparseQueryVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseQueryVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Deterministic sparse encoder
pub struct SparseEncoder;

impl SparseEncoder {
    const STOPWORDS: &'static [&'static str] = &[
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has",
        "had", "do", "does", "did", "will", "would", "could", "should", "may", "might", "must",
        "shall", "can", "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "and",
        "or", "but", "if", "then", "than", "this", "that", "these", "those", "it", "its", "i",
        "me", "my", "we", "our", "you", "your", "they", "them", "their", "what", "which", "who",
        "when", "where", "why", "how",
    ];

    /// Encode a text into a sparse query vector
    pub fn encode(text: &str) -> SparseQueryVector {
        let stopwords: std::collections::HashSet<&str> =
            Self::STOPWORDS.iter().copied().collect();

        let mut term_counts: HashMap<String, u32> = HashMap::new();
        for token in text.to_lowercase().split_whitespace() {
            let token: String = token.chars().filter(|c| c.is_alphanumeric()).collect();
            if token.len() < 2 || stopwords.contains(token.as_str()) {
                continue;
            }
            *term_counts.entry(token).or_insert(0) += 1;
        }

        let mut entries: Vec<(u32, f32)> = term_counts
            .into_iter()
            .map(|(term, count)| (fnv1a(&term), 1.0 + (count as f32).ln()))
            .collect();

        // Stable order; colliding terms keep the larger weight
        entries.sort_by_key(|(index, _)| *index);
        entries.dedup_by(|a, b| {
            if a.0 == b.0 {
                b.1 = b.1.max(a.1);
                true
            } else {
                false
            }
        });

        let (indices, values) = entries.into_iter().unzip();
        SparseQueryVector { indices, values }
    }
}

/// FNV-1a over the term bytes, truncated to u32
fn fnv1a(term: &str) -> u32 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    for byte in term.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_is_deterministic() {
        let a = SparseEncoder::encode("fitness assessment frequency requirements");
        let b = SparseEncoder::encode("fitness assessment frequency requirements");
        assert_eq!(a, b);
        assert_eq!(a.indices.len(), a.values.len());
    }

    #[test]
    fn test_stopwords_and_short_tokens_dropped() {
        let v = SparseEncoder::encode("what is the a i");
        assert!(v.is_empty());
    }

    #[test]
    fn test_repeated_terms_weighted_sublinearly() {
        let once = SparseEncoder::encode("fitness");
        let thrice = SparseEncoder::encode("fitness fitness fitness");
        assert_eq!(once.indices, thrice.indices);
        assert!(thrice.values[0] > once.values[0]);
        assert!(thrice.values[0] < 3.0 * once.values[0]);
    }

    #[test]
    fn test_indices_sorted_unique() {
        let v = SparseEncoder::encode("uniform grooming standards waiver policy document");
        let mut sorted = v.indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(v.indices, sorted);
    }

    #[test]
    fn test_punctuation_stripped() {
        let plain = SparseEncoder::encode("beards waiver");
        let punctuated = SparseEncoder::encode("beards, waiver!");
        assert_eq!(plain, punctuated);
    }
}
