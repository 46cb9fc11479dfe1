//! Core types for the policy QA engine
//!
//! This crate provides foundational types used across all other crates:
//! - Documents and retrieval results
//! - Query normalization, hashing and classification
//! - Answers with citations and timing metadata
//! - Error types

pub mod answer;
pub mod document;
pub mod error;
pub mod query;
pub mod retrieval;
pub mod timing;

pub use answer::{Answer, AnswerMetadata, Citation};
pub use document::Document;
pub use error::{Error, Result};
pub use query::{normalize_query, text_hash, QueryClass, QueryMode};
pub use retrieval::{RetrievalResult, RetrievalStrategy};
pub use timing::{StageTimer, TimingBreakdown};
