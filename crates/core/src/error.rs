//! Top-level error type
//!
//! Each crate defines its own `thiserror` enum and converts into this
//! one at the boundary, so callers above the component layer only deal
//! with a single error surface.

use thiserror::Error;

/// Top-level error for the policy QA engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM busy")]
    LlmBusy,

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short kind tag for wire-level error metadata (no stack traces)
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::Embedding(_) => "embedding",
            Error::VectorStore(_) => "vector_store",
            Error::Llm(_) => "llm",
            Error::LlmBusy => "llm_busy",
            Error::Cache(_) => "cache",
            Error::Config(_) => "config",
            Error::NotReady(_) => "not_ready",
            Error::Internal(_) => "internal",
        }
    }

    /// Whether the caller may retry the request as-is
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::LlmBusy | Error::Embedding(_) | Error::VectorStore(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(Error::LlmBusy.kind(), "llm_busy");
        assert_eq!(Error::Cache("x".into()).kind(), "cache");
    }

    #[test]
    fn test_retriable() {
        assert!(Error::LlmBusy.is_retriable());
        assert!(!Error::InvalidInput("empty".into()).is_retriable());
    }
}
