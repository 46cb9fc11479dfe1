//! LLM integration
//!
//! Features:
//! - `LlmBackend` trait over a text-in/text-out contract
//! - llama.cpp server backend with token streaming
//! - Single-worker client serializing all engine calls (the underlying
//!   engine is not thread-safe)
//! - Bounded FIFO queue with fast-fail busy semantics
//! - Cancellation at token boundaries via dropped receivers

pub mod backend;
pub mod client;

pub use backend::{
    FinishReason, GenerationOptions, GenerationResult, LlamaServerBackend, LlmBackend,
};
pub use client::LlmClient;

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Engine busy")]
    Busy,

    #[error("Initialization error: {0}")]
    Init(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl LlmError {
    /// Busy and timeout are transient; the caller may retry
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Busy | LlmError::Timeout | LlmError::Network(_))
    }
}

impl From<LlmError> for policy_qa_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Busy => policy_qa_core::Error::LlmBusy,
            other => policy_qa_core::Error::Llm(other.to_string()),
        }
    }
}
