//! LLM backend implementations
//!
//! Targets the llama.cpp HTTP server (`/completion`) with streaming
//! token output. The backend itself is oblivious to the single-flight
//! constraint; `client::LlmClient` enforces serialization.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use policy_qa_config::LlmConfig;

use crate::LlmError;

/// Sampling options for one generation call
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_tokens: usize,
    pub stop: Vec<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 0.9,
            top_k: 40,
            max_tokens: 2048,
            stop: Vec::new(),
        }
    }
}

impl GenerationOptions {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_tokens: config.max_tokens,
            stop: Vec::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Generation result
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Generated text
    pub text: String,
    /// Tokens generated
    pub tokens: usize,
    /// Time to first token (ms)
    pub time_to_first_token_ms: u64,
    /// Total generation time (ms)
    pub total_time_ms: u64,
    /// Tokens per second
    pub tokens_per_second: f32,
    /// Finish reason
    pub finish_reason: FinishReason,
}

/// Finish reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Cancelled,
}

/// LLM backend trait
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generate a complete response
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResult, LlmError>;

    /// Generate with token streaming.
    ///
    /// Tokens are sent on `tx` as they arrive. A dropped receiver
    /// cancels generation at the next token boundary and the result
    /// carries `FinishReason::Cancelled`.
    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError>;

    /// Check if the engine is reachable
    async fn is_available(&self) -> bool;

    /// Model identifier
    fn model_name(&self) -> &str;

    /// Rough token estimate (~4 chars per token for English text)
    fn estimate_tokens(&self, text: &str) -> usize {
        use unicode_segmentation::UnicodeSegmentation;
        (text.graphemes(true).count().max(1) + 3) / 4
    }
}

/// llama.cpp server backend
///
/// Speaks the `/completion` API with SSE token streaming. The
/// `cache_prompt` flag follows `preserve_kv_cache`: preserved keeps the
/// engine KV cache warm between requests at the cost of minor context
/// bleed.
pub struct LlamaServerBackend {
    client: Client,
    config: LlmConfig,
}

impl LlamaServerBackend {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::Init(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn completion_url(&self) -> String {
        format!("{}/completion", self.config.endpoint.trim_end_matches('/'))
    }

    fn build_request(&self, prompt: &str, options: &GenerationOptions, stream: bool) -> CompletionRequest {
        CompletionRequest {
            prompt: prompt.to_string(),
            temperature: options.temperature,
            top_p: options.top_p,
            top_k: options.top_k,
            n_predict: options.max_tokens as i64,
            stop: options.stop.clone(),
            stream,
            cache_prompt: self.config.preserve_kv_cache,
        }
    }
}

#[async_trait]
impl LlmBackend for LlamaServerBackend {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResult, LlmError> {
        let start = std::time::Instant::now();
        let request = self.build_request(prompt, options, false);

        let response = self
            .client
            .post(self.completion_url())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, body)));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let total_time_ms = start.elapsed().as_millis() as u64;
        let tokens = completion.tokens_predicted.unwrap_or(0) as usize;

        Ok(GenerationResult {
            text: completion.content,
            tokens,
            time_to_first_token_ms: total_time_ms,
            total_time_ms,
            tokens_per_second: if total_time_ms > 0 {
                tokens as f32 / (total_time_ms as f32 / 1000.0)
            } else {
                0.0
            },
            finish_reason: if completion.stopped_limit.unwrap_or(false) {
                FinishReason::Length
            } else {
                FinishReason::Stop
            },
        })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError> {
        let start = std::time::Instant::now();
        let mut first_token_time = None;
        let mut total_tokens = 0usize;
        let mut full_response = String::new();

        let request = self.build_request(prompt, options, true);

        let response = self
            .client
            .post(self.completion_url())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, body)));
        }

        let mut stream = response.bytes_stream();
        use futures::StreamExt;

        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Process complete lines; the server emits SSE "data: {json}"
            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                if line.is_empty() {
                    continue;
                }

                let payload = line.strip_prefix("data: ").unwrap_or(&line);

                let parsed: StreamChunk = match serde_json::from_str(payload) {
                    Ok(parsed) => parsed,
                    Err(_) => continue,
                };

                if !parsed.content.is_empty() {
                    if first_token_time.is_none() {
                        first_token_time = Some(start.elapsed());
                    }
                    full_response.push_str(&parsed.content);
                    total_tokens += 1;

                    if tx.send(parsed.content.clone()).await.is_err() {
                        // Receiver dropped: caller cancelled
                        return Ok(GenerationResult {
                            text: full_response,
                            tokens: total_tokens,
                            time_to_first_token_ms: first_token_time
                                .map(|t| t.as_millis() as u64)
                                .unwrap_or(0),
                            total_time_ms: start.elapsed().as_millis() as u64,
                            tokens_per_second: 0.0,
                            finish_reason: FinishReason::Cancelled,
                        });
                    }
                }

                if parsed.stop {
                    let total_time = start.elapsed();
                    return Ok(GenerationResult {
                        text: full_response,
                        tokens: total_tokens,
                        time_to_first_token_ms: first_token_time
                            .map(|t| t.as_millis() as u64)
                            .unwrap_or(0),
                        total_time_ms: total_time.as_millis() as u64,
                        tokens_per_second: total_tokens as f32
                            / total_time.as_secs_f32().max(0.001),
                        finish_reason: if parsed.stopped_limit.unwrap_or(false) {
                            FinishReason::Length
                        } else {
                            FinishReason::Stop
                        },
                    });
                }
            }
        }

        let total_time = start.elapsed();
        Ok(GenerationResult {
            text: full_response,
            tokens: total_tokens,
            time_to_first_token_ms: first_token_time
                .map(|t| t.as_millis() as u64)
                .unwrap_or(0),
            total_time_ms: total_time.as_millis() as u64,
            tokens_per_second: total_tokens as f32 / total_time.as_secs_f32().max(0.001),
            finish_reason: FinishReason::Stop,
        })
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.config.endpoint.trim_end_matches('/'));
        self.client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model_path
    }
}

// llama.cpp server API types

#[derive(Debug, Serialize)]
struct CompletionRequest {
    prompt: String,
    temperature: f32,
    top_p: f32,
    top_k: u32,
    n_predict: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    stream: bool,
    cache_prompt: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: String,
    #[serde(default)]
    tokens_predicted: Option<u64>,
    #[serde(default)]
    stopped_limit: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    content: String,
    #[serde(default)]
    stop: bool,
    #[serde(default)]
    stopped_limit: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let backend = LlamaServerBackend::new(LlmConfig::default()).unwrap();
        let request = backend.build_request("hello", &GenerationOptions::default(), true);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("cache_prompt"));
        assert!(json.contains("n_predict"));
        // Empty stop list is omitted
        assert!(!json.contains("\"stop\""));
    }

    #[test]
    fn test_stream_chunk_parsing() {
        let chunk: StreamChunk =
            serde_json::from_str(r#"{"content":"Hel","stop":false}"#).unwrap();
        assert_eq!(chunk.content, "Hel");
        assert!(!chunk.stop);

        let last: StreamChunk =
            serde_json::from_str(r#"{"content":"","stop":true,"stopped_limit":false}"#).unwrap();
        assert!(last.stop);
    }

    #[test]
    fn test_token_estimate() {
        let backend = LlamaServerBackend::new(LlmConfig::default()).unwrap();
        let estimate = backend.estimate_tokens("this is roughly sixteen characters");
        assert!(estimate >= 6 && estimate <= 12, "estimate was {}", estimate);
    }

    #[test]
    fn test_options_from_config() {
        let mut config = LlmConfig::default();
        config.temperature = 0.3;
        config.max_tokens = 128;
        let options = GenerationOptions::from_config(&config);
        assert_eq!(options.temperature, 0.3);
        assert_eq!(options.max_tokens, 128);
    }
}
