//! Single-worker LLM client
//!
//! The inference engine is not thread-safe: every `generate`/`stream`
//! call in the process must run one at a time, in order. The client
//! owns one spawned worker task holding the backend; callers post
//! requests onto a bounded FIFO channel and await a oneshot reply.
//! When the queue is full, callers get `LlmError::Busy` immediately
//! instead of waiting indefinitely.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::backend::{GenerationOptions, GenerationResult, LlmBackend};
use crate::LlmError;

struct LlmRequest {
    prompt: String,
    options: GenerationOptions,
    /// Token sink for streaming requests
    stream_tx: Option<mpsc::Sender<String>>,
    reply: oneshot::Sender<Result<GenerationResult, LlmError>>,
}

/// Serialized async front to a single-threaded LLM engine
#[derive(Clone)]
pub struct LlmClient {
    tx: mpsc::Sender<LlmRequest>,
    model_name: String,
    backend: Arc<dyn LlmBackend>,
}

impl LlmClient {
    /// Spawn the worker and return the client handle.
    ///
    /// `queue_depth` bounds the number of requests waiting behind the
    /// in-flight one; beyond that, callers fast-fail busy.
    pub fn spawn(backend: Arc<dyn LlmBackend>, queue_depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<LlmRequest>(queue_depth.max(1));
        let model_name = backend.model_name().to_string();
        let worker_backend = Arc::clone(&backend);

        tokio::spawn(async move {
            // Strict FIFO: one request in flight at a time
            while let Some(request) = rx.recv().await {
                let result = match request.stream_tx {
                    Some(token_tx) => {
                        worker_backend
                            .generate_stream(&request.prompt, &request.options, token_tx)
                            .await
                    }
                    None => worker_backend.generate(&request.prompt, &request.options).await,
                };

                if let Err(ref e) = result {
                    tracing::warn!(error = %e, "LLM generation failed");
                }

                // Caller may have gone away; nothing to do then
                let _ = request.reply.send(result);
            }
            tracing::info!("LLM worker stopped");
        });

        Self {
            tx,
            model_name,
            backend,
        }
    }

    /// Generate a complete response, serialized behind the worker
    pub async fn generate(
        &self,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<GenerationResult, LlmError> {
        let (reply, rx) = oneshot::channel();
        self.post(LlmRequest {
            prompt: prompt.to_string(),
            options,
            stream_tx: None,
            reply,
        })?;

        rx.await
            .map_err(|_| LlmError::Generation("worker dropped the request".to_string()))?
    }

    /// Generate with streaming; tokens arrive on `token_tx`.
    ///
    /// Dropping the receiving end cancels generation at the next token
    /// boundary; the returned result then carries
    /// `FinishReason::Cancelled`.
    pub async fn generate_stream(
        &self,
        prompt: &str,
        options: GenerationOptions,
        token_tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError> {
        let (reply, rx) = oneshot::channel();
        self.post(LlmRequest {
            prompt: prompt.to_string(),
            options,
            stream_tx: Some(token_tx),
            reply,
        })?;

        rx.await
            .map_err(|_| LlmError::Generation("worker dropped the request".to_string()))?
    }

    fn post(&self, request: LlmRequest) -> Result<(), LlmError> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!("LLM queue full, rejecting request");
                LlmError::Busy
            }
            mpsc::error::TrySendError::Closed(_) => {
                LlmError::Init("LLM worker is not running".to_string())
            }
        })
    }

    /// Reachability probe for health checks
    pub async fn is_available(&self) -> bool {
        self.backend.is_available().await
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Rough token estimate for prompt budgeting
    pub fn estimate_tokens(&self, text: &str) -> usize {
        self.backend.estimate_tokens(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FinishReason;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Mock backend that tracks concurrent invocations
    struct MockBackend {
        active: AtomicUsize,
        max_active: AtomicUsize,
        delay: Duration,
    }

    impl MockBackend {
        fn new(delay: Duration) -> Self {
            Self {
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                delay,
            }
        }

        fn enter(&self) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl LlmBackend for MockBackend {
        async fn generate(
            &self,
            prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<GenerationResult, LlmError> {
            self.enter();
            tokio::time::sleep(self.delay).await;
            self.exit();
            Ok(GenerationResult {
                text: format!("echo: {}", prompt),
                tokens: 2,
                time_to_first_token_ms: 1,
                total_time_ms: self.delay.as_millis() as u64,
                tokens_per_second: 1.0,
                finish_reason: FinishReason::Stop,
            })
        }

        async fn generate_stream(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
            tx: mpsc::Sender<String>,
        ) -> Result<GenerationResult, LlmError> {
            self.enter();
            let mut sent = 0;
            let mut cancelled = false;
            for token in ["one ", "two ", "three"] {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if tx.send(token.to_string()).await.is_err() {
                    cancelled = true;
                    break;
                }
                sent += 1;
            }
            self.exit();
            Ok(GenerationResult {
                text: String::new(),
                tokens: sent,
                time_to_first_token_ms: 5,
                total_time_ms: 15,
                tokens_per_second: 0.0,
                finish_reason: if cancelled {
                    FinishReason::Cancelled
                } else {
                    FinishReason::Stop
                },
            })
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "mock"
        }
    }

    #[tokio::test]
    async fn test_generate_roundtrip() {
        let backend = Arc::new(MockBackend::new(Duration::from_millis(1)));
        let client = LlmClient::spawn(backend, 4);
        let result = client
            .generate("hello", GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(result.text, "echo: hello");
    }

    #[tokio::test]
    async fn test_no_concurrent_generations() {
        let backend = Arc::new(MockBackend::new(Duration::from_millis(10)));
        let client = LlmClient::spawn(Arc::clone(&backend) as Arc<dyn LlmBackend>, 16);

        let mut handles = Vec::new();
        for i in 0..10 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client
                    .generate(&format!("q{}", i), GenerationOptions::default())
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        // At no instant were two generations active
        assert_eq!(backend.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_full_queue_fast_fails_busy() {
        let backend = Arc::new(MockBackend::new(Duration::from_millis(200)));
        let client = LlmClient::spawn(backend, 1);

        // First request occupies the worker, second fills the queue
        let c1 = client.clone();
        let h1 = tokio::spawn(async move { c1.generate("a", GenerationOptions::default()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let c2 = client.clone();
        let h2 = tokio::spawn(async move { c2.generate("b", GenerationOptions::default()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Third must be rejected immediately
        let result = client.generate("c", GenerationOptions::default()).await;
        assert!(matches!(result, Err(LlmError::Busy)));

        assert!(h1.await.unwrap().is_ok());
        assert!(h2.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels_stream() {
        let backend = Arc::new(MockBackend::new(Duration::from_millis(1)));
        let client = LlmClient::spawn(backend, 4);

        let (tx, mut rx) = mpsc::channel(1);
        let handle = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .generate_stream("x", GenerationOptions::default(), tx)
                    .await
            })
        };

        // Take one token then hang up
        let first = rx.recv().await.unwrap();
        assert_eq!(first, "one ");
        drop(rx);

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.finish_reason, FinishReason::Cancelled);
        // Stopped within one token of the cancellation signal
        assert!(result.tokens <= 2);
    }
}
