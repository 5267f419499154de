//! Language model access for extraction, relatedness and embeddings
//!
//! Everything that talks to a model goes through the [`LanguageModel`] trait,
//! so the extractor, conflict detector and context pipeline stay testable
//! without a live endpoint. The production implementation speaks the
//! OpenAI-compatible API (chat completions + embeddings), which covers both
//! hosted services and local Ollama.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{Config, RetryConfig};
use crate::errors::{MemoryError, Result};

/// Injected model capability: completions and embeddings
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run a chat completion and return the assistant text
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Embed a text into the configured vector space
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Retry a fallible async operation with exponential backoff.
///
/// Only errors the taxonomy marks retryable are retried; validation and
/// consistency errors propagate immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    retry: &RetryConfig,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff_ms = retry.initial_backoff_ms;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                warn!(
                    attempt,
                    max = retry.max_attempts,
                    "{what} failed, retrying in {backoff_ms}ms: {e}"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(retry.max_backoff_ms);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI-compatible client over chat-completions and embeddings endpoints
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    completion_model: String,
    embedding_model: String,
    retry: RetryConfig,
}

impl OpenAiCompatClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.llm_api_base.trim_end_matches('/').to_string(),
            api_key: config.llm_api_key.clone(),
            completion_model: config.llm_model.clone(),
            embedding_model: config.embedding_model.clone(),
            retry: config.retry.clone(),
        }
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
        failure: fn(String) -> MemoryError,
    ) -> Result<R> {
        let url = format!("{}{path}", self.api_base);
        let mut req = self.http.post(&url).json(body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req.send().await.map_err(|e| failure(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(failure(format!("{status}: {text}")));
        }

        resp.json::<R>().await.map_err(|e| failure(e.to_string()))
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.completion_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
        };

        let response: ChatResponse = retry_with_backoff(&self.retry, "completion", || {
            self.post_json("/chat/completions", &request, MemoryError::CompletionFailed)
        })
        .await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| MemoryError::CompletionFailed("empty choices".to_string()))?;

        debug!(chars = content.len(), "Completion received");
        Ok(content)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: text,
        };

        let response: EmbeddingResponse = retry_with_backoff(&self.retry, "embedding", || {
            self.post_json("/embeddings", &request, MemoryError::EmbeddingFailed)
        })
        .await?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| MemoryError::EmbeddingFailed("empty data".to_string()))
    }
}

/// Scripted model for tests: queued answers, call counters, no network
pub mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::errors::{MemoryError, Result};

    use super::LanguageModel;

    #[derive(Default)]
    pub struct MockLanguageModel {
        completions: Mutex<VecDeque<std::result::Result<String, String>>>,
        embeddings: Mutex<VecDeque<std::result::Result<Vec<f32>, String>>>,
        default_embedding: Option<Vec<f32>>,
        completion_count: AtomicUsize,
        embedding_count: AtomicUsize,
    }

    impl MockLanguageModel {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a successful completion answer
        pub fn with_completion(self, text: impl Into<String>) -> Self {
            self.completions.lock().push_back(Ok(text.into()));
            self
        }

        /// Queue a failed completion attempt
        pub fn with_completion_error(self, reason: impl Into<String>) -> Self {
            self.completions.lock().push_back(Err(reason.into()));
            self
        }

        /// Queue a successful embedding answer
        pub fn with_embedding(self, vector: Vec<f32>) -> Self {
            self.embeddings.lock().push_back(Ok(vector));
            self
        }

        /// Queue a failed embedding attempt
        pub fn with_embedding_error(self, reason: impl Into<String>) -> Self {
            self.embeddings.lock().push_back(Err(reason.into()));
            self
        }

        /// Vector returned whenever the embedding queue runs dry
        pub fn with_default_embedding(mut self, vector: Vec<f32>) -> Self {
            self.default_embedding = Some(vector);
            self
        }

        pub fn completion_calls(&self) -> usize {
            self.completion_count.load(Ordering::SeqCst)
        }

        pub fn embedding_calls(&self) -> usize {
            self.embedding_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LanguageModel for MockLanguageModel {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            self.completion_count.fetch_add(1, Ordering::SeqCst);
            match self.completions.lock().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(reason)) => Err(MemoryError::CompletionFailed(reason)),
                None => Err(MemoryError::CompletionFailed(
                    "no scripted completion".to_string(),
                )),
            }
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.embedding_count.fetch_add(1, Ordering::SeqCst);
            match self.embeddings.lock().pop_front() {
                Some(Ok(vector)) => Ok(vector),
                Some(Err(reason)) => Err(MemoryError::EmbeddingFailed(reason)),
                None => match &self.default_embedding {
                    Some(vector) => Ok(vector.clone()),
                    None => Err(MemoryError::EmbeddingFailed(
                        "no scripted embedding".to_string(),
                    )),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockLanguageModel;
    use super::*;

    #[tokio::test]
    async fn test_retry_eventually_succeeds() {
        let retry = RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        };
        let llm = MockLanguageModel::new()
            .with_completion_error("timeout")
            .with_completion_error("timeout")
            .with_completion("ok");

        let result = retry_with_backoff(&retry, "test", || llm.complete("s", "u")).await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(llm.completion_calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let retry = RetryConfig {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        };
        let llm = MockLanguageModel::new()
            .with_completion_error("down")
            .with_completion_error("down")
            .with_completion("never reached");

        let result = retry_with_backoff(&retry, "test", || llm.complete("s", "u")).await;
        assert!(result.is_err());
        assert_eq!(llm.completion_calls(), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_propagates_immediately() {
        let retry = RetryConfig::default();
        let mut calls = 0;
        let result: Result<()> = retry_with_backoff(&retry, "test", || {
            calls += 1;
            async { Err(MemoryError::ConfidenceOutOfRange(1.5)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
