//! Completion endpoint client
//!
//! Every call carries a hard deadline. Timeouts and non-2xx responses come
//! back as typed errors; raw transport exceptions never propagate past this
//! module. Transient failures are retried with exponential backoff inside
//! the caller's deadline.

use crate::config::CompletionConfig;
use crate::errors::{EngineError, Result};
use crate::metrics::record_completion;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// One message in a chat-completion conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A single completion call with its deadline
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: usize,
    pub temperature: f32,
    /// Hard deadline for the whole call, retries included
    pub timeout: Duration,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, max_tokens: usize, timeout: Duration) -> Self {
        Self {
            messages,
            max_tokens,
            temperature: 0.2,
            timeout,
        }
    }

    /// Content of the last user message, if any
    pub fn last_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
    }
}

/// Trait for completion generation
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generate a completion; must return within the request deadline
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// HTTP client for an OpenAI-shaped chat-completions endpoint
pub struct HttpCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl HttpCompletionClient {
    /// Create a new client from configuration
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| EngineError::Configuration {
                message: "Completion API key not configured".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| EngineError::Configuration {
                message: format!("Failed to create completion client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    async fn attempt(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatBody {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::CompletionFailed {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::CompletionFailed {
                message: format!("API error {}: {}", status, text),
            });
        }

        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| EngineError::CompletionFailed {
                    message: format!("Failed to parse response: {}", e),
                })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| EngineError::CompletionFailed {
                message: "Empty response from completion endpoint".to_string(),
            })
    }

    async fn attempt_with_retry(&self, request: &CompletionRequest) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(200 * 2_u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }

            match self.attempt(request).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries + 1,
                        error = %e,
                        "Completion request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| EngineError::CompletionFailed {
            message: "Unknown error after retries".to_string(),
        }))
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let deadline = request.timeout;
        let started = Instant::now();

        let result = match tokio::time::timeout(deadline, self.attempt_with_retry(&request)).await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::CompletionTimeout {
                timeout_ms: deadline.as_millis() as u64,
            }),
        };

        record_completion(started.elapsed().as_secs_f64(), result.is_ok());
        result
    }
}

/// Kind of failure a mock rule injects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Timeout,
    ApiError,
}

struct MockRule {
    needle: String,
    response: Option<String>,
    failure: Option<MockFailure>,
    delay: Option<Duration>,
}

/// Rule-based mock for tests: first rule whose needle appears in the last
/// user message wins; otherwise the default response is returned.
pub struct MockCompletionClient {
    rules: Mutex<Vec<MockRule>>,
    default_response: String,
    calls: Mutex<Vec<String>>,
}

impl MockCompletionClient {
    pub fn new(default_response: impl Into<String>) -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            default_response: default_response.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Respond with `response` when the prompt contains `needle`
    pub async fn respond_when(&self, needle: impl Into<String>, response: impl Into<String>) {
        self.rules.lock().await.push(MockRule {
            needle: needle.into(),
            response: Some(response.into()),
            failure: None,
            delay: None,
        });
    }

    /// Fail when the prompt contains `needle`
    pub async fn fail_when(&self, needle: impl Into<String>, failure: MockFailure) {
        self.rules.lock().await.push(MockRule {
            needle: needle.into(),
            response: None,
            failure: Some(failure),
            delay: None,
        });
    }

    /// Sleep before answering when the prompt contains `needle`
    pub async fn delay_when(
        &self,
        needle: impl Into<String>,
        delay: Duration,
        response: impl Into<String>,
    ) {
        self.rules.lock().await.push(MockRule {
            needle: needle.into(),
            response: Some(response.into()),
            failure: None,
            delay: Some(delay),
        });
    }

    /// Prompts seen so far, in call order
    pub async fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let prompt = request.last_user_content().unwrap_or_default().to_string();
        self.calls.lock().await.push(prompt.clone());

        let matched = {
            let rules = self.rules.lock().await;
            rules.iter().find(|r| prompt.contains(&r.needle)).map(|r| {
                (
                    r.response.clone(),
                    r.failure,
                    r.delay,
                )
            })
        };

        let (response, failure, delay) = match matched {
            Some(rule) => rule,
            None => return Ok(self.default_response.clone()),
        };

        if let Some(d) = delay {
            if d >= request.timeout {
                return Err(EngineError::CompletionTimeout {
                    timeout_ms: request.timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(d).await;
        }

        match failure {
            Some(MockFailure::Timeout) => Err(EngineError::CompletionTimeout {
                timeout_ms: request.timeout.as_millis() as u64,
            }),
            Some(MockFailure::ApiError) => Err(EngineError::CompletionFailed {
                message: "simulated API error".to_string(),
            }),
            None => Ok(response.unwrap_or_else(|| self.default_response.clone())),
        }
    }
}

/// Shared handle type used across the engine
pub type SharedCompletionClient = Arc<dyn CompletionClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_rules_first_match_wins() {
        let client = MockCompletionClient::new("default");
        client.respond_when("alpha", "first").await;
        client.respond_when("alpha beta", "second").await;

        let request = CompletionRequest::new(
            vec![ChatMessage::user("alpha beta gamma")],
            100,
            Duration::from_secs(5),
        );
        let out = client.complete(request).await.unwrap();
        assert_eq!(out, "first");
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let client = MockCompletionClient::new("default");
        client.fail_when("judge", MockFailure::Timeout).await;

        let request = CompletionRequest::new(
            vec![ChatMessage::user("judge this evidence")],
            100,
            Duration::from_secs(5),
        );
        let err = client.complete(request).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_default_response() {
        let client = MockCompletionClient::new("fallback text");
        let request = CompletionRequest::new(
            vec![ChatMessage::user("anything")],
            100,
            Duration::from_secs(5),
        );
        assert_eq!(client.complete(request).await.unwrap(), "fallback text");
    }
}
