//! LLM client for OpenAI-compatible chat completion endpoints.
//!
//! Works against Groq (the default), OpenRouter, Together, or any local
//! vLLM/Ollama server exposing `/chat/completions`.
//! - JSON mode via `response_format: {"type": "json_object"}`
//! - Exponential backoff on network and 5xx errors
//! - `retry-after` honoured on 429
//! - No retry on 401/404

use crate::client::{CompletionBackend, CompletionRequest};
use crate::models::{LlmConfig, LlmError, QuantvalError, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest wait honoured from a `retry-after` header.
pub const MAX_RETRY_AFTER_SECS: f64 = 60.0;

/// Wait used when a 429 carries no usable `retry-after`.
const DEFAULT_RETRY_AFTER_SECS: f64 = 1.0;

/// Message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
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
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Raw text reply from one chat completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Generated content
    pub content: String,
    /// Model used (may differ from requested)
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Request duration
    pub duration: Duration,
}

/// HTTP completion client.
pub struct LlmClient {
    client: reqwest::Client,
    /// API key (None for local endpoints without auth)
    api_key: Option<String>,
    base_url: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
    /// HTTP attempts per completion
    max_retries: u32,
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
}

impl LlmClient {
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(QuantvalError::Network)?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            max_tokens,
            timeout,
            max_retries: max_retries.max(1),
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &LlmConfig, api_key: Option<String>) -> Result<Self> {
        Self::new(
            api_key,
            config.base_url.clone(),
            config.model.clone(),
            config.max_tokens,
            config.timeout_secs,
            config.http_retries,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build headers for a request.
    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        if let Some(ref api_key) = self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| QuantvalError::InvalidInput(format!("API key is not a valid header: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn backoff(attempt: u32) -> Duration {
        Duration::from_secs(2u64.pow(attempt))
    }

    /// Send one chat request, retrying transient failures.
    pub async fn chat(
        &self,
        messages: Vec<Message>,
        temperature: f64,
        json_mode: bool,
    ) -> Result<ChatResponse> {
        let start = Instant::now();
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature,
            response_format: json_mode.then_some(ResponseFormat { kind: "json_object" }),
        };

        let url = format!("{}/chat/completions", self.base_url);
        let headers = self.headers()?;
        let mut last_error: Option<QuantvalError> = None;

        for attempt in 0..self.max_retries {
            let is_last = attempt + 1 == self.max_retries;

            let response = self
                .client
                .post(&url)
                .headers(headers.clone())
                .json(&request)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    if e.is_timeout() {
                        last_error = Some(QuantvalError::Timeout(self.timeout));
                    } else {
                        last_error = Some(QuantvalError::Network(e));
                    }
                    if !is_last {
                        let backoff = Self::backoff(attempt);
                        debug!(
                            model = %self.model,
                            attempt = attempt,
                            backoff_secs = backoff.as_secs(),
                            "Retrying after network error"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
            };

            let status = response.status().as_u16();

            if status == 429 {
                let retry_after = retry_after_secs(
                    response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok()),
                );

                last_error = Some(QuantvalError::RateLimited {
                    retry_after_secs: retry_after,
                });

                if !is_last {
                    debug!(
                        model = %self.model,
                        attempt = attempt,
                        retry_after_secs = retry_after,
                        "Rate limited, waiting"
                    );
                    tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;
                }
                continue;
            }

            if !response.status().is_success() {
                let error_body = response.text().await.unwrap_or_default();
                let message = match serde_json::from_str::<ApiErrorResponse>(&error_body) {
                    Ok(api_error) => api_error.error.message,
                    Err(_) => error_body,
                };
                let error = match status {
                    401 => LlmError::AuthenticationFailed,
                    404 => LlmError::ModelNotFound(self.model.clone()),
                    _ => LlmError::ApiError { status, message },
                };

                last_error = Some(QuantvalError::Llm(error));

                // Don't retry auth errors or not found
                if status == 401 || status == 404 {
                    break;
                }

                if !is_last {
                    tokio::time::sleep(Self::backoff(attempt)).await;
                }
                continue;
            }

            let body: ChatCompletionResponse = response
                .json()
                .await
                .map_err(|e| QuantvalError::ParseError(format!("Failed to parse response: {e}")))?;

            let content = body
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| {
                    QuantvalError::Llm(LlmError::InvalidResponse("No content in response".to_string()))
                })?;

            let usage = body.usage.unwrap_or_default();
            self.total_input_tokens
                .fetch_add(usage.prompt_tokens as u64, Ordering::Relaxed);
            self.total_output_tokens
                .fetch_add(usage.completion_tokens as u64, Ordering::Relaxed);

            return Ok(ChatResponse {
                content,
                model: body.model.unwrap_or_else(|| self.model.clone()),
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                duration: start.elapsed(),
            });
        }

        Err(last_error.unwrap_or_else(|| {
            QuantvalError::Llm(LlmError::MaxRetriesExceeded {
                attempts: self.max_retries,
                last_error: "Unknown error".to_string(),
            })
        }))
    }

    /// Total (input, output) tokens across all successful calls.
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Value> {
        let messages = vec![
            Message::system(&request.system_prompt),
            Message::user(&request.user_prompt),
        ];
        let response = self
            .chat(messages, request.temperature, request.json_mode)
            .await?;
        debug!(
            model = %response.model,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            duration_ms = response.duration.as_millis() as u64,
            "Completion received"
        );
        Ok(parse_reply(&response.content))
    }
}

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("code fence pattern is valid")
});

/// Interpret a completion's text as JSON.
///
/// Tries the whole text, then a fenced block, then the outermost `{...}`
/// span. Anything else becomes `{"response": <text>}`.
pub fn parse_reply(content: &str) -> Value {
    let trimmed = content.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return value;
    }
    if let Some(inner) = CODE_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(inner.as_str()) {
            return value;
        }
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return value;
            }
        }
    }
    json!({ "response": content })
}

/// Seconds to wait for a 429 `retry-after` header value, within
/// `[0, MAX_RETRY_AFTER_SECS]`.
fn retry_after_secs(header: Option<&str>) -> f64 {
    header
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite())
        .map(|secs| secs.clamp(0.0, MAX_RETRY_AFTER_SECS))
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, retries: u32) -> LlmClient {
        LlmClient::new(
            Some("gsk-test".to_string()),
            server.uri(),
            "llama-3.3-70b-versatile",
            2000,
            10,
            retries,
        )
        .unwrap()
    }

    fn completion(content: &str) -> Value {
        json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 34, "total_tokens": 46 },
            "model": "llama-3.3-70b-versatile"
        })
    }

    #[test]
    fn test_parse_reply_variants() {
        assert_eq!(parse_reply(r#"{"a": 1}"#), json!({"a": 1}));
        assert_eq!(
            parse_reply("Here you go:\n```json\n{\"a\": 2}\n```"),
            json!({"a": 2})
        );
        assert_eq!(parse_reply("Result: {\"a\": 3} done"), json!({"a": 3}));
        assert_eq!(
            parse_reply("Speed problems share a pattern."),
            json!({"response": "Speed problems share a pattern."})
        );
        assert_eq!(parse_reply("[1, 2]"), json!({"response": "[1, 2]"}));
    }

    #[tokio::test]
    async fn test_json_mode_request_and_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer gsk-test"))
            .and(body_partial_json(json!({
                "model": "llama-3.3-70b-versatile",
                "temperature": 0.4,
                "response_format": { "type": "json_object" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(r#"{"question": "q"}"#)))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, 3);
        let value = client
            .complete(&CompletionRequest::json("system", "user", 0.4))
            .await
            .unwrap();

        assert_eq!(value["question"], "q");
        assert_eq!(client.total_tokens(), (12, 34));
    }

    #[tokio::test]
    async fn test_rate_limit_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("plain text")))
            .mount(&server)
            .await;

        let value = client(&server, 3)
            .complete(&CompletionRequest::text("system", "user", 0.2))
            .await
            .unwrap();
        assert_eq!(value, json!({"response": "plain text"}));
    }

    #[test]
    fn test_retry_after_is_bounded() {
        assert_eq!(retry_after_secs(Some("2")), 2.0);
        assert_eq!(retry_after_secs(Some(" 0.5 ")), 0.5);
        assert_eq!(retry_after_secs(Some("1e30")), MAX_RETRY_AFTER_SECS);
        assert_eq!(retry_after_secs(Some("inf")), DEFAULT_RETRY_AFTER_SECS);
        assert_eq!(retry_after_secs(Some("NaN")), DEFAULT_RETRY_AFTER_SECS);
        assert_eq!(retry_after_secs(Some("-5")), 0.0);
        assert_eq!(retry_after_secs(Some("soon")), DEFAULT_RETRY_AFTER_SECS);
        assert_eq!(retry_after_secs(None), DEFAULT_RETRY_AFTER_SECS);
    }

    #[tokio::test]
    async fn test_huge_retry_after_is_clamped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1e30"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, 1)
            .complete(&CompletionRequest::json("system", "user", 0.2))
            .await
            .unwrap_err();
        match err {
            QuantvalError::RateLimited { retry_after_secs } => {
                assert_eq!(retry_after_secs, MAX_RETRY_AFTER_SECS);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "Invalid API Key", "type": "invalid_request_error" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, 3)
            .complete(&CompletionRequest::json("system", "user", 0.2))
            .await
            .unwrap_err();
        assert!(matches!(err, QuantvalError::Llm(LlmError::AuthenticationFailed)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_api_error_message_is_extracted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "message": "max_tokens too large" }
            })))
            .mount(&server)
            .await;

        let err = client(&server, 1)
            .complete(&CompletionRequest::json("system", "user", 0.2))
            .await
            .unwrap_err();
        match err {
            QuantvalError::Llm(LlmError::ApiError { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "max_tokens too large");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_content_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = client(&server, 1)
            .complete(&CompletionRequest::json("system", "user", 0.2))
            .await
            .unwrap_err();
        assert!(matches!(err, QuantvalError::Llm(LlmError::InvalidResponse(_))));
    }
}
