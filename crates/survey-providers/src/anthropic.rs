//! Anthropic Messages API adapter.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

use survey_core::{Completion, CompletionProvider, CompletionRequest, Error, Result, TokenUsage};

/// Anthropic Messages API endpoint URL.
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
/// API version header value.
const API_VERSION: &str = "2023-06-01";
/// Env var key for the Anthropic API key.
const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
/// Sampling temperature sent with every request.
const TEMPERATURE: f64 = 0.7;
/// Client-side timeout when none is configured.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Provider implementation for the Anthropic Messages API.
pub struct AnthropicProvider {
    /// HTTP client for API requests.
    client: Client,
    /// Anthropic API key.
    api_key: String,
    /// Messages endpoint, overridable for tests.
    endpoint: String,
    /// Per-request timeout.
    timeout: Duration,
}

impl AnthropicProvider {
    /// Creates a new `AnthropicProvider` with the given API key.
    ///
    /// # Errors
    /// Returns an error if the provided API key is empty.
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::MissingApiKey(ENV_ANTHROPIC_API_KEY.to_owned()));
        }

        Ok(Self {
            client: Client::default(),
            api_key,
            endpoint: ANTHROPIC_API_URL.to_owned(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Creates a new `AnthropicProvider` from environment variables.
    ///
    /// # Errors
    /// Returns an error if the env var is missing.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var(ENV_ANTHROPIC_API_KEY)
            .map_err(|_| Error::MissingApiKey(ENV_ANTHROPIC_API_KEY.to_owned()))?;
        Self::new(api_key)
    }

    /// Sets the client-side timeout applied to each request.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Points the provider at a different messages endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn build_body(request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": TEMPERATURE,
            "messages": [
                {
                    "role": "user",
                    "content": request.prompt
                }
            ]
        });
        if let Some(system) = request.system_prompt.as_deref().filter(|text| !text.is_empty()) {
            body["system"] = Value::String(system.to_owned());
        }
        body
    }
}

/// Pulls `error.message` out of an error body, falling back to the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| body.to_owned())
}

/// Response payload returned by the Messages API.
#[derive(Deserialize)]
struct MessagesResponse {
    /// Content blocks; only `text` blocks are used.
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .timeout(self.timeout)
            .json(&Self::build_body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = extract_error_message(&body);
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(Error::Throttled(message));
            }
            return Err(Error::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let api_response: MessagesResponse = response
            .json()
            .await
            .map_err(|err| Error::InvalidResponse(format!("failed to parse response: {err}")))?;

        let text: String = api_response
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect();

        tracing::debug!(
            model = %request.model,
            input_tokens = api_response.usage.input_tokens,
            output_tokens = api_response.usage.output_tokens,
            response_length = text.len(),
            "Received completion"
        );

        Ok(Completion::new(
            text,
            TokenUsage {
                input: api_response.usage.input_tokens,
                output: api_response.usage.output_tokens,
            },
        ))
    }
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> AnthropicProvider {
        match AnthropicProvider::new("test_key".to_owned()) {
            Ok(provider) => provider.with_endpoint(format!("{}/v1/messages", server.uri())),
            Err(error) => panic!("provider construction failed: {error}"),
        }
    }

    /// Tests that creating a provider with an empty API key returns an error.
    ///
    /// # Panics
    /// Panics if assertions fail during test execution.
    #[test]
    fn test_new_with_empty_api_key() {
        let result = AnthropicProvider::new(String::new());
        assert!(matches!(result, Err(Error::MissingApiKey(_))));
    }

    #[test]
    fn test_builders() {
        let result = AnthropicProvider::new("valid_key".to_owned());
        assert!(result.is_ok());
        if let Ok(provider) = result {
            let provider = provider
                .with_timeout(Duration::from_secs(5))
                .with_endpoint("http://localhost:1/v1/messages");
            assert_eq!(provider.timeout, Duration::from_secs(5));
            assert_eq!(provider.endpoint, "http://localhost:1/v1/messages");
            assert_eq!(provider.name(), "anthropic");
        }
    }

    #[test]
    fn test_build_body_omits_empty_system_prompt() {
        let request = CompletionRequest::new("claude-3-haiku-20240307", 4096, "hello");
        let body = AnthropicProvider::build_body(&request);
        assert!(body.get("system").is_none());
        assert_eq!(body["messages"][0]["content"].as_str(), Some("hello"));
        assert_eq!(body["max_tokens"].as_u64(), Some(4096));

        let with_system = AnthropicProvider::build_body(&request.with_system_prompt("context"));
        assert_eq!(with_system["system"].as_str(), Some("context"));
    }

    #[test]
    fn test_extract_error_message() {
        let body = r#"{"type":"error","error":{"type":"invalid_request_error","message":"max_tokens too large"}}"#;
        assert_eq!(extract_error_message(body), "max_tokens too large");
        assert_eq!(extract_error_message("gateway timeout"), "gateway timeout");
    }

    /// Tests a successful round trip against a local server.
    ///
    /// # Panics
    /// Panics if assertions fail during test execution.
    #[tokio::test]
    async fn test_complete_concatenates_text_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("anthropic-version", API_VERSION))
            .and(header("x-api-key", "test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "text", "text": "- Parking\n"},
                    {"type": "text", "text": "- Staff"}
                ],
                "usage": {"input_tokens": 120, "output_tokens": 8}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let request = CompletionRequest::new("claude-3-haiku-20240307", 4096, "themes?");
        match provider.complete(&request).await {
            Ok(completion) => {
                assert_eq!(completion.text, "- Parking\n- Staff");
                assert_eq!(completion.usage.input, 120);
                assert_eq!(completion.usage.output, 8);
            }
            Err(error) => panic!("completion failed: {error}"),
        }
    }

    #[tokio::test]
    async fn test_complete_maps_throttling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "type": "error",
                "error": {"type": "rate_limit_error", "message": "slow down"}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let request = CompletionRequest::new("claude-3-haiku-20240307", 4096, "x");
        let result = provider.complete(&request).await;
        assert!(matches!(result, Err(Error::Throttled(message)) if message == "slow down"));
    }

    #[tokio::test]
    async fn test_complete_maps_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let request = CompletionRequest::new("claude-3-haiku-20240307", 4096, "x");
        match provider.complete(&request).await {
            Err(Error::Upstream { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "overloaded");
            }
            Err(error) => panic!("unexpected error: {error}"),
            Ok(_) => panic!("expected an upstream error"),
        }
    }
}
