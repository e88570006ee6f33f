//! Mock provider for testing analysis runs.
//!
//! Allows defining canned responses for specific prompts, scripting
//! throttling and failures, and inspecting what was sent, enabling
//! end-to-end testing of the analyzer without real API calls.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use survey_core::{
    Completion, CompletionProvider, CompletionRequest, Error, IgnoreLock as _, Result, TokenUsage,
};

/// Dynamic response function.
type Handler = Arc<dyn Fn(&CompletionRequest) -> Result<String> + Send + Sync>;

/// One scripted reply, consumed in order before any other rule applies.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Answer with this text.
    Text(String),
    /// Answer as a throttled (HTTP 429) request.
    Throttle,
    /// Answer with a non-retryable upstream failure.
    Fail {
        /// HTTP status code to report.
        status: u16,
        /// Error message to report.
        message: String,
    },
}

/// Mock provider that returns pre-defined responses based on prompt patterns.
#[derive(Clone, Default)]
pub struct MockProvider {
    /// Pattern-matched responses, checked in insertion order
    responses: Arc<Mutex<Vec<(String, String)>>>,
    /// Default response if no match found
    default_response: Arc<Mutex<Option<String>>>,
    /// Dynamic response function, consulted before patterns
    handler: Option<Handler>,
    /// Scripted outcomes consumed first
    outcomes: Arc<Mutex<VecDeque<MockOutcome>>>,
    /// Call history for verification
    call_history: Arc<Mutex<Vec<CompletionRequest>>>,
    /// Simulated network latency
    latency: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MockProvider {
    /// Create an empty mock provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer prompts containing `pattern` with `response`.
    #[must_use]
    pub fn with_response(self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses
            .lock_ignore_poison()
            .push((pattern.into(), response.into()));
        self
    }

    /// Set a default response for prompts that don't match any pattern.
    #[must_use]
    pub fn with_default_response(self, response: impl Into<String>) -> Self {
        *self.default_response.lock_ignore_poison() = Some(response.into());
        self
    }

    /// Compute responses with a closure instead of fixed patterns.
    #[must_use]
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Sleep this long inside every call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a scripted outcome.
    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.outcomes.lock_ignore_poison().push_back(outcome);
    }

    /// Get the call history (every request received, in order).
    #[must_use]
    pub fn call_history(&self) -> Vec<CompletionRequest> {
        self.call_history.lock_ignore_poison().clone()
    }

    /// Get the number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_history.lock_ignore_poison().len()
    }

    /// Number of calls whose prompt contains `needle`.
    #[must_use]
    pub fn calls_containing(&self, needle: &str) -> usize {
        self.call_history
            .lock_ignore_poison()
            .iter()
            .filter(|request| request.prompt.contains(needle))
            .count()
    }

    /// Clear the call history.
    pub fn clear_history(&self) {
        self.call_history.lock_ignore_poison().clear();
    }

    /// Highest number of calls that were in progress at the same time.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn find_response(&self, prompt: &str) -> Option<String> {
        self.responses
            .lock_ignore_poison()
            .iter()
            .find(|(pattern, _)| prompt.contains(pattern.as_str()))
            .map(|(_, response)| response.clone())
    }

    fn resolve(&self, request: &CompletionRequest) -> Result<String> {
        let scripted = self.outcomes.lock_ignore_poison().pop_front();
        if let Some(outcome) = scripted {
            return match outcome {
                MockOutcome::Text(text) => Ok(text),
                MockOutcome::Throttle => Err(Error::Throttled("rate limited".to_owned())),
                MockOutcome::Fail { status, message } => Err(Error::Upstream { status, message }),
            };
        }
        if let Some(handler) = &self.handler {
            return handler(request);
        }
        if let Some(response) = self.find_response(&request.prompt) {
            return Ok(response);
        }
        let default = self.default_response.lock_ignore_poison().clone();
        Ok(default.unwrap_or_else(|| format!("Mock response for prompt: {}", request.prompt)))
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.call_history.lock_ignore_poison().push(request.clone());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            sleep(latency).await;
        }
        let outcome = self.resolve(request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let text = outcome?;
        Ok(Completion::new(
            text.clone(),
            TokenUsage {
                input: request.prompt.len() as u64,
                output: text.len() as u64,
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

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest::new("mock-model", 4096, prompt)
    }

    /// Tests substring prompt matching in mock provider.
    ///
    /// # Panics
    /// Panics if assertions fail during test execution.
    #[tokio::test]
    async fn test_mock_provider_substring_match() {
        let provider = MockProvider::new().with_response("Identify main themes", "- Parking");

        match provider.complete(&request("Identify main themes in these")).await {
            Ok(completion) => assert_eq!(completion.text, "- Parking"),
            Err(error) => panic!("completion failed: {error}"),
        }
    }

    #[tokio::test]
    async fn test_mock_provider_default_response() {
        let provider = MockProvider::new().with_default_response("Default response");

        let response = provider.complete(&request("unmatched")).await;
        assert!(matches!(response, Ok(completion) if completion.text == "Default response"));
    }

    #[tokio::test]
    async fn test_scripted_outcomes_come_first() {
        let provider = MockProvider::new().with_default_response("fallback");
        provider.push_outcome(MockOutcome::Throttle);
        provider.push_outcome(MockOutcome::Fail {
            status: 400,
            message: "bad".to_owned(),
        });
        provider.push_outcome(MockOutcome::Text("scripted".to_owned()));

        assert!(matches!(
            provider.complete(&request("a")).await,
            Err(Error::Throttled(_))
        ));
        assert!(matches!(
            provider.complete(&request("a")).await,
            Err(Error::Upstream { status: 400, .. })
        ));
        assert!(matches!(
            provider.complete(&request("a")).await,
            Ok(completion) if completion.text == "scripted"
        ));
        assert!(matches!(
            provider.complete(&request("a")).await,
            Ok(completion) if completion.text == "fallback"
        ));
    }

    #[tokio::test]
    async fn test_handler_and_history() {
        let provider =
            MockProvider::new().with_handler(|request| Ok(format!("len={}", request.prompt.len())));

        let first = provider.complete(&request("abc")).await;
        assert!(matches!(first, Ok(completion) if completion.text == "len=3"));
        let second = provider.complete(&request("abcdef")).await;
        assert!(matches!(second, Ok(completion) if completion.text == "len=6"));

        assert_eq!(provider.call_count(), 2);
        assert_eq!(provider.calls_containing("abcd"), 1);
        assert_eq!(provider.call_history()[0].prompt, "abc");

        provider.clear_history();
        assert_eq!(provider.call_count(), 0);
    }
}
