//! Model client for the analysis workflow.
//!
//! [`LlmClient`] turns domain requests into prompts, answers them from the
//! completion cache when it can, paces and retries live requests, keeps
//! running usage totals and parses the structured parts of each answer.

/// Answer parsers
pub mod extract;
/// Per-model token prices
pub mod pricing;
/// Prompt builders
pub mod prompts;
/// Pacing and backoff
pub mod retry;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use survey_core::{
    CompletionProvider, CompletionRequest, DEFAULT_MAX_TOKENS, IgnoreLock as _, OutputLanguage,
    Result, ThemeSummary,
};

use crate::cache::CompletionCache;
pub use pricing::UsageTotals;
pub use retry::{RetryPolicy, RetryStats};

/// Cache-first, rate-limited access to a completion provider.
pub struct LlmClient {
    provider: Arc<dyn CompletionProvider>,
    cache: Option<Arc<CompletionCache>>,
    model: String,
    max_tokens: u32,
    language: OutputLanguage,
    retry: RetryPolicy,
    usage: Mutex<UsageTotals>,
    last_retry: Mutex<Option<RetryStats>>,
}

impl LlmClient {
    /// Creates a client for `model` with no cache, English output and default pacing.
    pub fn new(provider: Arc<dyn CompletionProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            cache: None,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            language: OutputLanguage::default(),
            retry: RetryPolicy::default(),
            usage: Mutex::new(UsageTotals::default()),
            last_retry: Mutex::new(None),
        }
    }

    /// Answers repeated requests from `cache`.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<CompletionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the language user-facing text is written in.
    #[must_use]
    pub fn with_language(mut self, language: OutputLanguage) -> Self {
        self.language = language;
        self
    }

    /// Replaces the pacing and backoff policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the completion length cap sent with every request.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Model identifier used for requests and pricing
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The completion cache, if one is attached
    pub fn cache(&self) -> Option<&Arc<CompletionCache>> {
        self.cache.as_ref()
    }

    /// Running totals of every live completion so far.
    pub fn usage(&self) -> UsageTotals {
        *self.usage.lock_ignore_poison()
    }

    /// Attempts and backoff of the most recent live request.
    pub fn last_retry_stats(&self) -> Option<RetryStats> {
        *self.last_retry.lock_ignore_poison()
    }

    /// Completion text for `prompt`, from the cache or the provider.
    ///
    /// # Errors
    /// Returns the provider error, or [`survey_core::Error::RateLimitExhausted`]
    /// when throttling outlasts every retry.
    pub async fn complete(&self, prompt: String, system_prompt: &str) -> Result<String> {
        let mut request = CompletionRequest::new(self.model.clone(), self.max_tokens, prompt);
        if !system_prompt.is_empty() {
            request = request.with_system_prompt(system_prompt);
        }
        let fingerprint = request.fingerprint();

        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(&fingerprint)) {
            return Ok(cached);
        }

        tracing::debug!(
            model = %self.model,
            prompt_length = request.prompt.len(),
            system_prompt_length = system_prompt.len(),
            "Sending completion request"
        );

        let (stats, outcome) = self.retry.run(|| self.provider.complete(&request)).await;
        *self.last_retry.lock_ignore_poison() = Some(stats);
        let completion = outcome?;

        let (cost, totals) = {
            let mut usage = self.usage.lock_ignore_poison();
            let cost = usage.record(&self.model, completion.usage);
            (cost, *usage)
        };
        tracing::info!(
            input_tokens = completion.usage.input,
            output_tokens = completion.usage.output,
            cost = %format!("${cost:.4}"),
            total_cost = %format!("${:.4}", totals.cost),
            "Received completion"
        );

        if let Some(cache) = &self.cache
            && let Err(error) = cache.set(&fingerprint, &completion.text)
        {
            tracing::warn!(%error, "Failed to cache completion");
        }

        Ok(completion.text)
    }

    /// Discovers the theme list from a deterministic sample of `responses`.
    ///
    /// # Errors
    /// Propagates any completion error.
    pub async fn identify_themes(
        &self,
        responses: &[String],
        context_prompt: &str,
    ) -> Result<Vec<String>> {
        let prompt = prompts::identify_themes(responses, self.language);
        let answer = self.complete(prompt, context_prompt).await?;
        let themes = extract::dash_list(&answer);
        tracing::info!(count = themes.len(), "Identified themes");
        Ok(themes)
    }

    /// Themes that a single response relates to.
    ///
    /// # Errors
    /// Propagates any completion error.
    pub async fn match_response(
        &self,
        response: &str,
        themes: &[String],
        context_prompt: &str,
    ) -> Result<Vec<String>> {
        let prompt = prompts::match_response(response, themes);
        let answer = self.complete(prompt, context_prompt).await?;
        Ok(extract::numbers_to_themes(
            &extract::dash_numbers(&answer),
            themes,
        ))
    }

    /// Theme assignments for `responses`, one request per contiguous batch.
    ///
    /// The result is positional and always as long as `responses`.
    ///
    /// # Errors
    /// Returns the first batch's completion error.
    pub async fn match_batch(
        &self,
        responses: &[String],
        themes: &[String],
        context_prompt: &str,
        batch_size: usize,
    ) -> Result<Vec<Vec<String>>> {
        let batch_size = if batch_size == 0 { 10 } else { batch_size };
        let mut assignments = Vec::with_capacity(responses.len());
        for batch in responses.chunks(batch_size) {
            let prompt = prompts::match_batch(batch, themes);
            let answer = self.complete(prompt, context_prompt).await?;
            assignments.extend(extract::batch_assignments(&answer, batch.len(), themes));
        }
        Ok(assignments)
    }

    /// Summary and unique ideas for one theme.
    ///
    /// # Errors
    /// Propagates any completion error.
    pub async fn summarize_theme(
        &self,
        theme: &str,
        responses: &[String],
        system_prompt: &str,
    ) -> Result<ThemeSummary> {
        let prompt = prompts::theme_summary(theme, responses, self.language);
        let answer = self.complete(prompt, system_prompt).await?;
        Ok(extract::summary_and_ideas(&answer))
    }

    /// Synthesis across theme summaries, in canonical theme order.
    ///
    /// # Errors
    /// Propagates any completion error.
    pub async fn generate_global_summary(
        &self,
        themes: &[String],
        summaries: &BTreeMap<String, ThemeSummary>,
        system_prompt: &str,
        summary_length: u32,
    ) -> Result<String> {
        let prompt = prompts::global_summary(themes, summaries, summary_length, self.language);
        self.complete(prompt, system_prompt).await
    }

    /// One-shot summary straight from theme → response texts.
    ///
    /// # Errors
    /// Propagates any completion error.
    pub async fn generate_legacy_summary(
        &self,
        themes: &[String],
        theme_responses: &BTreeMap<String, Vec<String>>,
        system_prompt: &str,
        summary_length: u32,
    ) -> Result<String> {
        let prompt =
            prompts::legacy_summary(themes, theme_responses, summary_length, self.language);
        self.complete(prompt, system_prompt).await
    }
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;
    use std::time::Duration;
    use survey_core::Error;
    use survey_providers::{MockOutcome, MockProvider};

    fn scripted(answers: &[&str]) -> MockProvider {
        let provider = MockProvider::new();
        for answer in answers {
            provider.push_outcome(MockOutcome::Text((*answer).to_owned()));
        }
        provider
    }

    fn client(provider: &MockProvider) -> LlmClient {
        let provider: Arc<dyn CompletionProvider> = Arc::new(provider.clone());
        LlmClient::new(provider, "claude-3-haiku-20240307")
            .with_retry_policy(RetryPolicy::with_base_delay(Duration::ZERO))
    }

    fn themes() -> Vec<String> {
        vec!["Parking".to_owned(), "Staff".to_owned()]
    }

    #[tokio::test]
    async fn test_cache_hit_skips_provider() {
        let provider = scripted(&["- Parking\n- Staff"]);
        let cache = Arc::new(CompletionCache::in_memory(Duration::from_secs(3600)));
        let client = client(&provider).with_cache(Arc::clone(&cache));
        let responses = vec!["no parking".to_owned()];

        let first = client.identify_themes(&responses, "context").await;
        let second = client.identify_themes(&responses, "context").await;
        assert!(matches!(&first, Ok(themes) if themes.len() == 2));
        assert_eq!(first.ok(), second.ok());
        assert_eq!(provider.call_count(), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_usage_accumulates() {
        let provider = scripted(&["ab", "cd"]);
        let client = client(&provider);
        assert!(client.complete("one".to_owned(), "").await.is_ok());
        assert!(client.complete("three".to_owned(), "").await.is_ok());

        let usage = client.usage();
        assert_eq!(usage.input_tokens, 8);
        assert_eq!(usage.output_tokens, 4);
        let expected = 8.0f64.mul_add(0.25, 4.0 * 1.25) / 1_000_000.0;
        assert!((usage.cost - expected).abs() < 1e-12);
        assert!(matches!(client.last_retry_stats(), Some(stats) if stats.attempts == 1));
    }

    #[tokio::test]
    async fn test_matching_prompt_exempt_from_language() {
        let provider = scripted(&["RESPONSE 1: 2"]);
        let client = client(&provider).with_language(OutputLanguage::Italian);
        let result = client
            .match_batch(&["rude".to_owned()], &themes(), "context", 10)
            .await;
        assert!(matches!(result, Ok(assignments) if assignments == vec![vec!["Staff".to_owned()]]));

        let calls = provider.call_history();
        assert_eq!(calls[0].system_prompt.as_deref(), Some("context"));
        assert!(!calls[0].prompt.contains("Respond in Italian."));
    }

    #[tokio::test]
    async fn test_match_batch_splits_into_chunks() {
        let provider = scripted(&["RESPONSE 1: 1\nRESPONSE 2: 2", "RESPONSE 1: 1, 2"]);
        let client = client(&provider);
        let responses: Vec<String> = ["a", "b", "c"].iter().map(|text| (*text).to_owned()).collect();
        let result = client.match_batch(&responses, &themes(), "", 2).await;

        match result {
            Ok(assignments) => {
                assert_eq!(assignments.len(), 3);
                assert_eq!(assignments[1], vec!["Staff"]);
                assert_eq!(assignments[2], vec!["Parking", "Staff"]);
            }
            Err(error) => panic!("matching failed: {error}"),
        }
        let calls = provider.call_history();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].system_prompt.is_none());
    }

    #[tokio::test]
    async fn test_match_response_single() {
        let provider = scripted(&["- 2\n- 5"]);
        let client = client(&provider);
        let result = client.match_response("rude staff", &themes(), "context").await;
        assert!(matches!(result, Ok(matched) if matched == vec!["Staff".to_owned()]));
    }

    #[tokio::test]
    async fn test_summarize_theme_parses_sections() {
        let provider = scripted(&["SUMMARY:\nToo few spaces.\n\nUNIQUE IDEAS:\nIDEA: shuttle bus"]);
        let client = client(&provider).with_language(OutputLanguage::SwissGerman);
        let result = client
            .summarize_theme("Parking", &["no spaces".to_owned()], "summarize")
            .await;
        match result {
            Ok(summary) => {
                assert_eq!(summary.summary, "Too few spaces.");
                assert_eq!(summary.unique_ideas, vec!["shuttle bus"]);
            }
            Err(error) => panic!("summary failed: {error}"),
        }
        assert_eq!(provider.calls_containing("Swiss High German"), 1);
    }

    #[tokio::test]
    async fn test_upstream_error_is_not_cached() {
        let provider = MockProvider::new();
        provider.push_outcome(MockOutcome::Fail {
            status: 500,
            message: "overloaded".to_owned(),
        });
        provider.push_outcome(MockOutcome::Text("- Parking".to_owned()));
        let cache = Arc::new(CompletionCache::in_memory(Duration::from_secs(3600)));
        let client = client(&provider).with_cache(Arc::clone(&cache));

        let failed = client.complete("prompt".to_owned(), "").await;
        assert!(matches!(failed, Err(Error::Upstream { status: 500, .. })));
        assert!(cache.is_empty());

        let retried = client.complete("prompt".to_owned(), "").await;
        assert!(matches!(retried, Ok(text) if text == "- Parking"));
        assert_eq!(cache.len(), 1);
    }
}
