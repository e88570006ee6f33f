//! Pacing, backoff and caching through the public client API.

#![allow(
    clippy::tests_outside_test_module,
    clippy::missing_panics_doc,
    clippy::expect_used,
    missing_docs,
    reason = "Integration tests have different conventions"
)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use survey_analysis::{CompletionCache, LlmClient, RetryPolicy};
use survey_core::{CompletionProvider, Error};
use survey_providers::{MockOutcome, MockProvider};
use tokio::time::Instant;

const BASE: Duration = Duration::from_millis(250);

fn paced_client(provider: &MockProvider) -> LlmClient {
    let shared: Arc<dyn CompletionProvider> = Arc::new(provider.clone());
    LlmClient::new(shared, common::MODEL).with_retry_policy(RetryPolicy::with_base_delay(BASE))
}

fn throttled(provider: &MockProvider, times: usize) {
    for _ in 0..times {
        provider.push_outcome(MockOutcome::Throttle);
    }
}

#[tokio::test(start_paused = true)]
async fn test_throttled_request_backs_off_then_succeeds() {
    let provider = MockProvider::new();
    throttled(&provider, 3);
    provider.push_outcome(MockOutcome::Text("- Parking".to_owned()));
    let client = paced_client(&provider);

    let start = Instant::now();
    let themes = client
        .identify_themes(&["parking".to_owned()], "")
        .await
        .expect("themes");

    assert_eq!(themes, vec!["Parking"]);
    assert_eq!(start.elapsed(), BASE * 8);
    let stats = client.last_retry_stats().expect("retry stats");
    assert_eq!(stats.attempts, 4);
    assert_eq!(stats.backoff, BASE * 7);
    assert_eq!(provider.call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_throttling_is_exhausted() {
    let provider = MockProvider::new();
    throttled(&provider, 4);
    let cache = Arc::new(CompletionCache::in_memory(Duration::from_secs(3600)));
    let client = paced_client(&provider).with_cache(Arc::clone(&cache));

    let outcome = client.complete("prompt".to_owned(), "").await;

    assert!(matches!(outcome, Err(Error::RateLimitExhausted { attempts: 4 })));
    assert_eq!(provider.call_count(), 4);
    assert!(cache.is_empty());
    assert_eq!(client.usage().total_tokens(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cache_hit_is_not_paced() {
    let provider = MockProvider::new().with_default_response("answer");
    let cache = Arc::new(CompletionCache::in_memory(Duration::from_secs(3600)));
    let client = paced_client(&provider).with_cache(cache);

    client.complete("prompt".to_owned(), "system").await.expect("first");
    let start = Instant::now();
    let cached = client.complete("prompt".to_owned(), "system").await.expect("second");

    assert_eq!(cached, "answer");
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn test_system_prompt_is_part_of_the_cache_key() {
    let provider = MockProvider::new().with_default_response("answer");
    let cache = Arc::new(CompletionCache::in_memory(Duration::from_secs(3600)));
    let shared: Arc<dyn CompletionProvider> = Arc::new(provider.clone());
    let client = LlmClient::new(shared, common::MODEL)
        .with_retry_policy(RetryPolicy::with_base_delay(Duration::ZERO))
        .with_cache(Arc::clone(&cache));

    client.complete("prompt".to_owned(), "first context").await.expect("first");
    client.complete("prompt".to_owned(), "second context").await.expect("second");

    assert_eq!(provider.call_count(), 2);
    assert_eq!(cache.len(), 2);
}
