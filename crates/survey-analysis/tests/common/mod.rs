//! Shared fixtures for analysis integration tests.

#![allow(dead_code, reason = "Not every test binary uses every fixture")]

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use survey_analysis::{Analyzer, CompletionCache, LlmClient, RetryPolicy};
use survey_core::{AnalysisConfig, CompletionProvider, CompletionRequest, Error, ResponseRecord, Result};
use survey_providers::MockProvider;

pub const MODEL: &str = "claude-3-haiku-20240307";

pub fn themes() -> Vec<String> {
    vec!["Parking".to_owned(), "Staff".to_owned(), "Cost".to_owned()]
}

/// Records numbered from row 2, as a CSV ingest would produce them.
pub fn records(texts: &[&str]) -> Vec<ResponseRecord> {
    texts
        .iter()
        .enumerate()
        .map(|(index, text)| ResponseRecord::new(index + 2, *text))
        .collect()
}

fn keyword_themes(text: &str) -> Vec<usize> {
    let lower = text.to_lowercase();
    [("park", 1), ("staff", 2), ("price", 3)]
        .iter()
        .filter(|(keyword, _)| lower.contains(keyword))
        .map(|(_, number)| *number)
        .collect()
}

fn answer_batch(prompt: &str) -> Result<String> {
    let mut answer = String::new();
    for line in prompt.lines() {
        let Some(rest) = line.strip_prefix("RESPONSE ") else {
            continue;
        };
        let Some((number, text)) = rest.split_once(": ") else {
            continue;
        };
        if text.starts_with("[comma-separated") {
            continue;
        }
        if text.contains("FAIL") {
            return Err(Error::Upstream {
                status: 500,
                message: "batch rejected".to_owned(),
            });
        }
        let numbers: Vec<String> = keyword_themes(text).iter().map(ToString::to_string).collect();
        if !numbers.is_empty() {
            writeln!(answer, "RESPONSE {number}: {}", numbers.join(", "))
                .map_err(|error| Error::Other(error.to_string()))?;
        }
    }
    Ok(answer)
}

/// Answers every prompt kind the analyzer sends, deterministically.
pub fn survey_handler(request: &CompletionRequest) -> Result<String> {
    let prompt = request.prompt.as_str();
    if prompt.starts_with("Identify main themes") {
        Ok("Themes:\n- Parking\n- Staff\n- Cost".to_owned())
    } else if prompt.starts_with("Analyze multiple survey responses") {
        answer_batch(prompt)
    } else if let Some(rest) = prompt.strip_prefix("Theme: ") {
        let theme = rest.lines().next().unwrap_or_default();
        Ok(format!(
            "SUMMARY:\nPeople talk about {theme}.\n\nUNIQUE IDEAS:\nIDEA: more {theme}"
        ))
    } else if prompt.starts_with("Theme summaries from survey responses") {
        Ok("Overall the survey is mixed.".to_owned())
    } else if prompt.starts_with("Here are the themes and their associated responses") {
        Ok("Legacy overview.".to_owned())
    } else {
        Ok(String::new())
    }
}

pub fn provider() -> MockProvider {
    MockProvider::new().with_handler(survey_handler)
}

pub fn client(provider: &MockProvider, cache: Option<Arc<CompletionCache>>) -> LlmClient {
    let shared: Arc<dyn CompletionProvider> = Arc::new(provider.clone());
    let client = LlmClient::new(shared, MODEL)
        .with_retry_policy(RetryPolicy::with_base_delay(Duration::ZERO));
    match cache {
        Some(cache) => client.with_cache(cache),
        None => client,
    }
}

pub fn analyzer(provider: &MockProvider, cache: Option<Arc<CompletionCache>>) -> Analyzer {
    Analyzer::new(Arc::new(client(provider, cache)))
}

/// Themed summaries with both prompts set.
pub fn themed_config() -> AnalysisConfig {
    AnalysisConfig {
        context_prompt: "You analyze hospital visitor feedback.".to_owned(),
        theme_summary_prompt: Some("Summarize this theme.".to_owned()),
        global_summary_prompt: Some("Summarize the survey.".to_owned()),
        summary_length: 300,
        ..AnalysisConfig::default()
    }
}
