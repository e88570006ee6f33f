//! End-to-end analysis runs against a scripted provider.

#![allow(
    clippy::min_ident_chars,
    clippy::tests_outside_test_module,
    clippy::missing_panics_doc,
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    missing_docs,
    reason = "Integration tests have different conventions"
)]

mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use common::{analyzer, provider, records, themed_config, themes};
use survey_analysis::CompletionCache;
use survey_core::{AnalysisConfig, AnalysisResult, AnalysisStage, Error};
use survey_providers::{MockOutcome, MockProvider};
use tempfile::TempDir;

const BATCH_PREFIX: &str = "Analyze multiple survey responses";

fn assignments(result: &AnalysisResult) -> BTreeMap<String, Vec<String>> {
    result
        .response_analyses
        .iter()
        .map(|(id, analysis)| (id.clone(), analysis.themes.clone()))
        .collect()
}

fn batch_prompts(provider: &MockProvider) -> Vec<String> {
    provider
        .call_history()
        .into_iter()
        .map(|request| request.prompt)
        .filter(|prompt| prompt.starts_with(BATCH_PREFIX))
        .collect()
}

fn configured(themes: Vec<String>) -> AnalysisConfig {
    AnalysisConfig {
        themes,
        ..themed_config()
    }
}

#[tokio::test]
async fn test_rerun_with_persistent_cache_makes_no_calls() {
    let dir = TempDir::new().expect("temp dir");
    let ttl = Duration::from_secs(3600);
    let responses = records(&[
        "No parking at all",
        "Staff were kind",
        "Prices too high for parking",
        "Nothing to add",
    ]);
    let config = themed_config();

    let first_provider = provider();
    let cache = Arc::new(CompletionCache::persistent(dir.path(), ttl).expect("open cache"));
    let first = analyzer(&first_provider, Some(cache))
        .analyze(&responses, &config, None, "Feedback")
        .await
        .expect("first run");
    assert!(first_provider.call_count() > 0);
    assert_eq!(first.themes, themes());

    let second_provider = provider();
    let reopened = Arc::new(CompletionCache::persistent(dir.path(), ttl).expect("reopen cache"));
    let second = analyzer(&second_provider, Some(Arc::clone(&reopened)))
        .analyze(&responses, &config, None, "Feedback")
        .await
        .expect("second run");

    assert_eq!(second_provider.call_count(), 0);
    assert_eq!(reopened.stats().misses, 0);
    assert_eq!(second.themes, first.themes);
    assert_eq!(assignments(&second), assignments(&first));
    assert_eq!(second.theme_analyses, first.theme_analyses);
    assert_eq!(second.theme_summaries, first.theme_summaries);
    assert_eq!(second.global_summary, first.global_summary);
}

#[tokio::test]
async fn test_only_new_responses_are_matched() {
    let provider = provider();
    let analyzer = analyzer(&provider, None);
    let config = configured(themes());

    let first = analyzer
        .analyze(&records(&["No parking near the entrance"]), &config, None, "Feedback")
        .await
        .expect("first run");

    provider.clear_history();
    let grown = records(&["No parking near the entrance", "Staff ignored me"]);
    let second = analyzer
        .analyze(&grown, &config, Some(&first), "Feedback")
        .await
        .expect("second run");

    assert_eq!(
        second.response_analyses["R2"].analyzed_at,
        first.response_analyses["R2"].analyzed_at
    );
    assert_eq!(second.response_analyses["R3"].themes, vec!["Staff"]);

    let prompts = batch_prompts(&provider);
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("RESPONSE 1: Staff ignored me"));
    assert!(!prompts[0].contains("No parking near the entrance"));

    // New response invalidates the summaries.
    assert_eq!(provider.calls_containing("Theme summaries from survey responses"), 1);
}

#[tokio::test]
async fn test_edited_response_is_rematched() {
    let provider = provider();
    let analyzer = analyzer(&provider, None);
    let config = configured(themes());

    let first = analyzer
        .analyze(&records(&["Staff were rude", "Fine"]), &config, None, "Feedback")
        .await
        .expect("first run");
    assert_eq!(first.response_analyses["R2"].themes, vec!["Staff"]);

    provider.clear_history();
    let second = analyzer
        .analyze(&records(&["The price was absurd", "Fine"]), &config, Some(&first), "Feedback")
        .await
        .expect("second run");

    assert_eq!(second.response_analyses["R2"].themes, vec!["Cost"]);
    assert_ne!(
        second.response_analyses["R2"].response.content_hash,
        first.response_analyses["R2"].response.content_hash
    );
    let prompts = batch_prompts(&provider);
    assert_eq!(prompts.len(), 1);
    assert!(!prompts[0].contains("Fine"));
    assert!(second.theme_summaries.contains_key("Cost"));
    assert!(!second.theme_summaries.contains_key("Staff"));
}

#[tokio::test]
async fn test_unchanged_rerun_reuses_summaries() {
    let provider = provider();
    let analyzer = analyzer(&provider, None);
    let responses = records(&["Parking is a nightmare", "Lovely staff"]);
    let config = themed_config();

    let first = analyzer
        .analyze(&responses, &config, None, "Feedback")
        .await
        .expect("first run");
    assert!(!first.theme_summaries.is_empty());

    provider.clear_history();
    let second = analyzer
        .analyze(&responses, &config, Some(&first), "Feedback")
        .await
        .expect("second run");

    assert_eq!(provider.call_count(), 0);
    assert_eq!(second.themes, first.themes);
    assert_eq!(second.theme_summaries, first.theme_summaries);
    assert_eq!(second.global_summary, first.global_summary);
    assert_eq!(second.summary, first.summary);
    assert_eq!(second.response_analyses, first.response_analyses);
}

#[tokio::test]
async fn test_serial_and_parallel_agree() {
    let texts: Vec<String> = (0..23)
        .map(|index| match index % 4 {
            0 => format!("Parking lot {index} was full"),
            1 => format!("Staff member {index} helped"),
            2 => format!("Price {index} and parking both bad"),
            _ => format!("Comment {index}"),
        })
        .collect();
    let borrowed: Vec<&str> = texts.iter().map(String::as_str).collect();
    let responses = records(&borrowed);

    let serial_provider = provider();
    let serial = analyzer(&serial_provider, None)
        .analyze(
            &responses,
            &AnalysisConfig {
                batch_size: Some(5),
                use_parallel: false,
                ..configured(themes())
            },
            None,
            "Feedback",
        )
        .await
        .expect("serial run");

    let parallel_provider = provider();
    let parallel = analyzer(&parallel_provider, None)
        .analyze(
            &responses,
            &AnalysisConfig {
                batch_size: Some(5),
                parallel_workers: Some(3),
                use_parallel: true,
                ..configured(themes())
            },
            None,
            "Feedback",
        )
        .await
        .expect("parallel run");

    assert_eq!(batch_prompts(&serial_provider).len(), 5);
    assert_eq!(batch_prompts(&parallel_provider).len(), 5);
    assert_eq!(assignments(&serial), assignments(&parallel));
    assert_eq!(serial.theme_analyses, parallel.theme_analyses);
    assert_eq!(serial.response_analyses["R4"].themes, vec!["Parking", "Cost"]);
    assert!(serial.response_analyses["R5"].themes.is_empty());
}

#[tokio::test]
async fn test_theme_index_matches_assignments() {
    let provider = provider();
    let responses = records(&[
        "Parking was fine",
        "Staff and parking both great",
        "Nothing else",
        "Staff were slow",
    ]);
    let result = analyzer(&provider, None)
        .analyze(&responses, &configured(themes()), None, "Feedback")
        .await
        .expect("analysis");

    assert_eq!(result.theme_analyses.len(), result.themes.len());
    for theme in &result.themes {
        let indexed: BTreeSet<&str> = result.theme_analyses[theme]
            .response_ids
            .iter()
            .map(String::as_str)
            .collect();
        let assigned: BTreeSet<&str> = result
            .response_analyses
            .iter()
            .filter(|(_, analysis)| analysis.themes.contains(theme))
            .map(|(id, _)| id.as_str())
            .collect();
        assert_eq!(indexed, assigned, "index mismatch for {theme}");
    }
    assert_eq!(result.theme_analyses["Staff"].response_ids, vec!["R3", "R5"]);

    // Themes with no responses get no summary.
    assert!(result.theme_analyses["Cost"].response_ids.is_empty());
    assert!(!result.theme_summaries.contains_key("Cost"));
    assert_eq!(
        result.theme_summaries["Parking"].unique_ideas,
        vec!["more Parking"]
    );
    assert_eq!(result.summary, result.global_summary);
    assert_eq!(result.column_title, "Feedback");
}

#[tokio::test]
async fn test_failed_batch_fails_whole_run() {
    let provider = provider();
    let mut texts: Vec<String> = (0..12).map(|index| format!("Parking note {index}")).collect();
    texts[5] = "This one should FAIL".to_owned();
    let borrowed: Vec<&str> = texts.iter().map(String::as_str).collect();

    let outcome = analyzer(&provider, None)
        .analyze(
            &records(&borrowed),
            &AnalysisConfig {
                batch_size: Some(4),
                parallel_workers: Some(2),
                ..configured(themes())
            },
            None,
            "Feedback",
        )
        .await;

    match outcome {
        Err(Error::Stage {
            stage: AnalysisStage::Matching,
            source,
        }) => match *source {
            Error::BatchProcessing(messages) => {
                assert_eq!(messages.len(), 1);
                assert!(messages[0].starts_with("failed to process batch 1:"));
                assert!(messages[0].contains("batch rejected"));
            }
            other => panic!("unexpected matching error: {other}"),
        },
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("run should fail when a batch fails"),
    }
    // Sibling batches still ran to completion.
    assert_eq!(batch_prompts(&provider).len(), 3);
    assert_eq!(provider.calls_containing("Theme summaries"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_matching_respects_worker_cap() {
    let provider = provider().with_latency(Duration::from_millis(50));
    let texts: Vec<String> = (0..12).map(|index| format!("Staff {index}")).collect();
    let borrowed: Vec<&str> = texts.iter().map(String::as_str).collect();

    let result = analyzer(&provider, None)
        .analyze(
            &records(&borrowed),
            &AnalysisConfig {
                batch_size: Some(2),
                parallel_workers: Some(2),
                summary_length: 0,
                theme_summary_prompt: None,
                ..configured(themes())
            },
            None,
            "Feedback",
        )
        .await
        .expect("analysis");

    assert_eq!(batch_prompts(&provider).len(), 6);
    assert_eq!(provider.peak_concurrency(), 2);
    assert_eq!(result.theme_analyses["Staff"].response_ids.len(), 12);
}

#[tokio::test]
async fn test_themes_come_from_previous_result() {
    let provider = provider();
    let previous = AnalysisResult::new(vec!["Parking".to_owned(), "Food".to_owned()]);

    let result = analyzer(&provider, None)
        .analyze(&records(&["parking"]), &themed_config(), Some(&previous), "Feedback")
        .await
        .expect("analysis");

    assert_eq!(result.themes, vec!["Parking", "Food"]);
    assert_eq!(provider.calls_containing("Identify main themes"), 0);
    assert_eq!(result.theme_analyses["Parking"].response_ids, vec!["R2"]);
}

#[tokio::test]
async fn test_configured_themes_win_over_previous() {
    let provider = provider();
    let previous = AnalysisResult::new(vec!["Food".to_owned()]);

    let result = analyzer(&provider, None)
        .analyze(&records(&["staff"]), &configured(themes()), Some(&previous), "Feedback")
        .await
        .expect("analysis");

    assert_eq!(result.themes, themes());
    assert_eq!(provider.calls_containing("Identify main themes"), 0);
}

#[tokio::test]
async fn test_legacy_summary_path() {
    let provider = provider();
    let config = AnalysisConfig {
        themes: themes(),
        summary_prompt: Some("Summarize the feedback.".to_owned()),
        summary_length: 200,
        ..AnalysisConfig::default()
    };

    let result = analyzer(&provider, None)
        .analyze(&records(&["parking", "staff"]), &config, None, "Feedback")
        .await
        .expect("analysis");

    assert_eq!(result.summary, "Legacy overview.");
    assert_eq!(result.global_summary, result.summary);
    assert!(result.theme_summaries.is_empty());
    assert_eq!(provider.calls_containing("Theme summaries from survey responses"), 0);

    let legacy = provider
        .call_history()
        .into_iter()
        .find(|request| request.prompt.starts_with("Here are the themes"))
        .expect("legacy summary request");
    assert_eq!(legacy.system_prompt.as_deref(), Some("Summarize the feedback."));
    assert!(legacy.prompt.contains("approximately 200 characters long."));
}

#[tokio::test]
async fn test_summaries_disabled() {
    let provider = provider();
    let config = AnalysisConfig {
        summary_length: 0,
        ..configured(themes())
    };

    let result = analyzer(&provider, None)
        .analyze(&records(&["parking"]), &config, None, "Feedback")
        .await
        .expect("analysis");

    // Per-theme summaries still run; only the global synthesis is off.
    assert_eq!(result.theme_summaries.len(), 1);
    assert!(result.global_summary.is_empty());
    assert_eq!(provider.calls_containing("Theme summaries from survey responses"), 0);
}

#[tokio::test]
async fn test_identification_failure_is_tagged() {
    let provider = provider();
    provider.push_outcome(MockOutcome::Fail {
        status: 503,
        message: "unavailable".to_owned(),
    });

    let outcome = analyzer(&provider, None)
        .analyze(&records(&["parking"]), &themed_config(), None, "Feedback")
        .await;

    match outcome {
        Err(error) => {
            assert_eq!(error.stage(), Some(AnalysisStage::ThemeIdentification));
            assert!(error.to_string().starts_with("theme identification failed:"));
        }
        Ok(_) => panic!("identification failure should abort the run"),
    }
}

#[tokio::test]
async fn test_theme_summary_failure_is_tagged() {
    let provider = MockProvider::new().with_handler(|request| {
        if request.prompt.starts_with("Theme: ") {
            Err(Error::Upstream {
                status: 500,
                message: "summary failed".to_owned(),
            })
        } else {
            common::survey_handler(request)
        }
    });

    let outcome = analyzer(&provider, None)
        .analyze(&records(&["parking"]), &configured(themes()), None, "Feedback")
        .await;

    assert!(matches!(
        outcome,
        Err(ref error) if error.stage() == Some(AnalysisStage::ThemeSummary)
    ));
}
