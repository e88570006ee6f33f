//! Incremental analysis runs.
//!
//! A run decides the theme list, carries over every analysis whose response is
//! unchanged since the previous result, matches the rest, rebuilds the theme
//! index and then either reuses or regenerates the summaries. Any failure
//! aborts the run; nothing partial is returned.

/// Theme index construction and change detection
pub mod aggregate;
/// Partitioning and serial/parallel matching
pub mod matching;
/// Summary generation
pub mod summary;

use std::sync::Arc;

use chrono::Utc;
use survey_core::{AnalysisConfig, AnalysisResult, AnalysisStage, ResponseRecord, Result};

use crate::client::LlmClient;
use aggregate::{build_theme_analyses, responses_changed};
use matching::{auto_batch_size, auto_workers, match_parallel, match_serial, partition};

/// Orchestrates analysis runs over one client.
pub struct Analyzer {
    client: Arc<LlmClient>,
}

impl Analyzer {
    /// Creates an analyzer that sends every request through `client`.
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }

    /// The client shared with matching workers
    pub fn client(&self) -> &Arc<LlmClient> {
        &self.client
    }

    /// Discovers themes without matching or summarizing anything.
    ///
    /// # Errors
    /// Returns the completion error wrapped as a theme identification failure.
    pub async fn identify_themes_only(
        &self,
        responses: &[ResponseRecord],
        context_prompt: &str,
    ) -> Result<Vec<String>> {
        tracing::info!(count = responses.len(), "Identifying themes in responses");
        let texts: Vec<String> = responses.iter().map(|response| response.text.clone()).collect();
        self.client
            .identify_themes(&texts, context_prompt)
            .await
            .map_err(|error| error.in_stage(AnalysisStage::ThemeIdentification))
    }

    /// Runs one analysis over `responses`, reusing what it can from `previous`.
    ///
    /// Themes come from `config` first, then from `previous`, and are
    /// discovered only when neither has any.
    ///
    /// # Errors
    /// Returns the first failure of any stage, wrapped with that stage.
    pub async fn analyze(
        &self,
        responses: &[ResponseRecord],
        config: &AnalysisConfig,
        previous: Option<&AnalysisResult>,
        column_title: &str,
    ) -> Result<AnalysisResult> {
        tracing::info!(count = responses.len(), "Analyzing responses");

        let themes = if !config.themes.is_empty() {
            tracing::info!(count = config.themes.len(), "Using themes from configuration");
            config.themes.clone()
        } else if let Some(prior) = previous.filter(|prior| !prior.themes.is_empty()) {
            tracing::info!(count = prior.themes.len(), "Using themes from previous result");
            prior.themes.clone()
        } else {
            self.identify_themes_only(responses, &config.context_prompt)
                .await?
        };

        let (mut analyses, dirty) = partition(responses, previous);
        tracing::info!(
            unchanged = analyses.len(),
            dirty = dirty.len(),
            "New or changed responses"
        );

        if !dirty.is_empty() {
            let batch_size = config
                .batch_size
                .unwrap_or_else(|| auto_batch_size(dirty.len()));
            let outcome = if config.use_parallel {
                let workers = config
                    .parallel_workers
                    .unwrap_or_else(|| auto_workers(dirty.len(), batch_size));
                match_parallel(
                    &self.client,
                    &dirty,
                    &themes,
                    &config.context_prompt,
                    batch_size,
                    workers,
                )
                .await
            } else {
                match_serial(
                    &self.client,
                    &dirty,
                    &themes,
                    &config.context_prompt,
                    batch_size,
                )
                .await
            };
            let matched = outcome.map_err(|error| error.in_stage(AnalysisStage::Matching))?;
            analyses.extend(matched);
        }

        let theme_analyses = build_theme_analyses(&analyses, &themes);
        let mut result = AnalysisResult::new(themes);

        let reusable = previous.filter(|prior| {
            !prior.theme_summaries.is_empty() && !responses_changed(&analyses, Some(prior))
        });
        if let Some(prior) = reusable {
            tracing::info!(
                count = prior.theme_summaries.len(),
                "Reusing summaries from previous result"
            );
            result.theme_summaries = prior.theme_summaries.clone();
            result.global_summary = prior.global_summary.clone();
            result.summary = prior.summary.clone();
        } else {
            let generated = summary::generate(
                &self.client,
                config,
                &result.themes,
                &analyses,
                &theme_analyses,
            )
            .await?;
            result.theme_summaries = generated.theme_summaries;
            result.summary = generated.global_summary.clone();
            result.global_summary = generated.global_summary;
        }

        result.response_analyses = analyses;
        result.theme_analyses = theme_analyses;
        result.column_title = column_title.to_owned();
        result.timestamp = Utc::now();

        tracing::info!(
            themes = result.themes.len(),
            responses = result.response_analyses.len(),
            global_summary_length = result.global_summary.len(),
            "Analysis completed"
        );
        Ok(result)
    }
}
