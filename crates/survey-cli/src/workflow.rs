//! One invocation of the analyzer: load, analyze, persist, report.

use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use survey_analysis::{Analyzer, CompletionCache, LlmClient, RetryPolicy, UsageTotals};
use survey_core::{CompletionProvider, Config};
use survey_providers::AnthropicProvider;

use crate::artifacts::{
    self, AUDIT_FILE, REPORT_FILE, SUMMARY_FILE, THEME_STATS_FILE, THEMES_FILE, sibling,
};
use crate::ingest::read_responses;
use crate::report::render_to_file;

/// Flags that change what a run does.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop after theme identification, even when themes are configured
    pub identify_themes_only: bool,
    /// Empty the completion cache before the run
    pub clear_cache: bool,
}

/// What a run did, for the final console output.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Only themes were identified and written to `themes_file`.
    ThemesIdentified {
        /// Discovered themes
        themes: Vec<String>,
        /// Where the config snippet was written
        themes_file: PathBuf,
        /// Tokens and cost of the run
        usage: UsageTotals,
    },
    /// A full analysis was saved to `state_file`.
    Analyzed {
        /// Saved result
        state_file: PathBuf,
        /// Number of analyzed responses
        responses: usize,
        /// Number of themes
        themes: usize,
        /// Tokens and cost of the run
        usage: UsageTotals,
    },
}

impl RunOutcome {
    /// Tokens and cost of the run
    pub fn usage(&self) -> UsageTotals {
        match self {
            Self::ThemesIdentified { usage, .. } | Self::Analyzed { usage, .. } => *usage,
        }
    }
}

/// Loads and validates `config_path`, then runs against the Anthropic API.
///
/// # Errors
/// Returns an error if the configuration is invalid or the run fails.
pub async fn run(config_path: &Path, options: RunOptions) -> Result<RunOutcome> {
    let config = Config::load_from_file(config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;
    config.validate().context("invalid configuration")?;

    let api_key = config
        .api_key()
        .context("no API key configured")?;
    let provider = AnthropicProvider::new(api_key)?
        .with_timeout(Duration::from_secs(config.api.timeout_seconds));

    execute(config_path, &config, Arc::new(provider), options).await
}

fn build_client(config: &Config, provider: Arc<dyn CompletionProvider>) -> Result<LlmClient> {
    let mut client = LlmClient::new(provider, config.api.model.clone())
        .with_max_tokens(config.api.max_tokens)
        .with_language(config.analysis.language())
        .with_retry_policy(RetryPolicy::with_base_delay(Duration::from_millis(
            config.api.rate_limit_delay_ms,
        )));

    if config.cache.enabled {
        let ttl = Duration::from_secs(config.cache.ttl_hours.saturating_mul(3600));
        let cache = CompletionCache::persistent(&config.cache.dir, ttl)
            .with_context(|| format!("failed to open cache at {}", config.cache.dir.display()))?;
        client = client.with_cache(Arc::new(cache));
    }
    Ok(client)
}

/// Runs with an already validated configuration and the given provider.
///
/// # Errors
/// Returns an error if ingestion, the cache, the analysis or saving the state
/// fails. Failures writing the secondary artefacts are only logged.
pub async fn execute(
    config_path: &Path,
    config: &Config,
    provider: Arc<dyn CompletionProvider>,
    options: RunOptions,
) -> Result<RunOutcome> {
    let client = build_client(config, provider)?;

    if options.clear_cache
        && let Some(cache) = client.cache()
    {
        cache.clear().context("failed to clear cache")?;
        tracing::info!("Cleared completion cache");
    }

    let input_path = config
        .input
        .path
        .as_deref()
        .context("[input].path is required")?;
    let ingested = read_responses(input_path, &config.input.column)?;

    let state_file = config.state_file_path(config_path);
    let previous = artifacts::load_state(&state_file);
    let analyzer = Analyzer::new(Arc::new(client));

    let has_themes = !config.analysis.themes.is_empty()
        || previous.as_ref().is_some_and(|prior| !prior.themes.is_empty());

    if options.identify_themes_only || !has_themes {
        let themes = analyzer
            .identify_themes_only(&ingested.responses, &config.analysis.context_prompt)
            .await?;
        let themes_file = sibling(&state_file, THEMES_FILE);
        artifacts::save_themes(&themes_file, &themes)?;
        return Ok(RunOutcome::ThemesIdentified {
            themes,
            themes_file,
            usage: analyzer.client().usage(),
        });
    }

    let result = analyzer
        .analyze(
            &ingested.responses,
            &config.analysis,
            previous.as_ref(),
            &ingested.column_title,
        )
        .await?;

    artifacts::save_state(&state_file, &result).context("failed to save state")?;

    if let Err(error) = artifacts::save_audit(&sibling(&state_file, AUDIT_FILE), &result) {
        tracing::warn!(%error, "Failed to save audit log");
    }
    if let Err(error) = artifacts::save_theme_stats(&sibling(&state_file, THEME_STATS_FILE), &result) {
        tracing::warn!(%error, "Failed to save theme statistics");
    }
    if !result.summary.is_empty()
        && let Err(error) = artifacts::save_summary(&sibling(&state_file, SUMMARY_FILE), &result.summary)
    {
        tracing::warn!(%error, "Failed to save summary");
    }
    if let Some(template) = &config.output.report_template {
        let output = config
            .output
            .report_output
            .clone()
            .unwrap_or_else(|| sibling(&state_file, REPORT_FILE));
        if let Err(error) = render_to_file(template, &output, &result) {
            tracing::warn!(%error, "Failed to render report");
        }
    }

    Ok(RunOutcome::Analyzed {
        state_file,
        responses: result.response_analyses.len(),
        themes: result.themes.len(),
        usage: analyzer.client().usage(),
    })
}
