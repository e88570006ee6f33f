//! Theme, global and legacy summary generation.

use std::collections::BTreeMap;

use survey_core::{AnalysisConfig, AnalysisStage, Result, ThemeAnalysis, ThemeSummary};

use super::aggregate::theme_texts;
use super::matching::AnalysisMap;
use crate::client::LlmClient;
use crate::client::prompts::DEFAULT_GLOBAL_SUMMARY_PROMPT;

/// Summaries produced for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summaries {
    /// Per-theme summaries keyed by theme
    pub theme_summaries: BTreeMap<String, ThemeSummary>,
    /// Global or legacy summary; empty when disabled
    pub global_summary: String,
}

/// Which summary path a configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryMode {
    /// Single prompt over theme → responses.
    Legacy,
    /// Per-theme summaries and/or a global synthesis.
    Themed,
}

impl SummaryMode {
    /// The legacy path is taken only when `summary_prompt` is the sole
    /// summary instruction configured and summaries are enabled.
    pub fn for_config(config: &AnalysisConfig) -> Self {
        let legacy_only = config.summary_prompt.is_some()
            && config.theme_summary_prompt.is_none()
            && config.global_summary_prompt.is_none()
            && config.summary_length > 0;
        if legacy_only { Self::Legacy } else { Self::Themed }
    }
}

/// Runs whichever summary path `config` selects.
///
/// # Errors
/// Returns the first completion error, wrapped with the stage it came from.
pub async fn generate(
    client: &LlmClient,
    config: &AnalysisConfig,
    themes: &[String],
    analyses: &AnalysisMap,
    theme_analyses: &BTreeMap<String, ThemeAnalysis>,
) -> Result<Summaries> {
    if themes.is_empty() {
        return Ok(Summaries::default());
    }

    let texts_by_theme: BTreeMap<String, Vec<String>> = theme_analyses
        .iter()
        .map(|(theme, analysis)| (theme.clone(), theme_texts(analysis, analyses)))
        .collect();

    if SummaryMode::for_config(config) == SummaryMode::Legacy {
        let prompt = config.summary_prompt.as_deref().unwrap_or_default();
        let summary = client
            .generate_legacy_summary(themes, &texts_by_theme, prompt, config.summary_length)
            .await
            .map_err(|error| error.in_stage(AnalysisStage::LegacySummary))?;
        tracing::info!(length = summary.len(), "Generated summary");
        return Ok(Summaries {
            theme_summaries: BTreeMap::new(),
            global_summary: summary,
        });
    }

    let mut summaries = Summaries::default();

    if let Some(prompt) = &config.theme_summary_prompt {
        for theme in themes {
            let Some(texts) = texts_by_theme.get(theme).filter(|texts| !texts.is_empty()) else {
                continue;
            };
            tracing::debug!(theme = %theme, responses = texts.len(), "Generating theme summary");
            let summary = client
                .summarize_theme(theme, texts, prompt)
                .await
                .map_err(|error| error.in_stage(AnalysisStage::ThemeSummary))?;
            summaries.theme_summaries.insert(theme.clone(), summary);
        }
        tracing::info!(count = summaries.theme_summaries.len(), "Generated theme summaries");
    }

    if config.summary_length > 0 {
        let prompt = config
            .global_summary_prompt
            .as_deref()
            .unwrap_or(DEFAULT_GLOBAL_SUMMARY_PROMPT);
        summaries.global_summary = client
            .generate_global_summary(themes, &summaries.theme_summaries, prompt, config.summary_length)
            .await
            .map_err(|error| error.in_stage(AnalysisStage::GlobalSummary))?;
        tracing::info!(length = summaries.global_summary.len(), "Generated global summary");
    }

    Ok(summaries)
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_mode_precedence() {
        let mut config = AnalysisConfig::default();
        assert_eq!(SummaryMode::for_config(&config), SummaryMode::Themed);

        config.summary_prompt = Some("Summarize".to_owned());
        assert_eq!(SummaryMode::for_config(&config), SummaryMode::Legacy);

        config.summary_length = 0;
        assert_eq!(SummaryMode::for_config(&config), SummaryMode::Themed);

        config.summary_length = 500;
        config.theme_summary_prompt = Some("Per theme".to_owned());
        assert_eq!(SummaryMode::for_config(&config), SummaryMode::Themed);
    }
}
