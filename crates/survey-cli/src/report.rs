//! Report rendering with Handlebars templates.

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use handlebars::{Handlebars, no_escape};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use survey_core::{AnalysisResult, ThemeStat, ThemeSummary};

use crate::artifacts::write_atomic;

/// Shown when the ingested column had no header.
pub const DEFAULT_COLUMN_TITLE: &str = "Survey Responses";

/// One response as seen by templates.
#[derive(Debug, Serialize)]
pub struct ReportResponse<'result> {
    /// Response id such as `R2`
    pub id: &'result str,
    /// Response text
    pub text: &'result str,
    /// Assigned themes
    pub themes: &'result [String],
    /// Source row
    pub row: usize,
}

/// Everything a report template can reference.
#[derive(Debug, Serialize)]
pub struct ReportContext<'result> {
    /// Canonical theme order
    pub themes: &'result [String],
    /// Counts and shares, most frequent first
    pub theme_stats: Vec<ThemeStat>,
    /// Per-theme summaries keyed by theme
    pub theme_summaries: &'result BTreeMap<String, ThemeSummary>,
    /// Same text as `global_summary`
    pub summary: &'result str,
    /// Summary across every theme
    pub global_summary: &'result str,
    /// Responses in row order
    pub responses: Vec<ReportResponse<'result>>,
    /// Number of analyzed responses
    pub response_count: usize,
    /// When the analysis ran
    pub analysis_date: DateTime<Utc>,
    /// Header of the analyzed column, or a fallback
    pub column_title: &'result str,
}

impl<'result> ReportContext<'result> {
    /// Builds the template context for `result`.
    pub fn new(result: &'result AnalysisResult) -> Self {
        let mut responses: Vec<ReportResponse<'result>> = result
            .response_analyses
            .values()
            .map(|analysis| ReportResponse {
                id: &analysis.response.id,
                text: &analysis.response.text,
                themes: &analysis.themes,
                row: analysis.response.row_position,
            })
            .collect();
        responses.sort_by_key(|response| response.row);

        let column_title = if result.column_title.trim().is_empty() {
            DEFAULT_COLUMN_TITLE
        } else {
            &result.column_title
        };

        Self {
            themes: &result.themes,
            theme_stats: result.theme_stats(),
            theme_summaries: &result.theme_summaries,
            summary: &result.summary,
            global_summary: &result.global_summary,
            response_count: responses.len(),
            responses,
            analysis_date: result.timestamp,
            column_title,
        }
    }
}

/// Renders `template` over `result`. Output is plain text, so nothing is escaped.
///
/// # Errors
/// Returns an error if the template does not parse or fails to render.
pub fn render(template: &str, result: &AnalysisResult) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(no_escape);
    handlebars
        .render_template(template, &ReportContext::new(result))
        .context("failed to render report template")
}

/// Renders the template file at `template_path` into `output_path`.
///
/// # Errors
/// Returns an error if the template cannot be read or rendered, or the report
/// cannot be written.
pub fn render_to_file(template_path: &Path, output_path: &Path, result: &AnalysisResult) -> Result<()> {
    tracing::info!(
        template = %template_path.display(),
        output = %output_path.display(),
        "Rendering report"
    );
    let template = fs::read_to_string(template_path)
        .with_context(|| format!("failed to read template {}", template_path.display()))?;
    let rendered = render(&template, result)?;
    write_atomic(output_path, rendered.as_bytes())?;
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;
    use survey_core::{ResponseAnalysis, ResponseRecord, ThemeAnalysis};

    fn result() -> AnalysisResult {
        let mut result = AnalysisResult::new(vec!["Parking".to_owned(), "Staff".to_owned()]);
        let record = ResponseRecord::new(2, "No spaces & long queues");
        result.response_analyses.insert(
            record.id.clone(),
            ResponseAnalysis::new(record, vec!["Parking".to_owned()]),
        );
        result.theme_analyses.insert(
            "Parking".to_owned(),
            ThemeAnalysis {
                theme: "Parking".to_owned(),
                response_ids: vec!["R2".to_owned()],
            },
        );
        result.theme_summaries.insert(
            "Parking".to_owned(),
            ThemeSummary {
                summary: "Too few spaces.".to_owned(),
                unique_ideas: vec!["Shuttle bus".to_owned()],
            },
        );
        result.global_summary = "Parking dominates.".to_owned();
        result.summary = result.global_summary.clone();
        result
    }

    #[test]
    fn test_render_report() {
        let template = "# {{column_title}} ({{response_count}})\n\
            {{#each theme_stats}}{{theme}}: {{count}}\n{{/each}}\
            {{#each theme_summaries}}{{@key}} -> {{summary}} [{{#each unique_ideas}}{{this}}{{/each}}]\n{{/each}}\
            {{#each responses}}{{id}} {{text}}\n{{/each}}\
            {{global_summary}}";

        match render(template, &result()) {
            Ok(rendered) => {
                assert!(rendered.starts_with("# Survey Responses (1)\n"));
                assert!(rendered.contains("Parking: 1\nStaff: 0\n"));
                assert!(rendered.contains("Parking -> Too few spaces. [Shuttle bus]"));
                assert!(rendered.contains("R2 No spaces & long queues\n"));
                assert!(rendered.ends_with("Parking dominates."));
            }
            Err(error) => panic!("render failed: {error}"),
        }
    }

    #[test]
    fn test_column_title_kept_when_present() {
        let mut result = result();
        result.column_title = "Visitor feedback".to_owned();
        let context = ReportContext::new(&result);
        assert_eq!(context.column_title, "Visitor feedback");
    }

    #[test]
    fn test_invalid_template_fails() {
        assert!(render("{{#each themes}}", &result()).is_err());
    }
}
