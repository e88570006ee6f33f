//! Files written next to the state file.

use anyhow::{Context as _, Result};
use serde::Serialize;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use survey_core::AnalysisResult;

/// Theme snippet written by identification-only runs
pub const THEMES_FILE: &str = "themes.toml";
/// Per-response audit trail
pub const AUDIT_FILE: &str = "audit.json";
/// Per-theme counts and shares
pub const THEME_STATS_FILE: &str = "theme_stats.json";
/// Global summary text
pub const SUMMARY_FILE: &str = "summary.txt";
/// Rendered report when no output path is configured
pub const REPORT_FILE: &str = "report.txt";

/// Path of an artefact that lives next to `state_file`.
pub fn sibling(state_file: &Path, name: &str) -> PathBuf {
    state_file
        .parent()
        .map_or_else(|| PathBuf::from(name), |dir| dir.join(name))
}

/// Replaces `path` with `contents` in one rename.
///
/// # Errors
/// Returns an error if the directory cannot be created or the file written.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    file.write_all(contents)?;
    file.persist(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Previous run's result, if one can be read.
///
/// A missing file means a first run. An unreadable or corrupt file is logged
/// and treated the same way.
pub fn load_state(path: &Path) -> Option<AnalysisResult> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No previous state");
        return None;
    }
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "Failed to read state file, starting fresh");
            return None;
        }
    };
    match serde_json::from_str::<AnalysisResult>(&contents) {
        Ok(result) => {
            tracing::info!(
                path = %path.display(),
                responses = result.response_analyses.len(),
                themes = result.themes.len(),
                "Loaded previous state"
            );
            Some(result)
        }
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "Failed to parse state file, starting fresh");
            None
        }
    }
}

/// Writes the result as pretty JSON for the next run.
///
/// # Errors
/// Returns an error if the result cannot be serialized or written.
pub fn save_state(path: &Path, result: &AnalysisResult) -> Result<()> {
    let json = serde_json::to_vec_pretty(result)?;
    write_atomic(path, &json)?;
    tracing::info!(path = %path.display(), "Saved state");
    Ok(())
}

#[derive(Serialize)]
struct ThemesSnippet<'list> {
    themes: &'list [String],
}

/// Writes a `themes = [...]` snippet that can be pasted into the config.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn save_themes(path: &Path, themes: &[String]) -> Result<()> {
    let snippet = toml::to_string(&ThemesSnippet { themes })
        .context("failed to serialize themes")?;
    write_atomic(path, snippet.as_bytes())?;
    tracing::info!(path = %path.display(), count = themes.len(), "Saved themes");
    Ok(())
}

#[derive(Debug, Serialize)]
struct AuditEntry<'result> {
    id: &'result str,
    text: &'result str,
    themes: &'result [String],
    row: usize,
}

/// Per-response audit trail ordered by source row.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn save_audit(path: &Path, result: &AnalysisResult) -> Result<()> {
    let mut entries: Vec<AuditEntry<'_>> = result
        .response_analyses
        .values()
        .map(|analysis| AuditEntry {
            id: &analysis.response.id,
            text: &analysis.response.text,
            themes: &analysis.themes,
            row: analysis.response.row_position,
        })
        .collect();
    entries.sort_by_key(|entry| entry.row);

    write_atomic(path, &serde_json::to_vec_pretty(&entries)?)?;
    tracing::info!(path = %path.display(), entries = entries.len(), "Saved audit log");
    Ok(())
}

/// Writes per-theme counts, most frequent first.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn save_theme_stats(path: &Path, result: &AnalysisResult) -> Result<()> {
    let stats = result.theme_stats();
    write_atomic(path, &serde_json::to_vec_pretty(&stats)?)?;
    tracing::info!(path = %path.display(), "Saved theme statistics");
    Ok(())
}

/// Writes the global summary text.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn save_summary(path: &Path, summary: &str) -> Result<()> {
    write_atomic(path, summary.as_bytes())?;
    tracing::info!(path = %path.display(), "Saved summary");
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;
    use survey_core::{AnalysisConfig, ResponseAnalysis, ResponseRecord};
    use tempfile::TempDir;

    fn sample() -> AnalysisResult {
        let mut result = AnalysisResult::new(vec!["Parking".to_owned(), "Staff".to_owned()]);
        for (row, text, themes) in [(3, "rude", vec!["Staff"]), (2, "full", vec!["Parking"])] {
            let record = ResponseRecord::new(row, text);
            let themes = themes.into_iter().map(str::to_owned).collect();
            result
                .response_analyses
                .insert(record.id.clone(), ResponseAnalysis::new(record, themes));
        }
        result
    }

    #[test]
    fn test_state_round_trip_and_corruption() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let path = dir.path().join("nested").join("survey.state.json");
        assert!(load_state(&path).is_none());

        let result = sample();
        if let Err(error) = save_state(&path, &result) {
            panic!("save failed: {error}");
        }
        assert_eq!(load_state(&path), Some(result));

        if let Err(error) = fs::write(&path, "{ not json") {
            panic!("failed to corrupt state: {error}");
        }
        assert!(load_state(&path).is_none());
    }

    #[test]
    fn test_audit_is_ordered_by_row() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let path = dir.path().join(AUDIT_FILE);
        if let Err(error) = save_audit(&path, &sample()) {
            panic!("audit failed: {error}");
        }

        let written = fs::read_to_string(&path).unwrap_or_default();
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap_or_default();
        assert_eq!(parsed[0]["id"], "R2");
        assert_eq!(parsed[1]["id"], "R3");
        assert_eq!(parsed[1]["themes"][0], "Staff");
        assert_eq!(parsed[1]["row"], 3);
    }

    #[test]
    fn test_themes_snippet_parses_as_config() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let path = sibling(&dir.path().join("survey.state.json"), THEMES_FILE);
        let themes = vec!["Parking".to_owned(), "Staff \"team\"".to_owned()];
        if let Err(error) = save_themes(&path, &themes) {
            panic!("themes failed: {error}");
        }

        let written = fs::read_to_string(&path).unwrap_or_default();
        let config: AnalysisConfig = match toml::from_str(&written) {
            Ok(config) => config,
            Err(error) => panic!("snippet is not valid config: {error}"),
        };
        assert_eq!(config.themes, themes);
    }
}
