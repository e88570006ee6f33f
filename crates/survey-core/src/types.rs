//! Response records, analysis results and completion request types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;

/// Lowercase hex SHA-256 digest of `text`.
pub fn hash_text(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// A single survey answer as produced by ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// Stable identifier derived from the source row, e.g. `R2`.
    pub id: String,
    /// Raw answer text, never truncated.
    pub text: String,
    /// 1-based row in the source sheet.
    pub row_position: usize,
    /// Digest of `text` used for change detection.
    pub content_hash: String,
}

impl ResponseRecord {
    /// Builds a record for `row_position`, deriving its id and hash.
    pub fn new<T: Into<String>>(row_position: usize, text: T) -> Self {
        let text = text.into();
        Self {
            id: format!("R{row_position}"),
            content_hash: hash_text(&text),
            text,
            row_position,
        }
    }
}

/// Themes assigned to one response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseAnalysis {
    /// The response as it was when matched
    pub response: ResponseRecord,
    /// Assigned themes, a subset of the canonical list
    pub themes: Vec<String>,
    /// When the themes were assigned
    pub analyzed_at: DateTime<Utc>,
}

impl ResponseAnalysis {
    /// Creates an analysis stamped with the current time.
    pub fn new(response: ResponseRecord, themes: Vec<String>) -> Self {
        Self {
            response,
            themes,
            analyzed_at: Utc::now(),
        }
    }
}

/// Responses assigned to one theme.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeAnalysis {
    /// Theme name
    pub theme: String,
    /// Ids of the assigned responses, in source row order
    pub response_ids: Vec<String>,
}

/// Summary text and distinctive ideas for one theme.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeSummary {
    /// Prose summary
    pub summary: String,
    /// Ideas mentioned by few respondents
    pub unique_ideas: Vec<String>,
}

/// Count and share of responses assigned to one theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeStat {
    /// Theme name
    pub theme: String,
    /// Number of assigned responses
    pub count: usize,
    /// Share of all analyzed responses, 0 to 100
    pub percentage: f64,
}

/// Everything one analysis run produces.
///
/// `theme_analyses` is rebuilt from `response_analyses` on every run, while
/// the analyses themselves and the summaries may be inherited from a
/// previous result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Canonical theme order used for every prompt and report.
    pub themes: Vec<String>,
    /// Per-response results keyed by response id
    pub response_analyses: BTreeMap<String, ResponseAnalysis>,
    /// Per-theme response lists keyed by theme
    pub theme_analyses: BTreeMap<String, ThemeAnalysis>,
    /// Per-theme summaries keyed by theme
    #[serde(default)]
    pub theme_summaries: BTreeMap<String, ThemeSummary>,
    /// Mirror of `global_summary` kept for consumers of the older field.
    #[serde(default)]
    pub summary: String,
    /// Summary across every theme
    #[serde(default)]
    pub global_summary: String,
    /// When this result was produced
    pub timestamp: DateTime<Utc>,
    /// Header of the analyzed column
    #[serde(default)]
    pub column_title: String,
}

impl AnalysisResult {
    /// Creates an empty result over `themes`.
    pub fn new(themes: Vec<String>) -> Self {
        Self {
            themes,
            response_analyses: BTreeMap::new(),
            theme_analyses: BTreeMap::new(),
            theme_summaries: BTreeMap::new(),
            summary: String::new(),
            global_summary: String::new(),
            timestamp: Utc::now(),
            column_title: String::new(),
        }
    }

    /// Per-theme counts, most frequent first; ties keep canonical theme order.
    pub fn theme_stats(&self) -> Vec<ThemeStat> {
        let total = self.response_analyses.len();
        let mut stats: Vec<ThemeStat> = self
            .themes
            .iter()
            .map(|theme| {
                let count = self
                    .theme_analyses
                    .get(theme)
                    .map_or(0, |analysis| analysis.response_ids.len());
                let percentage = if total == 0 {
                    0.0
                } else {
                    count as f64 / total as f64 * 100.0
                };
                ThemeStat {
                    theme: theme.clone(),
                    count,
                    percentage,
                }
            })
            .collect();
        stats.sort_by(|left, right| right.count.cmp(&left.count));
        stats
    }
}

/// Token counts reported for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub input: u64,
    /// Completion tokens
    pub output: u64,
}

impl TokenUsage {
    /// Input plus output tokens.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

/// Text returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Concatenated text blocks
    pub text: String,
    /// Reported token counts
    pub usage: TokenUsage,
}

impl Completion {
    /// Creates a new completion.
    pub fn new<T: Into<String>>(text: T, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            usage,
        }
    }
}

/// One request to a completion provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier
    pub model: String,
    /// Optional system prompt
    pub system_prompt: Option<String>,
    /// Upper bound on completion tokens
    pub max_tokens: u32,
    /// User prompt
    pub prompt: String,
}

impl CompletionRequest {
    /// Creates a request without a system prompt.
    pub fn new<M: Into<String>, P: Into<String>>(model: M, max_tokens: u32, prompt: P) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            max_tokens,
            prompt: prompt.into(),
        }
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn with_system_prompt<T: Into<String>>(mut self, system_prompt: T) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Cache key for this request.
    ///
    /// Each field is length-prefixed before hashing, so no two distinct
    /// requests can collide by shifting text between fields.
    pub fn fingerprint(&self) -> String {
        let max_tokens = self.max_tokens.to_string();
        let system_prompt = self.system_prompt.as_deref().unwrap_or("");
        let mut hasher = Sha256::new();
        for field in [
            self.model.as_str(),
            system_prompt,
            max_tokens.as_str(),
            self.prompt.as_str(),
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;

    #[test]
    fn test_response_record_new() {
        let record = ResponseRecord::new(2, "More parking please");
        assert_eq!(record.id, "R2");
        assert_eq!(record.row_position, 2);
        assert_eq!(record.content_hash, hash_text("More parking please"));
        assert_eq!(record.content_hash.len(), 64);
    }

    #[test]
    fn test_hash_text_known_value() {
        assert_eq!(
            hash_text(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let first = CompletionRequest::new("claude-3-haiku-20240307", 4096, "prompt");
        let second = CompletionRequest::new("claude-3-haiku-20240307", 4096, "prompt");
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn test_fingerprint_covers_every_field() {
        let base = CompletionRequest::new("model", 4096, "prompt");
        let variants = [
            CompletionRequest::new("other", 4096, "prompt"),
            CompletionRequest::new("model", 1024, "prompt"),
            CompletionRequest::new("model", 4096, "other prompt"),
            base.clone().with_system_prompt("be terse"),
        ];
        for variant in &variants {
            assert_ne!(base.fingerprint(), variant.fingerprint());
        }
    }

    #[test]
    fn test_fingerprint_field_boundaries() {
        let left = CompletionRequest::new("ab", 1, "c");
        let right = CompletionRequest::new("a", 1, "bc");
        assert_ne!(left.fingerprint(), right.fingerprint());
    }

    #[test]
    fn test_theme_stats_order_and_percentage() {
        let mut result = AnalysisResult::new(vec![
            "Cost".to_owned(),
            "Parking".to_owned(),
            "Staff".to_owned(),
        ]);
        for (row, themes) in [(2, vec!["Parking"]), (3, vec!["Parking", "Staff"]), (4, vec![])] {
            let record = ResponseRecord::new(row, format!("answer {row}"));
            let themes = themes.into_iter().map(str::to_owned).collect();
            result
                .response_analyses
                .insert(record.id.clone(), ResponseAnalysis::new(record, themes));
        }
        result.theme_analyses.insert(
            "Parking".to_owned(),
            ThemeAnalysis {
                theme: "Parking".to_owned(),
                response_ids: vec!["R2".to_owned(), "R3".to_owned()],
            },
        );
        result.theme_analyses.insert(
            "Staff".to_owned(),
            ThemeAnalysis {
                theme: "Staff".to_owned(),
                response_ids: vec!["R3".to_owned()],
            },
        );

        let stats = result.theme_stats();
        let names: Vec<&str> = stats.iter().map(|stat| stat.theme.as_str()).collect();
        assert_eq!(names, vec!["Parking", "Staff", "Cost"]);
        assert_eq!(stats[0].count, 2);
        assert!((stats[1].percentage - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats[2].count, 0);
    }

    #[test]
    fn test_analysis_result_json_tolerates_missing_summaries() {
        let json = r#"{
            "themes": ["Parking"],
            "response_analyses": {},
            "theme_analyses": {},
            "timestamp": "2024-05-01T12:00:00Z"
        }"#;
        let result: AnalysisResult = match serde_json::from_str(json) {
            Ok(result) => result,
            Err(error) => panic!("failed to parse: {error}"),
        };
        assert!(result.theme_summaries.is_empty());
        assert!(result.global_summary.is_empty());
    }
}
