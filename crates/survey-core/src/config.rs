//! Configuration schema for an analysis run.
//!
//! The file is TOML with one table per concern. Every table has defaults, so a
//! minimal file only names the input and the themes (or leaves them out to have
//! them discovered).

use serde::{Deserialize, Serialize};
use std::env;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use crate::language::SUPPORTED_LANGUAGE_CODES;
use crate::{Error, OutputLanguage, Result};

/// Model used when the configuration names none.
pub const DEFAULT_MODEL: &str = "claude-3-opus-20240229";
/// Completion length cap sent with every request.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
/// System prompt for theme identification and matching when none is configured.
pub const DEFAULT_CONTEXT_PROMPT: &str =
    "Analyze the following survey responses and identify the main themes or topics discussed.";
/// Environment variable consulted when `[api].api_key` is absent.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Complete analyzer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the responses come from
    pub input: InputConfig,
    /// Model provider settings
    pub api: ApiConfig,
    /// Themes, prompts and matching dispatch
    pub analysis: AnalysisConfig,
    /// Completion cache settings
    pub cache: CacheConfig,
    /// State file and report locations
    pub output: OutputConfig,
}

/// Source spreadsheet settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Path to the CSV export
    pub path: Option<PathBuf>,
    /// Column letter (`B`, `AA`) or header name holding the responses
    pub column: String,
}

/// Model provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Anthropic API key; falls back to `ANTHROPIC_API_KEY`
    pub api_key: Option<String>,
    /// Model identifier
    pub model: String,
    /// Pacing delay before every request, also the backoff base
    pub rate_limit_delay_ms: u64,
    /// Client-side timeout per request
    pub timeout_seconds: u64,
    /// Completion length cap
    pub max_tokens: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_owned(),
            rate_limit_delay_ms: 1000,
            timeout_seconds: 60,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Themes, prompts and matching dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Fixed theme list; discovered when empty
    pub themes: Vec<String>,
    /// System prompt for identification and matching
    pub context_prompt: String,
    /// Legacy single-prompt summary instruction
    pub summary_prompt: Option<String>,
    /// System prompt for per-theme summaries
    pub theme_summary_prompt: Option<String>,
    /// System prompt for the global summary
    pub global_summary_prompt: Option<String>,
    /// Approximate length in characters of the global summary; 0 disables it
    pub summary_length: u32,
    /// Output language code
    pub output_language: String,
    /// Responses per matching request; auto-sized when absent
    pub batch_size: Option<usize>,
    /// Concurrent matching requests; auto-sized when absent
    pub parallel_workers: Option<usize>,
    /// Dispatch batches across a worker pool instead of one by one
    pub use_parallel: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            themes: Vec::new(),
            context_prompt: DEFAULT_CONTEXT_PROMPT.to_owned(),
            summary_prompt: None,
            theme_summary_prompt: None,
            global_summary_prompt: None,
            summary_length: 500,
            output_language: "en".to_owned(),
            batch_size: None,
            parallel_workers: None,
            use_parallel: true,
        }
    }
}

impl AnalysisConfig {
    /// Parsed output language; unknown codes mean no directive.
    pub fn language(&self) -> OutputLanguage {
        OutputLanguage::from_code_or_default(&self.output_language)
    }
}

/// Completion cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether completions are cached
    pub enabled: bool,
    /// Directory holding one file per entry
    pub dir: PathBuf,
    /// Time-to-live for cache entries in hours
    pub ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".cache"),
            ttl_hours: 24,
        }
    }
}

/// State file and report locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Previous-run state; defaults to `<config stem>.state.json`
    pub state_file: Option<PathBuf>,
    /// Handlebars template for the report
    pub report_template: Option<PathBuf>,
    /// Rendered report destination; defaults to `report.txt` next to the state file
    pub report_output: Option<PathBuf>,
}

impl Config {
    /// Load config from a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|error| Error::Config(format!("failed to read {}: {error}", path.display())))?;
        let config: Self = toml::from_str(&contents)?;

        tracing::debug!(
            path = %path.display(),
            themes = config.analysis.themes.len(),
            api_key = if config.api.api_key.is_some() { "present" } else { "env" },
            "Loaded configuration"
        );

        Ok(config)
    }

    /// API key from the file, else from the environment.
    pub fn api_key(&self) -> Option<String> {
        self.api
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }

    /// Where the previous run's result is stored for this config file.
    pub fn state_file_path(&self, config_path: &Path) -> PathBuf {
        if let Some(path) = &self.output.state_file {
            return path.clone();
        }
        let dir = config_path.parent().unwrap_or_else(|| Path::new(""));
        let stem = config_path
            .file_stem()
            .map_or_else(|| "config".into(), OsStr::to_string_lossy);
        dir.join(format!("{stem}.state.json"))
    }

    /// Checks everything a run needs before any request is sent.
    ///
    /// # Errors
    /// Returns [`Error::Config`] or [`Error::MissingApiKey`] naming the first problem found
    pub fn validate(&self) -> Result<()> {
        self.validate_with_key(self.api_key().as_deref())
    }

    fn validate_with_key(&self, api_key: Option<&str>) -> Result<()> {
        let Some(input_path) = &self.input.path else {
            return Err(Error::Config("[input].path is required".to_owned()));
        };
        if self.input.column.trim().is_empty() {
            return Err(Error::Config("[input].column is required".to_owned()));
        }
        if api_key.is_none() {
            return Err(Error::MissingApiKey(format!(
                "set [api].api_key or the {API_KEY_ENV} environment variable"
            )));
        }
        if !input_path.is_file() {
            return Err(Error::Config(format!(
                "input file does not exist: {}",
                input_path.display()
            )));
        }
        if OutputLanguage::from_code(&self.analysis.output_language).is_none() {
            return Err(Error::Config(format!(
                "unsupported output language '{}', expected one of {}",
                self.analysis.output_language,
                SUPPORTED_LANGUAGE_CODES.join(", ")
            )));
        }
        if let Some(template) = &self.output.report_template
            && !template.is_file()
        {
            return Err(Error::Config(format!(
                "report template does not exist: {}",
                template.display()
            )));
        }
        if self.cache.ttl_hours == 0 {
            return Err(Error::Config("[cache].ttl_hours must be positive".to_owned()));
        }
        if self.analysis.batch_size == Some(0) {
            return Err(Error::Config("[analysis].batch_size must be positive".to_owned()));
        }
        if self.analysis.parallel_workers == Some(0) {
            return Err(Error::Config(
                "[analysis].parallel_workers must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid_config(dir: &TempDir) -> Config {
        let input = dir.path().join("responses.csv");
        if let Err(error) = fs::write(&input, "Answer\nyes\n") {
            panic!("write failed: {error}");
        }
        let mut config = Config::default();
        config.input.path = Some(input);
        config.input.column = "A".to_owned();
        config
    }

    fn temp_dir() -> TempDir {
        match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("tempdir failed: {error}"),
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.model, DEFAULT_MODEL);
        assert_eq!(config.api.rate_limit_delay_ms, 1000);
        assert_eq!(config.analysis.summary_length, 500);
        assert!(config.analysis.use_parallel);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl_hours, 24);
        assert_eq!(config.analysis.context_prompt, DEFAULT_CONTEXT_PROMPT);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_text = r#"
            [input]
            path = "survey.csv"
            column = "Feedback"

            [analysis]
            themes = ["Parking", "Staff"]
            output_language = "de-ch"
            batch_size = 5
        "#;
        let config: Config = match toml::from_str(toml_text) {
            Ok(config) => config,
            Err(error) => panic!("parse failed: {error}"),
        };
        assert_eq!(config.analysis.themes, vec!["Parking", "Staff"]);
        assert_eq!(config.analysis.batch_size, Some(5));
        assert_eq!(config.analysis.parallel_workers, None);
        assert_eq!(config.analysis.language(), OutputLanguage::SwissGerman);
        assert_eq!(config.api.max_tokens, DEFAULT_MAX_TOKENS);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_load_from_file() {
        let dir = temp_dir();
        let path = dir.path().join("survey.toml");
        if let Err(error) = fs::write(&path, "[api]\nmodel = \"claude-3-haiku-20240307\"\n") {
            panic!("write failed: {error}");
        }
        let config = match Config::load_from_file(&path) {
            Ok(config) => config,
            Err(error) => panic!("load failed: {error}"),
        };
        assert_eq!(config.api.model, "claude-3-haiku-20240307");

        let missing = Config::load_from_file(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(Error::Config(_))));
    }

    #[test]
    fn test_state_file_path_defaults_next_to_config() {
        let config = Config::default();
        let path = config.state_file_path(Path::new("/surveys/q3.toml"));
        assert_eq!(path, PathBuf::from("/surveys/q3.state.json"));

        let mut explicit = Config::default();
        explicit.output.state_file = Some(PathBuf::from("/tmp/state.json"));
        assert_eq!(
            explicit.state_file_path(Path::new("/surveys/q3.toml")),
            PathBuf::from("/tmp/state.json")
        );
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        let dir = temp_dir();
        let config = valid_config(&dir);
        assert!(config.validate_with_key(Some("key")).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_key() {
        let dir = temp_dir();
        let config = valid_config(&dir);
        assert!(matches!(
            config.validate_with_key(None),
            Err(Error::MissingApiKey(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let dir = temp_dir();

        let mut no_column = valid_config(&dir);
        no_column.input.column = " ".to_owned();
        assert!(no_column.validate_with_key(Some("key")).is_err());

        let mut missing_input = valid_config(&dir);
        missing_input.input.path = Some(dir.path().join("nope.csv"));
        assert!(missing_input.validate_with_key(Some("key")).is_err());

        let mut language = valid_config(&dir);
        language.analysis.output_language = "es".to_owned();
        let error = language.validate_with_key(Some("key"));
        assert!(matches!(error, Err(Error::Config(message)) if message.contains("'es'")));

        let mut template = valid_config(&dir);
        template.output.report_template = Some(dir.path().join("missing.hbs"));
        assert!(template.validate_with_key(Some("key")).is_err());

        let mut ttl = valid_config(&dir);
        ttl.cache.ttl_hours = 0;
        assert!(ttl.validate_with_key(Some("key")).is_err());

        let mut batch = valid_config(&dir);
        batch.analysis.batch_size = Some(0);
        assert!(batch.validate_with_key(Some("key")).is_err());

        let mut workers = valid_config(&dir);
        workers.analysis.parallel_workers = Some(0);
        assert!(workers.validate_with_key(Some("key")).is_err());
    }
}
