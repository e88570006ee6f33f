//! Error types shared across the workspace.

use core::result::Result as CoreResult;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Error as IoError;

use reqwest::Error as ReqwestError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use toml::de::Error as TomlError;

/// Result type for core operations.
pub type Result<T> = CoreResult<T, Error>;

/// The step of an analysis run that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisStage {
    /// Discovering the theme list from the responses.
    ThemeIdentification,
    /// Assigning themes to new or changed responses.
    Matching,
    /// Summarizing the responses of a single theme.
    ThemeSummary,
    /// Synthesizing the summary across all themes.
    GlobalSummary,
    /// Producing the single-prompt summary used by older configurations.
    LegacySummary,
}

impl Display for AnalysisStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let label = match self {
            Self::ThemeIdentification => "theme identification",
            Self::Matching => "theme matching",
            Self::ThemeSummary => "theme summary",
            Self::GlobalSummary => "global summary",
            Self::LegacySummary => "summary",
        };
        f.write_str(label)
    }
}

/// Errors that can occur anywhere in the analyzer.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// An HTTP request failed before a response was received.
    #[error("HTTP request failed: {0}")]
    Request(#[from] ReqwestError),

    /// JSON serialization or deserialization failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] SerdeJsonError),

    /// TOML deserialization failed.
    #[error("TOML deserialization error: {0}")]
    Toml(#[from] TomlError),

    /// Configuration or input is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Required API key was not found.
    #[error("API key not found: {0}")]
    MissingApiKey(String),

    /// The provider asked us to slow down (HTTP 429).
    #[error("Request throttled: {0}")]
    Throttled(String),

    /// The provider answered with a non-success status.
    #[error("API request failed with status {status}: {message}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Error message as reported by the provider.
        message: String,
    },

    /// Throttling persisted through every retry.
    #[error("API request failed after {attempts} attempts: rate limit exceeded")]
    RateLimitExhausted {
        /// Number of requests sent before giving up.
        attempts: u32,
    },

    /// One or more parallel matching batches failed.
    #[error("errors occurred during parallel processing: {}", .0.join("; "))]
    BatchProcessing(Vec<String>),

    /// Reading or writing the completion cache failed.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Provider returned a response we could not interpret.
    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),

    /// An analysis stage failed.
    #[error("{stage} failed: {source}")]
    Stage {
        /// Stage that failed.
        stage: AnalysisStage,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },

    /// A general error not covered by other variants.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Determines whether this error may succeed if the same request is sent again.
    ///
    /// Only throttling is retried; every other upstream failure is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled(_))
    }

    /// Wraps this error with the analysis stage it occurred in.
    #[must_use]
    pub fn in_stage(self, stage: AnalysisStage) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Returns the stage this error was raised in, if it was wrapped with one.
    pub fn stage(&self) -> Option<AnalysisStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;
    use serde_json::{Value as JsonValue, from_str};
    use std::io;

    #[test]
    fn test_error_display() {
        let error1 = Error::Config("input path is required".to_owned());
        assert_eq!(error1.to_string(), "Configuration error: input path is required");

        let error2 = Error::Upstream {
            status: 400,
            message: "bad request".to_owned(),
        };
        assert_eq!(
            error2.to_string(),
            "API request failed with status 400: bad request"
        );

        let error3 = Error::RateLimitExhausted { attempts: 4 };
        assert_eq!(
            error3.to_string(),
            "API request failed after 4 attempts: rate limit exceeded"
        );
    }

    #[test]
    fn test_batch_processing_joins_messages() {
        let error = Error::BatchProcessing(vec![
            "failed to process batch 0: boom".to_owned(),
            "failed to process batch 2: bang".to_owned(),
        ]);
        assert_eq!(
            error.to_string(),
            "errors occurred during parallel processing: failed to process batch 0: boom; failed to process batch 2: bang"
        );
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::Throttled("slow down".to_owned()).is_retryable());

        let upstream = Error::Upstream {
            status: 500,
            message: "overloaded".to_owned(),
        };
        assert!(!upstream.is_retryable());
        assert!(!Error::Config("bad config".to_owned()).is_retryable());
        assert!(!Error::RateLimitExhausted { attempts: 4 }.is_retryable());
    }

    #[test]
    fn test_stage_wrapping() {
        let error = Error::Throttled("x".to_owned()).in_stage(AnalysisStage::Matching);
        assert_eq!(error.stage(), Some(AnalysisStage::Matching));
        assert_eq!(error.to_string(), "theme matching failed: Request throttled: x");
        assert_eq!(Error::Other("plain".to_owned()).stage(), None);
    }

    #[test]
    fn test_error_from_io() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: Error = io_error.into();
        assert!(matches!(error, Error::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_error = from_str::<JsonValue>("invalid json").unwrap_err();
        let error: Error = json_error.into();
        assert!(matches!(error, Error::Json(_)));
    }
}
