//! Core types and traits for the survey response analyzer.
//!
//! This crate provides the data model shared by every other crate in the
//! workspace: response records and analysis results, the error type, the
//! configuration schema, and the provider trait used to obtain completions.

/// Configuration schema and validation.
pub mod config;
/// Error types and result definitions.
pub mod error;
/// Output language table.
pub mod language;
/// Synchronization helpers.
pub mod sync;
/// Trait definitions for completion providers.
pub mod traits;
/// Core data types for responses, analyses and completions.
pub mod types;

pub use config::{
    AnalysisConfig, ApiConfig, CacheConfig, Config, InputConfig, OutputConfig,
    DEFAULT_CONTEXT_PROMPT, DEFAULT_MAX_TOKENS, DEFAULT_MODEL,
};
pub use error::{AnalysisStage, Error, Result};
pub use language::OutputLanguage;
pub use sync::IgnoreLock;
pub use traits::CompletionProvider;
pub use types::{
    AnalysisResult, Completion, CompletionRequest, ResponseAnalysis, ResponseRecord,
    ThemeAnalysis, ThemeStat, ThemeSummary, TokenUsage, hash_text,
};
