//! Incremental survey analysis engine.
//!
//! The three layers build on each other:
//! - [`cache`]: fingerprint-keyed completion store with TTL and file persistence
//! - [`client`]: prompts, pacing and backoff, usage accounting, answer parsing
//! - [`analyzer`]: change detection, batched matching, aggregation, summaries

/// Incremental analysis runs
pub mod analyzer;
/// Completion caching
pub mod cache;
/// Model client
pub mod client;

pub use analyzer::Analyzer;
pub use cache::{CacheStats, CompletionCache};
pub use client::{LlmClient, RetryPolicy, RetryStats, UsageTotals};
