//! Completion caching.
//!
//! Completions are keyed by the request fingerprint so that repeated runs over
//! unchanged responses reuse earlier answers instead of calling the model.

/// Cache storage implementation
pub mod storage;

pub use storage::{CacheEntry, CacheStats, CompletionCache};
