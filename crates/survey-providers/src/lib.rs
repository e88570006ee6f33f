//! Completion provider adapters.

/// Anthropic Messages API provider.
pub mod anthropic;
/// Scripted provider for tests.
pub mod mock;

pub use anthropic::AnthropicProvider;
pub use mock::{MockOutcome, MockProvider};
