use async_trait::async_trait;

use crate::{Completion, CompletionRequest, Result};

/// A backend that turns a prompt into text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Returns the unique identifier for this provider.
    fn name(&self) -> &'static str;

    /// Sends one request and returns the completion text with its token usage.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Throttled`] when the backend asks the caller to
    /// slow down, [`crate::Error::Upstream`] for any other rejected request,
    /// and transport errors when the backend cannot be reached.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}
