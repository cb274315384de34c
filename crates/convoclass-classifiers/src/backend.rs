//! Classification service seam

use async_trait::async_trait;
use convoclass_core::Result;

/// A service that answers a rendered prompt with raw response text
///
/// Implementations report retryable failures (timeouts, rate limiting,
/// server-side errors) as [`convoclass_core::Error::Transient`] or
/// [`convoclass_core::Error::Timeout`]; everything else is final.
#[async_trait]
pub trait ClassificationBackend: Send + Sync {
    /// Send one prompt and return the raw response text
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Backend name for logs
    fn name(&self) -> &str;
}
