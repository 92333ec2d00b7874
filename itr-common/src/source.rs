//! Source checkout and test discovery interface used by the webhook pipeline.

use async_trait::async_trait;

use crate::errors::CheckoutError;

#[async_trait]
pub trait SourceRepo: Send + Sync {
    /// Bring the working tree to the tip of `branch` and return the short
    /// commit id that is now checked out.
    async fn checkout(&self, branch: &str) -> Result<String, CheckoutError>;

    /// Enumerate the test identifiers of the checked-out tree, in run order.
    async fn discover_tests(&self) -> Result<Vec<String>, CheckoutError>;
}
