//! Lock store trait definitions

use async_trait::async_trait;
use gpulock_core::GpulockResult;
use std::time::Duration;

/// A single key-value store holding lock bindings
///
/// Stores never coordinate with each other; agreement comes from the quorum
/// client counting their answers.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Establish the connection ahead of the first round
    ///
    /// Idempotent. Stores without a connection keep the default.
    async fn connect(&self) -> GpulockResult<()> {
        Ok(())
    }

    /// Bind `key` to `value` for `ttl` unless a live binding exists
    ///
    /// Returns whether the binding was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> GpulockResult<bool>;

    /// Remove the binding for `key` only if it still holds `value`
    ///
    /// Returns whether a binding was removed.
    async fn delete_if_equals(&self, key: &str, value: &str) -> GpulockResult<bool>;

    /// Store name for logs
    fn name(&self) -> &str;
}
