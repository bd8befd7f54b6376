//! Membership provider seam.
//!
//! The coordinator consumes the underlying gossip/failure-detection
//! transport only through these two traits: a provider that creates a
//! bound session, and the handle it returns. The daemon wires in the
//! TCP peer-exchange transport from [`crate::tcp`]; tests substitute
//! a scripted double.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a membership provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to create membership transport: {0}")]
    Create(String),

    #[error("failed to join cluster: {0}")]
    Join(String),

    #[error("graceful leave timed out")]
    LeaveTimeout,

    #[error("failed to shut down membership transport: {0}")]
    Shutdown(String),
}

/// Factory for membership sessions.
#[async_trait]
pub trait MembershipProvider: Send + Sync + 'static {
    type Handle: MembershipHandle;

    /// Create a new session bound to `bind_addr`.
    ///
    /// The returned handle is not yet part of any cluster; it either
    /// becomes a seed other nodes join, or joins a cluster itself via
    /// [`MembershipHandle::join`].
    async fn create(&self, bind_addr: &str) -> Result<Self::Handle, ProviderError>;
}

/// A live membership session.
#[async_trait]
pub trait MembershipHandle: Send + Sync + 'static {
    /// Join the cluster reachable via `seed_addr`.
    ///
    /// Returns the number of peers contacted.
    async fn join(&mut self, seed_addr: &str) -> Result<usize, ProviderError>;

    /// Announce departure to the cluster, bounded by `timeout`.
    ///
    /// Returns [`ProviderError::LeaveTimeout`] if the announcement did
    /// not complete in time. The transport stays up either way; callers
    /// follow with [`MembershipHandle::shutdown`].
    async fn leave(&mut self, timeout: Duration) -> Result<(), ProviderError>;

    /// Tear down the local transport.
    async fn shutdown(&mut self) -> Result<(), ProviderError>;
}
