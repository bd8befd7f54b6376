//! Error types for cluster membership operations.

use thiserror::Error;

use crate::provider::ProviderError;

/// Result type alias for coordinator operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors that can occur while coordinating the membership session.
///
/// Every variant is an expected, recoverable condition: the control
/// plane maps them to `success = false` replies rather than transport
/// errors.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("a membership session already exists")]
    SessionExists,

    #[error("no active membership session")]
    NoSession,

    #[error("service stopping")]
    Stopping,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
