//! Membership coordinator — single authority over the node's session.
//!
//! A process participates in at most one cluster at a time. The
//! coordinator owns that session and serializes every mutating
//! operation behind one async mutex, so a precondition check and the
//! mutation it guards always happen in the same critical section.

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{ClusterError, ClusterResult};
use crate::provider::{MembershipHandle, MembershipProvider, ProviderError};

/// The node's membership session.
///
/// Never a nullable handle: absence is a first-class state, so every
/// operation's precondition is a variant check.
enum Session<H> {
    Absent,
    Anchored { handle: H, bind_addr: String },
    Joined { handle: H, bind_addr: String },
}

impl<H> Session<H> {
    fn take(&mut self) -> Session<H> {
        std::mem::replace(self, Session::Absent)
    }
}

/// Observable session state, for logging and status replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anchored,
    Joined,
}

/// Coordinates the process's single membership session.
///
/// All four operations lock the same mutex; two mutating calls never
/// run concurrently, and their effects are ordered as if executed
/// one at a time in admission order.
pub struct MembershipCoordinator<P: MembershipProvider> {
    provider: P,
    session: Mutex<Session<P::Handle>>,
}

impl<P: MembershipProvider> MembershipCoordinator<P> {
    /// Create a coordinator with no active session.
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            session: Mutex::new(Session::Absent),
        }
    }

    /// Start a new cluster with this node as the seed.
    ///
    /// Fails with [`ClusterError::SessionExists`] if a session is
    /// already active. A provider failure leaves the coordinator
    /// unchanged; no partial session is retained.
    pub async fn anchor(&self, advertise_addr: &str) -> ClusterResult<()> {
        let mut session = self.session.lock().await;
        if !matches!(*session, Session::Absent) {
            return Err(ClusterError::SessionExists);
        }

        let handle = self.provider.create(advertise_addr).await?;
        *session = Session::Anchored {
            handle,
            bind_addr: advertise_addr.to_string(),
        };

        info!(advertise_addr, "anchored new cluster");
        Ok(())
    }

    /// Join the cluster reachable via `seed_addr`.
    ///
    /// Returns the number of peers contacted. If the local session is
    /// created but the join attempt fails, the fresh session is shut
    /// down before returning, so a failed join never leaves an
    /// orphaned transport behind.
    pub async fn join(&self, advertise_addr: &str, seed_addr: &str) -> ClusterResult<usize> {
        let mut session = self.session.lock().await;
        if !matches!(*session, Session::Absent) {
            return Err(ClusterError::SessionExists);
        }

        let mut handle = self.provider.create(advertise_addr).await?;
        match handle.join(seed_addr).await {
            Ok(contacted) => {
                *session = Session::Joined {
                    handle,
                    bind_addr: advertise_addr.to_string(),
                };
                info!(advertise_addr, seed_addr, contacted, "joined cluster");
                Ok(contacted)
            }
            Err(e) => {
                if let Err(shutdown_err) = handle.shutdown().await {
                    warn!(error = %shutdown_err, "failed to tear down session after failed join");
                }
                Err(e.into())
            }
        }
    }

    /// Leave the cluster and tear down the session.
    ///
    /// The graceful departure is bounded by `timeout`; a timed-out
    /// leave is logged and shutdown proceeds anyway. The session is
    /// cleared unconditionally; only an error from the final
    /// transport shutdown is reported as failure.
    pub async fn leave(&self, timeout: Duration) -> ClusterResult<()> {
        let mut session = self.session.lock().await;
        let (mut handle, bind_addr) = match session.take() {
            Session::Absent => return Err(ClusterError::NoSession),
            Session::Anchored { handle, bind_addr } | Session::Joined { handle, bind_addr } => {
                (handle, bind_addr)
            }
        };

        match handle.leave(timeout).await {
            Ok(()) => info!(%bind_addr, "left cluster"),
            Err(ProviderError::LeaveTimeout) => {
                warn!(%bind_addr, ?timeout, "graceful leave timed out, shutting down anyway");
            }
            Err(e) => warn!(%bind_addr, error = %e, "graceful leave failed, shutting down anyway"),
        }

        handle.shutdown().await?;
        Ok(())
    }

    /// Whether a session is currently active.
    ///
    /// Advisory only: callers must not act on this outside the
    /// coordinator, since the authoritative check happens inside each
    /// mutating operation.
    pub async fn has_session(&self) -> bool {
        !matches!(*self.session.lock().await, Session::Absent)
    }

    /// Current session state, if any.
    pub async fn session_state(&self) -> Option<SessionState> {
        match *self.session.lock().await {
            Session::Absent => None,
            Session::Anchored { .. } => Some(SessionState::Anchored),
            Session::Joined { .. } => Some(SessionState::Joined),
        }
    }
}
