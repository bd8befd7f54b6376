//! anchorage-cluster — cluster membership for a single anchorage node.
//!
//! Provides the membership coordinator that owns a node's one membership
//! session, the gRPC control plane that drives it, and the lifecycle
//! manager that sequences shutdown between the two.
//!
//! # Architecture
//!
//! ```text
//! anchoraged process
//!   ├── LifecycleManager (Running → Draining → Stopped)
//!   │   ├── serves the control plane, owns the drain flag
//!   │   └── final best-effort leave on teardown
//!   ├── ControlPlane (gRPC)
//!   │   ├── PingNode() → stateless echo
//!   │   ├── DropAnchor() → coordinator.anchor
//!   │   ├── ConnectTo() → coordinator.join
//!   │   └── RaiseAnchor() → coordinator.leave
//!   └── MembershipCoordinator
//!       ├── owns Session (Absent | Anchored | Joined)
//!       ├── serializes all mutating operations
//!       └── MembershipProvider (TCP peer exchange, or a test double)
//! ```

pub mod client;
pub mod error;
pub mod lifecycle;
pub mod membership;
pub mod provider;
pub mod server;
pub mod tcp;

#[cfg(test)]
pub(crate) mod testutil;

/// Generated protobuf types and gRPC service stubs.
pub mod proto {
    tonic::include_proto!("anchorage.cluster");
}

pub use client::ControlClient;
pub use error::{ClusterError, ClusterResult};
pub use lifecycle::{LifecycleManager, LifecycleState, StopMode};
pub use membership::MembershipCoordinator;
pub use provider::{MembershipHandle, MembershipProvider, ProviderError};
pub use server::ControlPlane;
pub use tcp::TcpMembership;
