//! Control plane gRPC service.
//!
//! The node's only network-facing surface. Translates remote calls
//! 1:1 onto coordinator operations plus a stateless ping. Expected
//! failures (precondition violations, provider errors, draining) are
//! normal `success = false` replies, never transport errors.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use crate::error::ClusterError;
use crate::membership::MembershipCoordinator;
use crate::proto;
use crate::proto::cluster_server::Cluster;
use crate::provider::MembershipProvider;

/// Bounded timeout for a remotely requested leave.
const RAISE_ANCHOR_TIMEOUT: Duration = Duration::from_secs(5);

/// gRPC implementation of the cluster control plane.
pub struct ControlPlane<P: MembershipProvider> {
    coordinator: Arc<MembershipCoordinator<P>>,
    /// Flipped to true by the lifecycle manager once draining begins.
    draining: watch::Receiver<bool>,
}

impl<P: MembershipProvider> ControlPlane<P> {
    /// Create a new control plane service.
    pub fn new(
        coordinator: Arc<MembershipCoordinator<P>>,
        draining: watch::Receiver<bool>,
    ) -> Self {
        Self {
            coordinator,
            draining,
        }
    }

    /// Get the tonic service for mounting on a gRPC server.
    pub fn into_service(self) -> proto::cluster_server::ClusterServer<Self> {
        proto::cluster_server::ClusterServer::new(self)
    }

    /// Failure reply for mutating calls received after drain began.
    fn reject_if_draining(&self) -> Option<proto::AnchorReply> {
        if *self.draining.borrow() {
            Some(failure(&ClusterError::Stopping))
        } else {
            None
        }
    }
}

fn failure(err: &ClusterError) -> proto::AnchorReply {
    proto::AnchorReply {
        success: false,
        reply: Some(err.to_string()),
    }
}

#[tonic::async_trait]
impl<P: MembershipProvider> Cluster for ControlPlane<P> {
    async fn ping_node(
        &self,
        request: Request<proto::HelloRequest>,
    ) -> Result<Response<proto::HelloReply>, Status> {
        let req = request.into_inner();
        debug!(ping = %req.ping, "ping received");

        Ok(Response::new(proto::HelloReply {
            pong: format!("Hello {}", req.ping),
        }))
    }

    async fn drop_anchor(
        &self,
        request: Request<proto::ConnectRequest>,
    ) -> Result<Response<proto::AnchorReply>, Status> {
        if let Some(reply) = self.reject_if_draining() {
            return Ok(Response::new(reply));
        }
        // Advisory pre-check; the authoritative one runs inside the
        // coordinator's critical section.
        if self.coordinator.has_session().await {
            return Ok(Response::new(failure(&ClusterError::SessionExists)));
        }
        let req = request.into_inner();
        info!(host_ip = %req.host_ip, "drop anchor requested");

        let reply = match self.coordinator.anchor(&req.host_ip).await {
            Ok(()) => proto::AnchorReply {
                success: true,
                reply: None,
            },
            Err(e) => failure(&e),
        };
        Ok(Response::new(reply))
    }

    async fn connect_to(
        &self,
        request: Request<proto::ConnectRequest>,
    ) -> Result<Response<proto::AnchorReply>, Status> {
        if let Some(reply) = self.reject_if_draining() {
            return Ok(Response::new(reply));
        }
        if self.coordinator.has_session().await {
            return Ok(Response::new(failure(&ClusterError::SessionExists)));
        }
        let req = request.into_inner();
        info!(host_ip = %req.host_ip, seed = %req.ip, "connect requested");

        let reply = match self.coordinator.join(&req.host_ip, &req.ip).await {
            Ok(contacted) => proto::AnchorReply {
                success: true,
                reply: Some(format!("{contacted} nodes were contacted")),
            },
            Err(e) => failure(&e),
        };
        Ok(Response::new(reply))
    }

    async fn raise_anchor(
        &self,
        _request: Request<proto::EmptyRequest>,
    ) -> Result<Response<proto::AnchorReply>, Status> {
        if let Some(reply) = self.reject_if_draining() {
            return Ok(Response::new(reply));
        }
        info!("raise anchor requested");

        let reply = match self.coordinator.leave(RAISE_ANCHOR_TIMEOUT).await {
            Ok(()) => proto::AnchorReply {
                success: true,
                reply: None,
            },
            Err(e) => failure(&e),
        };
        Ok(Response::new(reply))
    }
}
