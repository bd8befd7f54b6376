//! Control plane client.
//!
//! Thin wrapper over the generated gRPC client, used by the CLI to
//! drive a running daemon.

use tonic::transport::Channel;
use tracing::debug;

use crate::proto;
use crate::proto::cluster_client::ClusterClient;

/// Client for a daemon's control plane.
pub struct ControlClient {
    inner: ClusterClient<Channel>,
}

impl ControlClient {
    /// Connect to the control plane at `addr` (`host:port`).
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let inner = ClusterClient::connect(format!("http://{addr}")).await?;
        debug!(%addr, "connected to control plane");
        Ok(Self { inner })
    }

    /// Liveness check. Returns the daemon's pong.
    pub async fn ping(&mut self, text: &str) -> anyhow::Result<String> {
        let reply = self
            .inner
            .ping_node(proto::HelloRequest {
                ping: text.to_string(),
            })
            .await?
            .into_inner();
        Ok(reply.pong)
    }

    /// Ask the daemon to start a new cluster, advertising `host_ip`.
    pub async fn drop_anchor(&mut self, host_ip: &str) -> anyhow::Result<proto::AnchorReply> {
        let reply = self
            .inner
            .drop_anchor(proto::ConnectRequest {
                host_ip: host_ip.to_string(),
                ip: String::new(),
            })
            .await?
            .into_inner();
        Ok(reply)
    }

    /// Ask the daemon to join the cluster reachable via `seed_ip`.
    pub async fn connect_to(
        &mut self,
        host_ip: &str,
        seed_ip: &str,
    ) -> anyhow::Result<proto::AnchorReply> {
        let reply = self
            .inner
            .connect_to(proto::ConnectRequest {
                host_ip: host_ip.to_string(),
                ip: seed_ip.to_string(),
            })
            .await?
            .into_inner();
        Ok(reply)
    }

    /// Ask the daemon to leave its cluster.
    pub async fn raise_anchor(&mut self) -> anyhow::Result<proto::AnchorReply> {
        let reply = self
            .inner
            .raise_anchor(proto::EmptyRequest {})
            .await?
            .into_inner();
        Ok(reply)
    }
}
