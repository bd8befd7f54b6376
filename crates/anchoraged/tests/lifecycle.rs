//! Daemon lifecycle integration tests.
//!
//! Each test assembles a full in-process daemon (lifecycle manager,
//! gRPC control plane, TCP membership transport) and drives it over
//! loopback with the real control client. Tests that form clusters
//! between two daemons pin distinct membership ports so they can name
//! each other's seed address.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anchorage_cluster::{
    ControlClient, ControlPlane, LifecycleManager, LifecycleState, MembershipCoordinator,
    StopMode, TcpMembership,
};

struct Daemon {
    lifecycle: Arc<LifecycleManager<TcpMembership>>,
    coordinator: Arc<MembershipCoordinator<TcpMembership>>,
    serve: tokio::task::JoinHandle<anyhow::Result<()>>,
    addr: SocketAddr,
}

impl Daemon {
    async fn spawn(membership_port: u16) -> Self {
        let provider = TcpMembership::new(membership_port);
        let coordinator = Arc::new(MembershipCoordinator::new(provider));
        let lifecycle = Arc::new(LifecycleManager::new(Arc::clone(&coordinator)));
        let control = ControlPlane::new(Arc::clone(&coordinator), lifecycle.drain_signal());

        let serve = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move {
                lifecycle
                    .serve("127.0.0.1:0".parse().unwrap(), control)
                    .await
            })
        };

        let addr = {
            let mut addr = None;
            for _ in 0..100 {
                if let Some(bound) = lifecycle.control_addr() {
                    addr = Some(bound);
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            addr.expect("control plane did not start within 1s")
        };

        Self {
            lifecycle,
            coordinator,
            serve,
            addr,
        }
    }

    async fn client(&self) -> ControlClient {
        ControlClient::connect(&self.addr.to_string())
            .await
            .expect("connect to control plane")
    }

    async fn stop(self, mode: StopMode) {
        self.lifecycle.request_stop(mode);
        self.serve.await.unwrap().unwrap();
        assert_eq!(self.lifecycle.state(), LifecycleState::Stopped);
    }
}

#[tokio::test]
async fn ping_round_trip() {
    let daemon = Daemon::spawn(0).await;
    let mut client = daemon.client().await;

    let pong = client.ping("sailor").await.unwrap();
    assert_eq!(pong, "Hello sailor");

    drop(client);
    daemon.stop(StopMode::Graceful).await;
}

#[tokio::test]
async fn anchor_is_exclusive_and_leave_clears_it() {
    let daemon = Daemon::spawn(0).await;
    let mut client = daemon.client().await;

    let first = client.drop_anchor("127.0.0.1").await.unwrap();
    assert!(first.success);

    let second = client.drop_anchor("127.0.0.1").await.unwrap();
    assert!(!second.success);

    let leave = client.raise_anchor().await.unwrap();
    assert!(leave.success);

    // No session left to leave.
    let again = client.raise_anchor().await.unwrap();
    assert!(!again.success);

    drop(client);
    daemon.stop(StopMode::Graceful).await;
}

#[tokio::test]
async fn join_unreachable_seed_leaves_no_session() {
    let daemon = Daemon::spawn(0).await;
    let mut client = daemon.client().await;

    let reply = client.connect_to("127.0.0.1", "127.0.0.1:1").await.unwrap();
    assert!(!reply.success);
    assert!(!daemon.coordinator.has_session().await);

    drop(client);
    daemon.stop(StopMode::Graceful).await;
}

#[tokio::test]
async fn two_daemons_form_and_leave_a_cluster() {
    let seed = Daemon::spawn(45121).await;
    let joiner = Daemon::spawn(45122).await;

    let mut seed_client = seed.client().await;
    let reply = seed_client.drop_anchor("127.0.0.1").await.unwrap();
    assert!(reply.success);

    let mut joiner_client = joiner.client().await;
    let reply = joiner_client
        .connect_to("127.0.0.1", "127.0.0.1:45121")
        .await
        .unwrap();
    assert!(reply.success);
    assert_eq!(reply.reply.unwrap(), "1 nodes were contacted");

    let reply = joiner_client.raise_anchor().await.unwrap();
    assert!(reply.success);

    drop(seed_client);
    drop(joiner_client);
    joiner.stop(StopMode::Graceful).await;
    seed.stop(StopMode::Graceful).await;
}

#[tokio::test]
async fn graceful_stop_leaves_the_cluster() {
    let daemon = Daemon::spawn(45131).await;
    let mut client = daemon.client().await;

    client.drop_anchor("127.0.0.1").await.unwrap();
    assert!(daemon.coordinator.has_session().await);
    drop(client);

    // Teardown runs the final leave: no session survives the stop.
    let coordinator = Arc::clone(&daemon.coordinator);
    daemon.stop(StopMode::Graceful).await;
    assert!(!coordinator.has_session().await);
}

#[tokio::test]
async fn forced_stop_still_leaves_the_cluster() {
    let daemon = Daemon::spawn(45141).await;
    let mut client = daemon.client().await;

    client.drop_anchor("127.0.0.1").await.unwrap();
    drop(client);

    let coordinator = Arc::clone(&daemon.coordinator);
    daemon.stop(StopMode::Forced).await;
    assert!(!coordinator.has_session().await);
}

#[tokio::test]
async fn stopped_daemon_refuses_new_connections() {
    let daemon = Daemon::spawn(0).await;
    let addr = daemon.addr;

    daemon.stop(StopMode::Graceful).await;

    assert!(ControlClient::connect(&addr.to_string()).await.is_err());
}
