//! TCP peer-exchange membership transport.
//!
//! The smallest real transport that lets daemons form and leave a
//! cluster: each session runs a line-oriented listener on the
//! membership port; joining a seed announces this node and returns the
//! seed's roster; leaving sends best-effort departure notes. This is
//! not a failure detector: dead peers are only dropped when they
//! announce departure.
//!
//! Wire format, one message per connection:
//!
//! ```text
//! JOIN <addr>    → PEERS <addr> <addr> ...
//! LEAVE <addr>   → OK
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::provider::{MembershipHandle, MembershipProvider, ProviderError};

/// Default port for the membership transport.
pub const DEFAULT_MEMBERSHIP_PORT: u16 = 7946;

/// Bound on dialing a seed during join.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Membership provider backed by TCP peer exchange.
pub struct TcpMembership {
    port: u16,
}

impl TcpMembership {
    /// Create a provider whose sessions default to `port` when an
    /// address carries no port of its own.
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl Default for TcpMembership {
    fn default() -> Self {
        Self::new(DEFAULT_MEMBERSHIP_PORT)
    }
}

#[async_trait]
impl MembershipProvider for TcpMembership {
    type Handle = TcpHandle;

    async fn create(&self, bind_addr: &str) -> Result<TcpHandle, ProviderError> {
        let addr = ensure_port(bind_addr, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ProviderError::Create(format!("bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ProviderError::Create(e.to_string()))?;

        let peers = Arc::new(Mutex::new(HashSet::from([local_addr.to_string()])));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&peers), shutdown_rx));

        info!(%local_addr, "membership transport listening");
        Ok(TcpHandle {
            local_addr,
            default_port: self.port,
            peers,
            shutdown_tx,
            accept_task: Some(accept_task),
        })
    }
}

/// A live peer-exchange session.
pub struct TcpHandle {
    local_addr: SocketAddr,
    default_port: u16,
    peers: Arc<Mutex<HashSet<String>>>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

impl TcpHandle {
    /// Address the transport is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Known peers, including this node.
    pub async fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.peers.lock().await.iter().cloned().collect();
        peers.sort();
        peers
    }
}

#[async_trait]
impl MembershipHandle for TcpHandle {
    async fn join(&mut self, seed_addr: &str) -> Result<usize, ProviderError> {
        let seed = ensure_port(seed_addr, self.default_port);

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&seed))
            .await
            .map_err(|_| ProviderError::Join(format!("timed out connecting to seed {seed}")))?
            .map_err(|e| ProviderError::Join(format!("seed {seed}: {e}")))?;

        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(format!("JOIN {}\n", self.local_addr).as_bytes())
            .await
            .map_err(|e| ProviderError::Join(format!("announce to seed {seed}: {e}")))?;

        let mut line = String::new();
        BufReader::new(reader)
            .read_line(&mut line)
            .await
            .map_err(|e| ProviderError::Join(format!("read roster from seed {seed}: {e}")))?;

        let Some(roster) = line.trim().strip_prefix("PEERS") else {
            return Err(ProviderError::Join(format!(
                "unexpected reply from seed {seed}: {}",
                line.trim()
            )));
        };

        let mut contacted = 0;
        {
            let mut peers = self.peers.lock().await;
            for addr in roster.split_whitespace() {
                peers.insert(addr.to_string());
                contacted += 1;
            }
        }

        info!(%seed, contacted, "joined membership network");
        Ok(contacted)
    }

    async fn leave(&mut self, timeout: Duration) -> Result<(), ProviderError> {
        let local = self.local_addr.to_string();
        let targets: Vec<String> = {
            let peers = self.peers.lock().await;
            peers.iter().filter(|p| **p != local).cloned().collect()
        };

        let announce = async {
            for target in &targets {
                match TcpStream::connect(target).await {
                    Ok(mut stream) => {
                        if let Err(e) =
                            stream.write_all(format!("LEAVE {local}\n").as_bytes()).await
                        {
                            debug!(peer = %target, error = %e, "departure note failed");
                        }
                        let _ = stream.flush().await;
                    }
                    Err(e) => debug!(peer = %target, error = %e, "departure note failed"),
                }
            }
        };

        tokio::time::timeout(timeout, announce)
            .await
            .map_err(|_| ProviderError::LeaveTimeout)
    }

    async fn shutdown(&mut self) -> Result<(), ProviderError> {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.accept_task.take() {
            task.await
                .map_err(|e| ProviderError::Shutdown(e.to_string()))?;
        }
        debug!(local_addr = %self.local_addr, "membership transport shut down");
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    peers: Arc<Mutex<HashSet<String>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let peers = Arc::clone(&peers);
                    tokio::spawn(async move {
                        if let Err(e) = handle_peer(stream, peers).await {
                            debug!(%remote, error = %e, "membership exchange failed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "membership accept failed"),
            },
            _ = shutdown_rx.changed() => break,
        }
    }
}

async fn handle_peer(
    stream: TcpStream,
    peers: Arc<Mutex<HashSet<String>>>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut line = String::new();
    BufReader::new(reader).read_line(&mut line).await?;
    let msg = line.trim();

    if let Some(addr) = msg.strip_prefix("JOIN ") {
        // Roster is captured before the insert: the count a joiner
        // receives is the number of nodes it reached, itself excluded.
        let roster = {
            let mut peers = peers.lock().await;
            let roster: Vec<String> = peers.iter().cloned().collect();
            peers.insert(addr.to_string());
            roster.join(" ")
        };
        info!(peer = addr, "peer joined");
        writer
            .write_all(format!("PEERS {roster}\n").as_bytes())
            .await?;
    } else if let Some(addr) = msg.strip_prefix("LEAVE ") {
        peers.lock().await.remove(addr);
        info!(peer = addr, "peer left");
        writer.write_all(b"OK\n").await?;
    } else {
        debug!(message = msg, "ignoring unknown membership message");
    }
    Ok(())
}

fn ensure_port(addr: &str, default_port: u16) -> String {
    if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{addr}:{default_port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 1s");
    }

    #[tokio::test]
    async fn join_returns_roster_count() {
        let provider = TcpMembership::new(0);

        let mut seed = provider.create("127.0.0.1:0").await.unwrap();
        let seed_addr = seed.local_addr().to_string();

        let mut joiner = provider.create("127.0.0.1:0").await.unwrap();
        let contacted = joiner.join(&seed_addr).await.unwrap();

        // The seed was alone, so exactly one node was contacted.
        assert_eq!(contacted, 1);
        assert!(joiner.peers().await.contains(&seed_addr));

        joiner.shutdown().await.unwrap();
        seed.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn seed_learns_joiner_address() {
        let provider = TcpMembership::new(0);

        let mut seed = provider.create("127.0.0.1:0").await.unwrap();
        let seed_addr = seed.local_addr().to_string();

        let mut joiner = provider.create("127.0.0.1:0").await.unwrap();
        let joiner_addr = joiner.local_addr().to_string();
        joiner.join(&seed_addr).await.unwrap();

        // The accept path records the joiner before replying, so the
        // seed knows it as soon as the join returns.
        assert!(seed.peers().await.contains(&joiner_addr));

        joiner.shutdown().await.unwrap();
        seed.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn join_unreachable_seed_fails() {
        let provider = TcpMembership::new(0);
        let mut handle = provider.create("127.0.0.1:0").await.unwrap();

        let err = handle.join("127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Join(_)));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn leave_notifies_peers() {
        let provider = TcpMembership::new(0);

        let mut seed = provider.create("127.0.0.1:0").await.unwrap();
        let seed_addr = seed.local_addr().to_string();

        let mut joiner = provider.create("127.0.0.1:0").await.unwrap();
        let joiner_addr = joiner.local_addr().to_string();
        joiner.join(&seed_addr).await.unwrap();

        joiner.leave(Duration::from_secs(1)).await.unwrap();

        let seed_peers = Arc::clone(&seed.peers);
        wait_until(move || {
            let peers = seed_peers.try_lock();
            peers.is_ok_and(|p| !p.contains(&joiner_addr))
        })
        .await;

        joiner.shutdown().await.unwrap();
        seed.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_releases_the_port() {
        let provider = TcpMembership::new(0);
        let mut handle = provider.create("127.0.0.1:0").await.unwrap();
        let addr = handle.local_addr();

        handle.shutdown().await.unwrap();

        // The port can be rebound once the accept loop is gone.
        let rebound = TcpListener::bind(addr).await;
        assert!(rebound.is_ok());
    }

    #[test]
    fn ensure_port_appends_default() {
        assert_eq!(ensure_port("10.0.0.1", 7946), "10.0.0.1:7946");
        assert_eq!(ensure_port("10.0.0.1:9000", 7946), "10.0.0.1:9000");
    }
}
