//! Daemon lifecycle — startup and shutdown sequencing.
//!
//! Owns the process-wide state machine `Starting → Running → Draining
//! → Stopped` (forward-only) and is the only component that initiates
//! termination. Shutdown ordering is an explicit protocol (stop
//! accepting, drain in-flight requests, leave the membership network,
//! stop) driven by watch channels rather than signal callbacks, so
//! the sequence is testable without a process.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tonic::transport::Server;
use tonic::transport::server::TcpIncoming;
use tracing::{debug, info, warn};

use crate::error::ClusterError;
use crate::membership::MembershipCoordinator;
use crate::provider::MembershipProvider;
use crate::server::ControlPlane;

/// Generous bound for the final leave during teardown.
const TEARDOWN_LEAVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Process lifecycle states. Transitions only move forward; there is
/// no re-entry to `Running` after a stop begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// How a stop request treats in-flight work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Wait for in-flight requests to finish before teardown.
    Graceful,
    /// Tear down without waiting for the serving task.
    Forced,
}

/// Sequences daemon startup and shutdown around the control plane.
pub struct LifecycleManager<P: MembershipProvider> {
    coordinator: Arc<MembershipCoordinator<P>>,
    state: Mutex<LifecycleState>,
    drain_tx: watch::Sender<bool>,
    stop_tx: watch::Sender<Option<StopMode>>,
    bound_tx: watch::Sender<Option<SocketAddr>>,
    leave_timeout: Duration,
}

impl<P: MembershipProvider> LifecycleManager<P> {
    /// Create a manager for a not-yet-serving daemon.
    pub fn new(coordinator: Arc<MembershipCoordinator<P>>) -> Self {
        let (drain_tx, _) = watch::channel(false);
        let (stop_tx, _) = watch::channel(None);
        let (bound_tx, _) = watch::channel(None);
        Self {
            coordinator,
            state: Mutex::new(LifecycleState::Starting),
            drain_tx,
            stop_tx,
            bound_tx,
            leave_timeout: TEARDOWN_LEAVE_TIMEOUT,
        }
    }

    /// Override the teardown leave timeout.
    pub fn with_leave_timeout(mut self, timeout: Duration) -> Self {
        self.leave_timeout = timeout;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap()
    }

    /// Drain flag for the control plane: flips to true once draining
    /// begins, after which mutating RPCs are rejected.
    pub fn drain_signal(&self) -> watch::Receiver<bool> {
        self.drain_tx.subscribe()
    }

    /// Address the control listener is bound to, while serving.
    pub fn control_addr(&self) -> Option<SocketAddr> {
        *self.bound_tx.borrow()
    }

    /// Request termination.
    ///
    /// The first request wins; anything received while already
    /// `Draining` or `Stopped` is a no-op. Returns whether this call
    /// initiated the stop.
    pub fn request_stop(&self, mode: StopMode) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            LifecycleState::Draining | LifecycleState::Stopped => {
                debug!(?mode, "stop already in progress, ignoring");
                false
            }
            _ => {
                info!(?mode, "stop requested");
                *state = LifecycleState::Draining;
                drop(state);
                let _ = self.drain_tx.send(true);
                let _ = self.stop_tx.send(Some(mode));
                true
            }
        }
    }

    /// Serve the control plane on `addr` until a stop is requested,
    /// then run teardown.
    ///
    /// A bind failure is fatal and returns before any state change. A
    /// stop that arrives before the listener is up short-circuits the
    /// serving step entirely.
    pub async fn serve(&self, addr: SocketAddr, control: ControlPlane<P>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind control listener on {addr}"))?;
        let local_addr = listener.local_addr().context("control listener address")?;
        let incoming = TcpIncoming::from_listener(listener, true, None)
            .map_err(|e| anyhow::anyhow!("configure control listener: {e}"))?;

        {
            // A stop that raced startup keeps its Draining state; the
            // shutdown future below is already resolved and the server
            // exits without accepting anything.
            let mut state = self.state.lock().unwrap();
            if *state == LifecycleState::Starting {
                *state = LifecycleState::Running;
            }
        }
        let _ = self.bound_tx.send(Some(local_addr));
        info!(%local_addr, "control plane listening");

        let mut stop_rx = self.stop_tx.subscribe();
        let shutdown = {
            let mut rx = stop_rx.clone();
            async move {
                while rx.borrow_and_update().is_none() {
                    if rx.changed().await.is_err() {
                        return;
                    }
                }
            }
        };

        let serving = tokio::spawn(
            Server::builder()
                .add_service(control.into_service())
                .serve_with_incoming_shutdown(incoming, shutdown),
        );

        let mode = loop {
            if let Some(mode) = *stop_rx.borrow_and_update() {
                break mode;
            }
            if stop_rx.changed().await.is_err() {
                break StopMode::Graceful;
            }
        };

        match mode {
            StopMode::Graceful => {
                info!("draining control plane, waiting for in-flight requests");
                match serving.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "control plane error during drain"),
                    Err(e) => warn!(error = %e, "control plane task failed"),
                }
            }
            StopMode::Forced => {
                info!("forced stop, not waiting for in-flight requests");
                drop(serving);
            }
        }

        self.teardown().await;
        Ok(())
    }

    /// Leave the membership network if a session exists, then stop.
    ///
    /// Runs after the drain step, so the coordinator's mutex orders
    /// this leave after any mutating call that was already admitted.
    async fn teardown(&self) {
        match self.coordinator.leave(self.leave_timeout).await {
            Ok(()) => info!("left membership network"),
            Err(ClusterError::NoSession) => debug!("no membership session at teardown"),
            Err(e) => warn!(error = %e, "failed to leave membership network cleanly"),
        }

        *self.state.lock().unwrap() = LifecycleState::Stopped;
        let _ = self.bound_tx.send(None);
        info!("daemon stopped");
    }
}

/// Translate Unix termination signals onto lifecycle stop requests.
///
/// SIGQUIT requests a graceful stop, SIGTERM a forced one. The task
/// keeps listening so repeated signals fall into the no-op path of
/// [`LifecycleManager::request_stop`].
#[cfg(unix)]
pub fn spawn_signal_listener<P: MembershipProvider>(
    lifecycle: Arc<LifecycleManager<P>>,
) -> tokio::task::JoinHandle<()> {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut quit = signal(SignalKind::quit()).expect("failed to register SIGQUIT handler");
        let mut term = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        loop {
            tokio::select! {
                _ = quit.recv() => {
                    info!("SIGQUIT received");
                    lifecycle.request_stop(StopMode::Graceful);
                }
                _ = term.recv() => {
                    info!("SIGTERM received");
                    lifecycle.request_stop(StopMode::Forced);
                }
            }
        }
    })
}

#[cfg(not(unix))]
pub fn spawn_signal_listener<P: MembershipProvider>(
    lifecycle: Arc<LifecycleManager<P>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to register Ctrl+C handler");
        info!("Ctrl+C received");
        lifecycle.request_stop(StopMode::Graceful);
    })
}
