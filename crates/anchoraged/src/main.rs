//! anchoraged — the anchorage daemon.
//!
//! A node-resident daemon exposing a small gRPC control plane for
//! forming and tearing down cluster membership.
//!
//! # Usage
//!
//! ```text
//! anchoraged run --port 47001          # serve in the foreground
//! anchoraged start                     # fork to the background
//! anchoraged stop [--force]            # signal the running daemon
//! anchoraged ping hello                # liveness check
//! anchoraged anchor 10.0.0.1           # start a new cluster
//! anchoraged join 10.0.0.2 10.0.0.1    # join via a seed node
//! anchoraged leave                     # leave the cluster
//! ```

mod daemon;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing::info;

use anchorage_cluster::tcp::DEFAULT_MEMBERSHIP_PORT;
use anchorage_cluster::{
    ControlClient, ControlPlane, LifecycleManager, MembershipCoordinator, TcpMembership, lifecycle,
    proto,
};

use crate::daemon::{DaemonContext, Forked};

/// Default control plane port.
const DEFAULT_CONTROL_PORT: u16 = 47001;
const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:47001";

#[derive(Parser)]
#[command(name = "anchoraged", about = "Anchorage cluster daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the control plane in the foreground.
    Run {
        /// Control plane port.
        #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
        port: u16,

        /// Default port for the membership transport.
        #[arg(long, default_value_t = DEFAULT_MEMBERSHIP_PORT)]
        membership_port: u16,
    },

    /// Fork to the background and serve.
    Start {
        #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
        port: u16,

        #[arg(long, default_value_t = DEFAULT_MEMBERSHIP_PORT)]
        membership_port: u16,

        /// Directory for the pid marker and log file.
        #[arg(long, default_value = ".")]
        run_dir: PathBuf,
    },

    /// Stop a running daemon.
    Stop {
        /// Do not wait for in-flight work to finish.
        #[arg(long)]
        force: bool,

        #[arg(long, default_value = ".")]
        run_dir: PathBuf,
    },

    /// Ping a daemon's control plane.
    Ping {
        text: String,

        /// Control plane address.
        #[arg(long, default_value = DEFAULT_CONTROL_ADDR)]
        addr: String,
    },

    /// Ask a daemon to start a new cluster.
    Anchor {
        /// Address the daemon advertises to the membership network.
        host_ip: String,

        #[arg(long, default_value = DEFAULT_CONTROL_ADDR)]
        addr: String,
    },

    /// Ask a daemon to join an existing cluster.
    Join {
        host_ip: String,

        /// Seed node to join through.
        seed_ip: String,

        #[arg(long, default_value = DEFAULT_CONTROL_ADDR)]
        addr: String,
    },

    /// Ask a daemon to leave its cluster.
    Leave {
        #[arg(long, default_value = DEFAULT_CONTROL_ADDR)]
        addr: String,
    },
}

enum ClientCall {
    Ping(String),
    Anchor(String),
    Join(String, String),
    Leave,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            port,
            membership_port,
        } => {
            init_tracing();
            run_daemon(port, membership_port, None)
        }
        Command::Start {
            port,
            membership_port,
            run_dir,
        } => {
            let ctx = DaemonContext::new(run_dir);
            // Fork before the runtime exists.
            match ctx.daemonize()? {
                Forked::Parent { child } => {
                    println!("anchoraged started (pid {child})");
                    Ok(())
                }
                Forked::Child => {
                    // Stdio now points at the log file.
                    init_tracing();
                    run_daemon(port, membership_port, Some(ctx))
                }
            }
        }
        Command::Stop { force, run_dir } => {
            let ctx = DaemonContext::new(run_dir);
            ctx.signal(force)?;
            println!("stop signal sent");
            Ok(())
        }
        Command::Ping { text, addr } => run_client(addr, ClientCall::Ping(text)),
        Command::Anchor { host_ip, addr } => run_client(addr, ClientCall::Anchor(host_ip)),
        Command::Join {
            host_ip,
            seed_ip,
            addr,
        } => run_client(addr, ClientCall::Join(host_ip, seed_ip)),
        Command::Leave { addr } => run_client(addr, ClientCall::Leave),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,anchoraged=debug,anchorage_cluster=debug".parse().unwrap()
            }),
        )
        .init();
}

#[tokio::main]
async fn run_daemon(
    port: u16,
    membership_port: u16,
    ctx: Option<DaemonContext>,
) -> anyhow::Result<()> {
    info!("anchorage daemon starting");

    let provider = TcpMembership::new(membership_port);
    let coordinator = Arc::new(MembershipCoordinator::new(provider));
    let lifecycle_mgr = Arc::new(LifecycleManager::new(Arc::clone(&coordinator)));
    let control = ControlPlane::new(coordinator, lifecycle_mgr.drain_signal());

    let signals = lifecycle::spawn_signal_listener(Arc::clone(&lifecycle_mgr));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let result = lifecycle_mgr.serve(addr, control).await;

    signals.abort();
    if let Some(ctx) = ctx {
        ctx.release();
    }
    info!("anchorage daemon stopped");
    result
}

#[tokio::main]
async fn run_client(addr: String, call: ClientCall) -> anyhow::Result<()> {
    let mut client = ControlClient::connect(&addr).await?;

    match call {
        ClientCall::Ping(text) => {
            let pong = client.ping(&text).await?;
            println!("{pong}");
            Ok(())
        }
        ClientCall::Anchor(host_ip) => print_reply(client.drop_anchor(&host_ip).await?),
        ClientCall::Join(host_ip, seed_ip) => {
            print_reply(client.connect_to(&host_ip, &seed_ip).await?)
        }
        ClientCall::Leave => print_reply(client.raise_anchor().await?),
    }
}

fn print_reply(reply: proto::AnchorReply) -> anyhow::Result<()> {
    if reply.success {
        match reply.reply {
            Some(detail) => println!("ok: {detail}"),
            None => println!("ok"),
        }
        Ok(())
    } else {
        bail!(
            "{}",
            reply.reply.unwrap_or_else(|| "request failed".to_string())
        )
    }
}
