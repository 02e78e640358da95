//! Encore Master -- library crate for the master server process.
//!
//! Wires the server registry, the node coordinator and the matchmaker to a
//! UDP side channel and the periodic sweep task. `Master::start` is what
//! the binary runs; integration tests start it in-process the same way.

pub mod config;
pub mod matchmaking;
pub mod side_channel;
pub mod sweep_task;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use encore_coordinator::NodeCoordinator;
use encore_registry::ServerRegistry;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::MasterConfig;
use crate::matchmaking::{Matchmaker, NodeProvisioner};

/// A running master: shared state plus its background tasks.
pub struct Master {
    pub registry: ServerRegistry,
    pub coordinator: Arc<NodeCoordinator>,
    pub matchmaker: Arc<Matchmaker>,
    /// Bound address of the node side channel.
    pub local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Master {
    /// Bind the side channel and spawn the receive, send and sweep tasks.
    pub async fn start(cfg: &MasterConfig) -> anyhow::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(&cfg.master.node_listen_addr).await?);
        let local_addr = socket.local_addr()?;

        let (outbound_tx, outbound_rx) = mpsc::channel(cfg.master.outbound_queue);
        let coordinator = Arc::new(NodeCoordinator::new(outbound_tx, cfg.sweep_window()));
        let registry = ServerRegistry::new();
        let provisioner = Arc::new(NodeProvisioner::new(
            coordinator.clone(),
            registry.clone(),
            cfg.matchmaking.instance_port,
            cfg.matchmaking.code_length,
        ));
        let matchmaker = Arc::new(Matchmaker::new(
            registry.clone(),
            coordinator.clone(),
            provisioner,
            cfg.relay_timeout(),
        ));

        let (shutdown_tx, _) = broadcast::channel(1);
        let handles = vec![
            tokio::spawn(side_channel::run_receive_loop(
                socket.clone(),
                coordinator.clone(),
                registry.clone(),
                shutdown_tx.subscribe(),
            )),
            tokio::spawn(side_channel::run_send_loop(
                socket,
                outbound_rx,
                shutdown_tx.subscribe(),
            )),
            tokio::spawn(sweep_task::run_sweep_loop(
                coordinator.clone(),
                registry.clone(),
                cfg.sweep_interval(),
                shutdown_tx.subscribe(),
            )),
        ];

        tracing::info!(
            listen = %local_addr,
            sweep_interval_secs = cfg.nodes.sweep_interval_secs,
            relay_timeout_ms = cfg.matchmaking.relay_timeout_ms,
            "master: side channel up"
        );

        Ok(Self {
            registry,
            coordinator,
            matchmaker,
            local_addr,
            shutdown_tx,
            handles,
        })
    }

    /// Signal every task and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!("master: task ended abnormally: {e}");
            }
        }
        tracing::info!(
            servers = self.registry.get_server_count(),
            nodes = self.coordinator.node_count(),
            "master: stopped"
        );
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
