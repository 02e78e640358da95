//! Sweep background task -- periodic fleet liveness sweeps and server
//! cleanup for nodes that drop out.
//!
//! On each tick: start a sweep unless one is still in flight.
//! On each `NodeEvent::Offline`: purge that node's servers from the registry.
//! If the event stream lags, every offline node is purged instead so no
//! transition is missed.

use std::sync::Arc;
use std::time::Duration;

use encore_coordinator::{NodeCoordinator, NodeEvent};
use encore_registry::ServerRegistry;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Run the sweep loop until shutdown.
pub async fn run_sweep_loop(
    coordinator: Arc<NodeCoordinator>,
    registry: ServerRegistry,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut events = coordinator.subscribe();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if coordinator.start_wait_for_all_nodes_task().is_none() {
                    tracing::debug!("sweep: previous sweep still running");
                }
            }
            event = events.recv() => {
                match event {
                    Ok(NodeEvent::Offline { address }) => {
                        let removed = registry.remove_servers_with_endpoint(address);
                        tracing::info!(%address, removed, "sweep: node offline, servers purged");
                    }
                    Ok(NodeEvent::Online { address, version }) => {
                        tracing::debug!(%address, %version, "sweep: node online");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "sweep: node events lagged, reconciling");
                        purge_offline(&coordinator, &registry);
                    }
                    Err(RecvError::Closed) => {
                        tracing::warn!("sweep: node event stream closed");
                        return;
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("sweep: shutting down");
                return;
            }
        }
    }
}

/// Remove servers hosted on any node currently Offline.
pub fn purge_offline(coordinator: &NodeCoordinator, registry: &ServerRegistry) -> usize {
    coordinator
        .get_nodes()
        .iter()
        .filter(|node| !node.is_online())
        .map(|node| registry.remove_servers_with_endpoint(node.address))
        .sum()
}
