//! Encore Coordinator -- node fleet state machine and encryption relay.
//!
//! Tracks every dedicated-server node that has announced itself on the side
//! channel (Online/Offline per address) and runs fleet-wide liveness sweeps.
//! Asks nodes to start server instances and relays a joining player's
//! encryption parameters to the node hosting their server. Both wait a
//! bounded time for the node to confirm.
//!
//! The coordinator never touches a socket. Outbound frames are queued as
//! `Datagram`s on an mpsc channel drained by the master's side-channel task;
//! inbound messages arrive as method calls from that same task.

mod rendezvous;

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use dashmap::{DashMap, DashSet};
use encore_protocol::{
    node_registry, CheckNodes, CreateServer, Message, MessageCodec, NodeMessage, Platform,
    ProtocolError, RelayPlayerEncryption, Request, RequestIdGenerator,
};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

pub use rendezvous::RendezvousKey;
use rendezvous::{PendingGuard, RendezvousTable};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("side channel closed")]
    ChannelClosed,
}

/// One encoded frame bound for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Bytes,
    pub target: SocketAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Online,
    Offline,
}

impl NodeState {
    pub fn name(&self) -> &'static str {
        match self {
            NodeState::Online => "online",
            NodeState::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub address: IpAddr,
    /// Side-channel address the node last announced itself from.
    pub control_endpoint: SocketAddr,
    pub version: String,
    pub state: NodeState,
    pub online_since: Instant,
    /// Last heartbeat acknowledgment, if any.
    pub last_ok: Option<Instant>,
}

impl NodeInfo {
    pub fn is_online(&self) -> bool {
        self.state == NodeState::Online
    }
}

/// Published on every Online/Offline transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Online { address: IpAddr, version: String },
    Offline { address: IpAddr },
}

/// Outcome of one liveness sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub acknowledged: usize,
    pub went_offline: Vec<IpAddr>,
}

/// Clears the sweep flag when the sweep task is dropped, including a task
/// aborted before its first poll.
struct SweepFlag(Arc<NodeCoordinator>);

impl Drop for SweepFlag {
    fn drop(&mut self) {
        self.0.waiting_for_responses.store(false, Ordering::Release);
    }
}

pub struct NodeCoordinator {
    nodes: DashMap<IpAddr, NodeInfo>,
    pending: RendezvousTable,
    creations: RendezvousTable<String>,
    waiting_for_responses: AtomicBool,
    sweep_acks: DashSet<IpAddr>,
    sweep_window: Duration,
    codec: Mutex<MessageCodec<NodeMessage>>,
    request_ids: RequestIdGenerator,
    outbound: mpsc::Sender<Datagram>,
    events: broadcast::Sender<NodeEvent>,
}

impl NodeCoordinator {
    pub fn new(outbound: mpsc::Sender<Datagram>, sweep_window: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            nodes: DashMap::new(),
            pending: RendezvousTable::default(),
            creations: RendezvousTable::default(),
            waiting_for_responses: AtomicBool::new(false),
            sweep_acks: DashSet::new(),
            sweep_window,
            codec: Mutex::new(MessageCodec::new(Arc::new(node_registry()))),
            request_ids: RequestIdGenerator::new(),
            outbound,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Fleet state
    // ========================================================================

    /// Create or refresh the node at `endpoint.ip()` as Online.
    pub fn set_node_online(&self, endpoint: SocketAddr, version: String) {
        let address = endpoint.ip();
        let now = Instant::now();
        let came_online = match self.nodes.get_mut(&address) {
            Some(mut node) => {
                node.control_endpoint = endpoint;
                node.version.clone_from(&version);
                if node.state == NodeState::Offline {
                    node.state = NodeState::Online;
                    node.online_since = now;
                    true
                } else {
                    false
                }
            }
            None => {
                // entry() keeps two concurrent first announcements from both
                // reporting a transition
                let mut inserted = false;
                self.nodes.entry(address).or_insert_with(|| {
                    inserted = true;
                    NodeInfo {
                        address,
                        control_endpoint: endpoint,
                        version: version.clone(),
                        state: NodeState::Online,
                        online_since: now,
                        last_ok: None,
                    }
                });
                inserted
            }
        };

        // An announcement is proof of life for a sweep in flight
        if self.waiting_for_responses.load(Ordering::Acquire) {
            self.sweep_acks.insert(address);
        }

        if came_online {
            tracing::info!(%address, %endpoint, %version, nodes = self.nodes.len(), "fleet: node online");
            let _ = self.events.send(NodeEvent::Online { address, version });
        } else {
            tracing::debug!(%address, %version, "fleet: node re-announced");
        }
    }

    /// Flip the node to Offline. True if this call made the transition.
    pub fn set_node_offline(&self, address: IpAddr) -> bool {
        let went_offline = match self.nodes.get_mut(&address) {
            Some(mut node) if node.state == NodeState::Online => {
                node.state = NodeState::Offline;
                true
            }
            _ => false,
        };
        if went_offline {
            tracing::info!(%address, "fleet: node offline");
            let _ = self.events.send(NodeEvent::Offline { address });
        }
        went_offline
    }

    /// Record a heartbeat acknowledgment. Does not change Online/Offline.
    pub fn received_ok(&self, address: IpAddr) -> bool {
        let Some(mut node) = self.nodes.get_mut(&address) else {
            tracing::debug!(%address, "fleet: ok from unknown node");
            return false;
        };
        node.last_ok = Some(Instant::now());
        drop(node);
        if self.waiting_for_responses.load(Ordering::Acquire) {
            self.sweep_acks.insert(address);
        }
        true
    }

    pub fn endpoint_exists(&self, address: IpAddr) -> bool {
        self.nodes.contains_key(&address)
    }

    pub fn get_node(&self, address: IpAddr) -> Option<NodeInfo> {
        self.nodes.get(&address).map(|n| n.value().clone())
    }

    /// Snapshot of every known node, online or not.
    pub fn get_nodes(&self) -> Vec<NodeInfo> {
        self.nodes.iter().map(|n| n.value().clone()).collect()
    }

    pub fn online_nodes(&self) -> Vec<NodeInfo> {
        self.nodes
            .iter()
            .filter(|n| n.is_online())
            .map(|n| n.value().clone())
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ========================================================================
    // Liveness sweep
    // ========================================================================

    pub fn is_sweep_in_flight(&self) -> bool {
        self.waiting_for_responses.load(Ordering::Acquire)
    }

    /// Ping every known node with `CheckNodes` and mark those that have not
    /// answered within the sweep window Offline.
    ///
    /// Returns `None` while another sweep is still in flight.
    pub fn start_wait_for_all_nodes_task(self: &Arc<Self>) -> Option<JoinHandle<SweepReport>> {
        if self
            .waiting_for_responses
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("sweep: already in flight, skipping");
            return None;
        }
        self.sweep_acks.clear();

        let targets: Vec<(IpAddr, SocketAddr)> = self
            .nodes
            .iter()
            .map(|n| (*n.key(), n.control_endpoint))
            .collect();

        let flag = SweepFlag(Arc::clone(self));
        Some(tokio::spawn(async move {
            let flag = flag;
            flag.0.run_sweep(targets).await
        }))
    }

    async fn run_sweep(&self, targets: Vec<(IpAddr, SocketAddr)>) -> SweepReport {
        let mut report = SweepReport {
            checked: targets.len(),
            ..Default::default()
        };

        for (address, endpoint) in &targets {
            if let Err(e) = self.send(&CheckNodes, *endpoint).await {
                tracing::warn!(%address, "sweep: check send failed: {e}");
            }
        }

        tokio::time::sleep(self.sweep_window).await;

        for (address, _) in targets {
            if self.sweep_acks.contains(&address) {
                report.acknowledged += 1;
            } else if self.set_node_offline(address) {
                report.went_offline.push(address);
            }
        }

        tracing::info!(
            checked = report.checked,
            acknowledged = report.acknowledged,
            went_offline = report.went_offline.len(),
            "sweep: complete"
        );
        report
    }

    // ========================================================================
    // Encryption relay
    // ========================================================================

    /// Relay a player's encryption parameters to the node hosting the server
    /// at `node_endpoint`, then wait up to `timeout` for the node to confirm.
    ///
    /// `Ok(false)` covers every ordinary failure: unknown or offline node, a
    /// relay already in flight for the same pair, or no confirmation in
    /// time. `Err` only when the frame cannot be encoded or the side channel
    /// is gone.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_and_await_player_encryption_received_from_node(
        &self,
        node_endpoint: SocketAddr,
        player_endpoint: SocketAddr,
        user_id: &str,
        user_name: &str,
        platform: Platform,
        random: &[u8],
        public_key: &[u8],
        timeout: Duration,
    ) -> Result<bool, CoordinatorError> {
        let Some(control_endpoint) = self.control_endpoint_of(node_endpoint.ip()) else {
            tracing::debug!(node = %node_endpoint, "relay: node unknown or offline");
            return Ok(false);
        };

        let key = (node_endpoint, player_endpoint);
        let Some((guard, acked)) = self.pending.register(key) else {
            tracing::debug!(node = %node_endpoint, player = %player_endpoint, "relay: already in flight");
            return Ok(false);
        };

        let request = Request::new(
            self.request_ids.next_id(),
            RelayPlayerEncryption {
                node_endpoint,
                player_endpoint,
                user_id: user_id.to_owned(),
                user_name: user_name.to_owned(),
                platform,
                random: random.to_vec(),
                public_key: public_key.to_vec(),
            },
        );
        self.send(&request, control_endpoint).await?;
        tracing::debug!(
            node = %node_endpoint,
            player = %player_endpoint,
            %user_id,
            request_id = request.request_id,
            key = %hex::encode(&public_key[..public_key.len().min(4)]),
            "relay: sent"
        );

        let confirmed = await_ack(guard, acked, timeout).await;
        if confirmed {
            tracing::debug!(node = %node_endpoint, player = %player_endpoint, "relay: confirmed");
        } else {
            tracing::info!(
                node = %node_endpoint,
                player = %player_endpoint,
                timeout_ms = timeout.as_millis() as u64,
                "relay: timed out"
            );
        }
        Ok(confirmed)
    }

    /// Node confirmed receipt. True if a relay was waiting for it; a late
    /// confirmation after timeout is a no-op.
    pub fn on_node_received_encryption_parameters(
        &self,
        node_endpoint: SocketAddr,
        player_endpoint: SocketAddr,
    ) -> bool {
        let resolved = self.pending.resolve(&(node_endpoint, player_endpoint));
        if !resolved {
            tracing::debug!(node = %node_endpoint, player = %player_endpoint, "relay: late or unmatched confirmation");
        }
        resolved
    }

    pub fn pending_relays(&self) -> usize {
        self.pending.len()
    }

    // ========================================================================
    // Instance creation
    // ========================================================================

    /// Ask the node owning `create.instance_endpoint` to start the instance,
    /// then wait up to `timeout` for `ServerCreated`. Same `Ok(false)` and
    /// `Err` contract as the encryption relay.
    pub async fn send_and_await_server_created_on_node(
        &self,
        create: CreateServer,
        timeout: Duration,
    ) -> Result<bool, CoordinatorError> {
        let instance = create.instance_endpoint;
        let Some(control_endpoint) = self.control_endpoint_of(instance.ip()) else {
            tracing::debug!(%instance, "create: node unknown or offline");
            return Ok(false);
        };

        let Some((guard, acked)) = self.creations.register(create.secret.clone()) else {
            tracing::debug!(%instance, "create: already in flight");
            return Ok(false);
        };

        let request = Request::new(self.request_ids.next_id(), create);
        self.send(&request, control_endpoint).await?;
        tracing::debug!(%instance, code = %request.body.code, request_id = request.request_id, "create: sent");

        let created = await_ack(guard, acked, timeout).await;
        if created {
            tracing::debug!(%instance, "create: confirmed");
        } else {
            tracing::info!(%instance, timeout_ms = timeout.as_millis() as u64, "create: timed out");
        }
        Ok(created)
    }

    /// Node reports the instance for `secret` is up. False when nothing was
    /// waiting for it.
    pub fn on_node_created_server(&self, secret: &str) -> bool {
        let resolved = self.creations.resolve(&secret.to_owned());
        if !resolved {
            tracing::debug!(%secret, "create: late or unmatched confirmation");
        }
        resolved
    }

    pub fn pending_creations(&self) -> usize {
        self.creations.len()
    }

    /// Side-channel address of the node at `address`, if it is online.
    fn control_endpoint_of(&self, address: IpAddr) -> Option<SocketAddr> {
        self.nodes
            .get(&address)
            .filter(|node| node.is_online())
            .map(|node| node.control_endpoint)
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Encode `message` and queue it for `target`.
    pub async fn send<M: Message>(&self, message: &M, target: SocketAddr) -> Result<(), CoordinatorError> {
        let payload = self.encode(message).await?;
        self.outbound
            .send(Datagram { payload, target })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)
    }

    async fn encode<M: Message>(&self, message: &M) -> Result<Bytes, CoordinatorError> {
        let mut buf = BytesMut::new();
        self.codec.lock().await.write_to(message, &mut buf)?;
        Ok(buf.freeze())
    }
}

/// Wait for the node's acknowledgment. On timeout the entry is withdrawn,
/// unless an acknowledgment removed it first, in which case that one wins.
async fn await_ack<K: std::hash::Hash + Eq + Clone>(
    guard: PendingGuard<'_, K>,
    acked: oneshot::Receiver<()>,
    timeout: Duration,
) -> bool {
    match tokio::time::timeout(timeout, acked).await {
        Ok(result) => result.is_ok(),
        Err(_) => !guard.withdraw(),
    }
}
