//! Node side channel -- one UDP socket shared by a receive loop and a send
//! loop.
//!
//! Receive: decode each datagram with the node message registry and apply
//! it to the coordinator (fleet state, relay confirmations) or the registry
//! (server lifecycle reports). The transport is unreliable, so a datagram
//! that fails to decode is logged and dropped.
//!
//! Send: drain the coordinator's outbound queue onto the socket.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use encore_coordinator::{Datagram, NodeCoordinator};
use encore_protocol::{node_registry, MessageCodec, NodeMessage};
use encore_registry::ServerRegistry;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Decoder;

/// Large enough for any frame this protocol allows.
const RECV_BUFFER: usize = 1536;

/// Run the receive loop until shutdown.
pub async fn run_receive_loop(
    socket: Arc<UdpSocket>,
    coordinator: Arc<NodeCoordinator>,
    registry: ServerRegistry,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut codec = MessageCodec::new(Arc::new(node_registry()));
    let mut buf = vec![0u8; RECV_BUFFER];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, src)) => {
                        let mut frame = BytesMut::from(&buf[..len]);
                        decode_datagram(&mut codec, &mut frame, src, &coordinator, &registry);
                    }
                    Err(e) => {
                        // ICMP port-unreachable surfaces here on some platforms
                        tracing::debug!("side: recv failed: {e}");
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("side: receive loop shutting down");
                return;
            }
        }
    }
}

/// Run the send loop until shutdown or until every outbound sender is gone.
pub async fn run_send_loop(
    socket: Arc<UdpSocket>,
    mut outbound: mpsc::Receiver<Datagram>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(datagram) = next else {
                    tracing::info!("side: outbound queue closed");
                    return;
                };
                if let Err(e) = socket.send_to(&datagram.payload, datagram.target).await {
                    tracing::warn!(target = %datagram.target, "side: send failed: {e}");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("side: send loop shutting down");
                return;
            }
        }
    }
}

/// Decode every frame in one datagram, stopping at the first bad one.
fn decode_datagram(
    codec: &mut MessageCodec<NodeMessage>,
    frame: &mut BytesMut,
    src: SocketAddr,
    coordinator: &NodeCoordinator,
    registry: &ServerRegistry,
) {
    while !frame.is_empty() {
        match codec.decode(frame) {
            Ok(Some(message)) => dispatch(message, src, coordinator, registry),
            Ok(None) => {
                tracing::debug!(%src, leftover = frame.len(), "side: truncated datagram dropped");
                return;
            }
            Err(e) => {
                tracing::debug!(%src, "side: undecodable datagram dropped: {e}");
                return;
            }
        }
    }
}

/// Apply one inbound node message.
pub fn dispatch(
    message: NodeMessage,
    src: SocketAddr,
    coordinator: &NodeCoordinator,
    registry: &ServerRegistry,
) {
    match message {
        NodeMessage::NodeOnline(m) => coordinator.set_node_online(src, m.version),
        NodeMessage::NodeShutdown(_) => {
            coordinator.set_node_offline(src.ip());
        }
        NodeMessage::NodeOk(_) => {
            coordinator.received_ok(src.ip());
        }
        NodeMessage::PlayerEncryptionReceived(response) => {
            coordinator.on_node_received_encryption_parameters(
                response.body.node_endpoint,
                response.body.player_endpoint,
            );
        }
        NodeMessage::ServerCreated(response) => {
            coordinator.on_node_created_server(&response.body.secret);
        }
        NodeMessage::ServerClosed(m) => {
            if registry.remove_server(&m.secret) {
                tracing::info!(%src, secret = %short(&m.secret), "side: server closed");
            }
        }
        NodeMessage::PlayerJoined(m) => {
            if !registry.increment_current_player_count(&m.secret) {
                tracing::debug!(%src, secret = %short(&m.secret), "side: join for unknown server");
            }
        }
        NodeMessage::PlayerLeft(m) => {
            if !registry.decrement_current_player_count(&m.secret) {
                tracing::debug!(%src, secret = %short(&m.secret), "side: leave for unknown server");
            }
        }
        NodeMessage::PlayerCountChanged(m) => {
            registry.update_current_player_count(&m.secret, m.count);
        }
        NodeMessage::GameplayStateChanged(m) => {
            registry.update_server_gameplay_state(&m.secret, m.in_gameplay);
        }
        NodeMessage::CheckNodes(_)
        | NodeMessage::RelayPlayerEncryption(_)
        | NodeMessage::CreateServer(_) => {
            tracing::debug!(%src, "side: ignoring master-bound message from node");
        }
    }
}

/// Short hex prefix of a secret for logs.
fn short(secret: &str) -> String {
    hex::encode(&secret.as_bytes()[..secret.len().min(4)])
}
