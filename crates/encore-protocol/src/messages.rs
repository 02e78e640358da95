//! Node side-channel messages (group `MessageGroup::NODE`).
//!
//! Node -> master: online/shutdown notices, heartbeat acks, encryption
//! receipt, instance creation acks, and server lifecycle events.
//! Master -> node: sweep checks, instance creation, and the player
//! encryption relay.

use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::message::{Message, Request, Response};
use crate::registry::{MessageGroup, MessageRegistry};
use crate::wire::{WireRead, WireWrite};
use crate::{ProtocolError, PROTOCOL_VERSION};

/// Player platform, one byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Platform {
    Test = 0,
    OculusRift = 1,
    OculusQuest = 2,
    Steam = 3,
    PS4 = 4,
}

impl TryFrom<u8> for Platform {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Platform::Test),
            1 => Ok(Platform::OculusRift),
            2 => Ok(Platform::OculusQuest),
            3 => Ok(Platform::Steam),
            4 => Ok(Platform::PS4),
            other => Err(ProtocolError::InvalidField {
                field: "platform",
                reason: format!("unknown platform {other}"),
            }),
        }
    }
}

// ============================================================================
// Fleet liveness
// ============================================================================

/// Node announces itself (first contact or restart).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOnline {
    pub version: String,
}

impl Message for NodeOnline {
    fn write_to(&self, dst: &mut BytesMut) {
        dst.put_string(&self.version);
    }

    fn read_from(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            version: src.read_string("version")?,
        })
    }
}

/// Node is going away cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeShutdown;

/// Sweep check; every node must answer with `NodeOk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckNodes;

/// Heartbeat ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeOk;

macro_rules! empty_message {
    ($($ty:ident),*) => {
        $(
            impl Message for $ty {
                fn write_to(&self, _dst: &mut BytesMut) {}

                fn read_from(_src: &mut Bytes) -> Result<Self, ProtocolError> {
                    Ok($ty)
                }
            }
        )*
    };
}

empty_message!(NodeShutdown, CheckNodes, NodeOk);

// ============================================================================
// Player encryption relay
// ============================================================================

/// Handshake material of a joining player, relayed to the hosting node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPlayerEncryption {
    /// Endpoint of the game server instance on the node.
    pub node_endpoint: SocketAddr,
    pub player_endpoint: SocketAddr,
    pub user_id: String,
    pub user_name: String,
    pub platform: Platform,
    pub random: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl Message for RelayPlayerEncryption {
    fn write_to(&self, dst: &mut BytesMut) {
        dst.put_endpoint(&self.node_endpoint);
        dst.put_endpoint(&self.player_endpoint);
        dst.put_string(&self.user_id);
        dst.put_string(&self.user_name);
        dst.put_u8(self.platform as u8);
        dst.put_var_bytes(&self.random);
        dst.put_var_bytes(&self.public_key);
    }

    fn read_from(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            node_endpoint: src.read_endpoint("node_endpoint")?,
            player_endpoint: src.read_endpoint("player_endpoint")?,
            user_id: src.read_string("user_id")?,
            user_name: src.read_string("user_name")?,
            platform: Platform::try_from(src.read_u8()?)?,
            random: src.read_var_bytes()?,
            public_key: src.read_var_bytes()?,
        })
    }
}

/// Node confirms it stored a player's encryption parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEncryptionReceived {
    pub node_endpoint: SocketAddr,
    pub player_endpoint: SocketAddr,
}

impl Message for PlayerEncryptionReceived {
    fn write_to(&self, dst: &mut BytesMut) {
        dst.put_endpoint(&self.node_endpoint);
        dst.put_endpoint(&self.player_endpoint);
    }

    fn read_from(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            node_endpoint: src.read_endpoint("node_endpoint")?,
            player_endpoint: src.read_endpoint("player_endpoint")?,
        })
    }
}

// ============================================================================
// Server provisioning
// ============================================================================

/// Master asks a node to start an instance. Enum-valued settings travel as
/// their one-byte discriminants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateServer {
    pub secret: String,
    pub code: String,
    /// Endpoint the instance must listen on.
    pub instance_endpoint: SocketAddr,
    pub host_user_id: String,
    pub max_player_count: i32,
    pub discovery_policy: u8,
    pub invite_policy: u8,
    pub gameplay_server_mode: u8,
    pub song_selection_mode: u8,
    pub control_settings: u8,
    pub difficulties: u8,
    pub modifiers: u16,
    pub song_packs_top: u64,
    pub song_packs_bottom: u64,
}

impl Message for CreateServer {
    fn write_to(&self, dst: &mut BytesMut) {
        dst.put_string(&self.secret);
        dst.put_string(&self.code);
        dst.put_endpoint(&self.instance_endpoint);
        dst.put_string(&self.host_user_id);
        dst.put_var_u32(self.max_player_count as u32);
        dst.put_u8(self.discovery_policy);
        dst.put_u8(self.invite_policy);
        dst.put_u8(self.gameplay_server_mode);
        dst.put_u8(self.song_selection_mode);
        dst.put_u8(self.control_settings);
        dst.put_u8(self.difficulties);
        dst.put_var_u32(self.modifiers as u32);
        dst.put_u64_le(self.song_packs_top);
        dst.put_u64_le(self.song_packs_bottom);
    }

    fn read_from(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            secret: src.read_string("secret")?,
            code: src.read_string("code")?,
            instance_endpoint: src.read_endpoint("instance_endpoint")?,
            host_user_id: src.read_string("host_user_id")?,
            max_player_count: src.read_var_u32()? as i32,
            discovery_policy: src.read_u8()?,
            invite_policy: src.read_u8()?,
            gameplay_server_mode: src.read_u8()?,
            song_selection_mode: src.read_u8()?,
            control_settings: src.read_u8()?,
            difficulties: src.read_u8()?,
            modifiers: u16::try_from(src.read_var_u32()?).map_err(|_| {
                ProtocolError::InvalidField {
                    field: "modifiers",
                    reason: "does not fit 16 bits".into(),
                }
            })?,
            song_packs_top: src.read_u64_le()?,
            song_packs_bottom: src.read_u64_le()?,
        })
    }
}

/// Node confirms the instance for `secret` is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCreated {
    pub secret: String,
}

impl Message for ServerCreated {
    fn write_to(&self, dst: &mut BytesMut) {
        dst.put_string(&self.secret);
    }

    fn read_from(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            secret: src.read_string("secret")?,
        })
    }
}

// ============================================================================
// Server lifecycle events
// ============================================================================

macro_rules! secret_message {
    ($($(#[$doc:meta])* $ty:ident),*) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, PartialEq, Eq)]
            pub struct $ty {
                pub secret: String,
            }

            impl Message for $ty {
                fn write_to(&self, dst: &mut BytesMut) {
                    dst.put_string(&self.secret);
                }

                fn read_from(src: &mut Bytes) -> Result<Self, ProtocolError> {
                    Ok(Self {
                        secret: src.read_string("secret")?,
                    })
                }
            }
        )*
    };
}

secret_message!(
    /// Instance stopped on the node.
    ServerClosed,
    /// A player finished connecting to the instance.
    PlayerJoined,
    /// A player left the instance.
    PlayerLeft
);

/// Authoritative player count reported by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerCountChanged {
    pub secret: String,
    pub count: i32,
}

impl Message for PlayerCountChanged {
    fn write_to(&self, dst: &mut BytesMut) {
        dst.put_string(&self.secret);
        dst.put_var_u32(self.count as u32);
    }

    fn read_from(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            secret: src.read_string("secret")?,
            count: src.read_var_u32()? as i32,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameplayStateChanged {
    pub secret: String,
    pub in_gameplay: bool,
}

impl Message for GameplayStateChanged {
    fn write_to(&self, dst: &mut BytesMut) {
        dst.put_string(&self.secret);
        dst.put_bool(self.in_gameplay);
    }

    fn read_from(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            secret: src.read_string("secret")?,
            in_gameplay: src.read_bool()?,
        })
    }
}

// ============================================================================
// Group registry
// ============================================================================

/// Every message of the node group, as produced by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeMessage {
    NodeOnline(NodeOnline),
    NodeShutdown(NodeShutdown),
    CheckNodes(CheckNodes),
    NodeOk(NodeOk),
    RelayPlayerEncryption(Request<RelayPlayerEncryption>),
    PlayerEncryptionReceived(Response<PlayerEncryptionReceived>),
    ServerClosed(ServerClosed),
    PlayerJoined(PlayerJoined),
    PlayerLeft(PlayerLeft),
    PlayerCountChanged(PlayerCountChanged),
    GameplayStateChanged(GameplayStateChanged),
    CreateServer(Request<CreateServer>),
    ServerCreated(Response<ServerCreated>),
}

/// Build the registry for `MessageGroup::NODE`.
pub fn node_registry() -> MessageRegistry<NodeMessage> {
    MessageRegistry::new(MessageGroup::NODE, PROTOCOL_VERSION)
        .register::<NodeOnline>(1, NodeMessage::NodeOnline)
        .register::<NodeShutdown>(2, NodeMessage::NodeShutdown)
        .register::<CheckNodes>(3, NodeMessage::CheckNodes)
        .register::<NodeOk>(4, NodeMessage::NodeOk)
        .register::<Request<RelayPlayerEncryption>>(5, NodeMessage::RelayPlayerEncryption)
        .register::<Response<PlayerEncryptionReceived>>(6, NodeMessage::PlayerEncryptionReceived)
        .register::<ServerClosed>(7, NodeMessage::ServerClosed)
        .register::<PlayerJoined>(8, NodeMessage::PlayerJoined)
        .register::<PlayerLeft>(9, NodeMessage::PlayerLeft)
        .register::<PlayerCountChanged>(10, NodeMessage::PlayerCountChanged)
        .register::<GameplayStateChanged>(11, NodeMessage::GameplayStateChanged)
        .register::<Request<CreateServer>>(12, NodeMessage::CreateServer)
        .register::<Response<ServerCreated>>(13, NodeMessage::ServerCreated)
}
