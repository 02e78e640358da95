//! Encore Protocol -- wire framing, message registry, node messages.
//!
//! Every datagram between master, nodes and clients is one frame:
//!   u32 group id (LE) | varint protocol version | varint payload length | payload
//! where payload = varint message type id | message body.

pub mod codec;
pub mod message;
pub mod messages;
pub mod params;
pub mod registry;
pub mod varint;
pub mod wire;

pub use codec::MessageCodec;
pub use message::{Message, Reliable, Request, RequestIdGenerator, Response};
pub use messages::*;
pub use params::{ProtocolParams, DEFAULT_PARAMS};
pub use registry::{MessageGroup, MessageRegistry};

/// Protocol version written into every frame (sourced from default params).
pub const PROTOCOL_VERSION: u32 = DEFAULT_PARAMS.protocol_version;

/// Upper bound for an encoded payload (type id + body).
pub const MAX_PAYLOAD_BYTES: usize = DEFAULT_PARAMS.max_payload_bytes;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message of type '{type_name}' does not exist in the message registry")]
    UnregisteredMessage { type_name: &'static str },
    #[error("unknown message type id {id} in group {group:#010x}")]
    UnknownMessageType { group: u32, id: u32 },
    #[error("unexpected message group: expected {expected:#010x}, got {got:#010x}")]
    UnexpectedGroup { expected: u32, got: u32 },
    #[error("version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("truncated input")]
    Truncated,
    #[error("varint overflow")]
    VarintOverflow,
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
