//! Frame codec for datagrams and byte streams.
//!
//! Wire format: u32 group id (LE) | varint protocol version |
//! varint payload length | payload (varint type id | body).
//!
//! Encoding is two-phase: the payload is rendered into a bounded scratch
//! buffer first so its length is known before the outer header is written.

use std::any::type_name;
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::message::Message;
use crate::registry::MessageRegistry;
use crate::varint::{get_varint_u32, put_varint, MAX_VARINT_LEN};
use crate::{ProtocolError, MAX_PAYLOAD_BYTES};

/// Group id size in bytes.
const GROUP_ID_SIZE: usize = 4;

/// Codec framing messages of one group. `E` is the group's message enum.
pub struct MessageCodec<E> {
    registry: Arc<MessageRegistry<E>>,
    scratch: BytesMut,
    max_payload: usize,
}

impl<E> MessageCodec<E> {
    pub fn new(registry: Arc<MessageRegistry<E>>) -> Self {
        Self::with_max_payload(registry, MAX_PAYLOAD_BYTES)
    }

    pub fn with_max_payload(registry: Arc<MessageRegistry<E>>, max_payload: usize) -> Self {
        Self {
            registry,
            scratch: BytesMut::with_capacity(max_payload),
            max_payload,
        }
    }

    pub fn registry(&self) -> &Arc<MessageRegistry<E>> {
        &self.registry
    }

    /// Frame `message` into `dst`.
    pub fn write_to<M: Message>(
        &mut self,
        message: &M,
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        let id = self
            .registry
            .message_id::<M>()
            .ok_or(ProtocolError::UnregisteredMessage {
                type_name: type_name::<M>(),
            })?;

        // Phase 1: render type id + body to learn the payload length
        self.scratch.clear();
        put_varint(&mut self.scratch, id as u64);
        message.write_to(&mut self.scratch);

        let size = self.scratch.len();
        if size > self.max_payload {
            self.scratch.clear();
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_payload,
            });
        }

        // Phase 2: outer header, then payload
        dst.reserve(GROUP_ID_SIZE + 2 * MAX_VARINT_LEN + size);
        dst.put_u32_le(self.registry.group().0);
        put_varint(dst, self.registry.protocol_version() as u64);
        put_varint(dst, size as u64);
        dst.extend_from_slice(&self.scratch);
        Ok(())
    }

    /// Parse the frame header. `Ok(None)` means more input is needed.
    fn read_header(&self, src: &[u8]) -> Result<Option<(usize, usize)>, ProtocolError> {
        let mut cursor = src;
        if cursor.len() < GROUP_ID_SIZE {
            return Ok(None);
        }

        let group = cursor.get_u32_le();
        if group != self.registry.group().0 {
            return Err(ProtocolError::UnexpectedGroup {
                expected: self.registry.group().0,
                got: group,
            });
        }

        let version = match get_varint_u32(&mut cursor) {
            Ok(v) => v,
            Err(ProtocolError::Truncated) => return Ok(None),
            Err(e) => return Err(e),
        };
        if version != self.registry.protocol_version() {
            return Err(ProtocolError::VersionMismatch {
                expected: self.registry.protocol_version(),
                got: version,
            });
        }

        let length = match get_varint_u32(&mut cursor) {
            Ok(v) => v as usize,
            Err(ProtocolError::Truncated) => return Ok(None),
            Err(e) => return Err(e),
        };
        if length > self.max_payload {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: self.max_payload,
            });
        }

        Ok(Some((src.len() - cursor.len(), length)))
    }
}

impl<E, M: Message> Encoder<M> for MessageCodec<E> {
    type Error = ProtocolError;

    fn encode(&mut self, item: M, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.write_to(&item, dst)
    }
}

impl<E> Decoder for MessageCodec<E> {
    type Item = E;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((header_len, length)) = self.read_header(src)? else {
            return Ok(None);
        };

        // Check if we have the full payload
        let total = header_len + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let mut payload = src.split_to(length).freeze();

        let id = get_varint_u32(&mut payload)?;
        let message = self.registry.decode(id, &mut payload)?;
        if payload.has_remaining() {
            tracing::debug!(
                group = %self.registry.group(),
                id,
                trailing = payload.remaining(),
                "codec: ignoring trailing payload bytes"
            );
        }
        Ok(Some(message))
    }
}
