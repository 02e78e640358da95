//! Message registry -- bidirectional type <-> id mapping scoped to one group.
//!
//! Write side: concrete message type -> numeric id.
//! Read side: numeric id -> decoder producing the group's message enum.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;

use crate::message::Message;
use crate::ProtocolError;

/// Namespace of message type ids, written as the first frame field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageGroup(pub u32);

impl MessageGroup {
    /// Master <-> node side channel ("NODE").
    pub const NODE: MessageGroup = MessageGroup(0x4E4F_4445);
}

impl fmt::Display for MessageGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

type DecodeFn<E> = Box<dyn Fn(&mut Bytes) -> Result<E, ProtocolError> + Send + Sync>;

struct Entry<E> {
    name: &'static str,
    decode: DecodeFn<E>,
}

/// Registry for one message group; `E` is the group's decoded message enum.
pub struct MessageRegistry<E> {
    group: MessageGroup,
    protocol_version: u32,
    ids: HashMap<TypeId, u32>,
    entries: HashMap<u32, Entry<E>>,
}

impl<E: 'static> MessageRegistry<E> {
    pub fn new(group: MessageGroup, protocol_version: u32) -> Self {
        Self {
            group,
            protocol_version,
            ids: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    /// Register `M` under `id`; `wrap` lifts a decoded `M` into the group enum.
    ///
    /// # Panics
    ///
    /// If `id` or `M` is already registered. Registries are built once at
    /// startup, so a clash is a programming error.
    pub fn register<M: Message>(mut self, id: u32, wrap: fn(M) -> E) -> Self {
        assert!(
            !self.entries.contains_key(&id),
            "message id {id} registered twice in group {}",
            self.group
        );
        assert!(
            self.ids.insert(TypeId::of::<M>(), id).is_none(),
            "message type {} registered twice in group {}",
            type_name::<M>(),
            self.group
        );
        self.entries.insert(
            id,
            Entry {
                name: type_name::<M>(),
                decode: Box::new(move |src| M::read_from(src).map(wrap)),
            },
        );
        self
    }
}

impl<E> MessageRegistry<E> {
    pub fn group(&self) -> MessageGroup {
        self.group
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Id registered for `M`, if any.
    pub fn message_id<M: Message>(&self) -> Option<u32> {
        self.ids.get(&TypeId::of::<M>()).copied()
    }

    /// Type name registered under `id` (for logging).
    pub fn message_name(&self, id: u32) -> Option<&'static str> {
        self.entries.get(&id).map(|e| e.name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode a body whose type id has already been read.
    pub fn decode(&self, id: u32, src: &mut Bytes) -> Result<E, ProtocolError> {
        let entry = self
            .entries
            .get(&id)
            .ok_or(ProtocolError::UnknownMessageType {
                group: self.group.0,
                id,
            })?;
        (entry.decode)(src)
    }
}

impl<E> fmt::Debug for MessageRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRegistry")
            .field("group", &self.group)
            .field("protocol_version", &self.protocol_version)
            .field("messages", &self.entries.len())
            .finish()
    }
}
