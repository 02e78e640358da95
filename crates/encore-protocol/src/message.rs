//! Message trait and the reliable request/response capability.
//!
//! Reliability is composition, not a base type: any body `M` becomes a
//! reliable request as `Request<M>` (request id, then body) or a reliable
//! response as `Response<M>` (request id, response id, then body).

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{BufMut, Bytes, BytesMut};

use crate::wire::WireRead;
use crate::ProtocolError;

/// A type that can be carried in a frame payload after its type id.
pub trait Message: Send + Sync + 'static {
    /// Append the message body.
    fn write_to(&self, dst: &mut BytesMut);

    /// Read the message body, consuming exactly what `write_to` produced.
    fn read_from(src: &mut Bytes) -> Result<Self, ProtocolError>
    where
        Self: Sized;
}

/// Correlation ids carried by reliable messages.
pub trait Reliable {
    /// Id assigned by the sender of this message.
    fn request_id(&self) -> u32;
    /// For responses, the request id being answered.
    fn response_id(&self) -> Option<u32>;
}

/// Reliable request: `request_id` then the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<M> {
    pub request_id: u32,
    pub body: M,
}

impl<M> Request<M> {
    pub fn new(request_id: u32, body: M) -> Self {
        Self { request_id, body }
    }

    /// Build the response answering this request.
    pub fn reply<R>(&self, request_id: u32, body: R) -> Response<R> {
        Response {
            request_id,
            response_id: self.request_id,
            body,
        }
    }
}

impl<M> Reliable for Request<M> {
    fn request_id(&self) -> u32 {
        self.request_id
    }

    fn response_id(&self) -> Option<u32> {
        None
    }
}

impl<M: Message> Message for Request<M> {
    fn write_to(&self, dst: &mut BytesMut) {
        dst.put_u32_le(self.request_id);
        self.body.write_to(dst);
    }

    fn read_from(src: &mut Bytes) -> Result<Self, ProtocolError> {
        let request_id = src.read_u32_le()?;
        let body = M::read_from(src)?;
        Ok(Self { request_id, body })
    }
}

/// Reliable response: `request_id`, `response_id`, then the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<M> {
    pub request_id: u32,
    pub response_id: u32,
    pub body: M,
}

impl<M> Reliable for Response<M> {
    fn request_id(&self) -> u32 {
        self.request_id
    }

    fn response_id(&self) -> Option<u32> {
        Some(self.response_id)
    }
}

impl<M: Message> Message for Response<M> {
    fn write_to(&self, dst: &mut BytesMut) {
        dst.put_u32_le(self.request_id);
        dst.put_u32_le(self.response_id);
        self.body.write_to(dst);
    }

    fn read_from(src: &mut Bytes) -> Result<Self, ProtocolError> {
        let request_id = src.read_u32_le()?;
        let response_id = src.read_u32_le()?;
        let body = M::read_from(src)?;
        Ok(Self {
            request_id,
            response_id,
            body,
        })
    }
}

/// Hands out request ids for one sender. Wraps at `u32::MAX`.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    last: AtomicU32,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u32 {
        self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::NodeOnline;

    #[test]
    fn test_request_writes_request_id_first() {
        let req = Request::new(
            0x0102_0304,
            NodeOnline {
                version: "1.0".into(),
            },
        );
        let mut buf = BytesMut::new();
        req.write_to(&mut buf);
        assert_eq!(&buf[..4], &[0x04, 0x03, 0x02, 0x01]);

        let decoded = Request::<NodeOnline>::read_from(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(decoded.response_id(), None);
    }

    #[test]
    fn test_reply_carries_request_id_as_response_id() {
        let req = Request::new(7, NodeOnline { version: "a".into() });
        let resp = req.reply(99, NodeOnline { version: "b".into() });
        assert_eq!(resp.request_id(), 99);
        assert_eq!(resp.response_id(), Some(7));

        let mut buf = BytesMut::new();
        resp.write_to(&mut buf);
        let decoded = Response::<NodeOnline>::read_from(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn test_truncated_response_header() {
        let mut src = Bytes::from_static(&[1, 0, 0, 0, 2]);
        assert!(matches!(
            Response::<NodeOnline>::read_from(&mut src),
            Err(ProtocolError::Truncated)
        ));
    }

    #[test]
    fn test_request_ids_are_distinct_and_wrap() {
        let ids = RequestIdGenerator::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);

        let ids = RequestIdGenerator {
            last: AtomicU32::new(u32::MAX),
        };
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 1);
    }
}
