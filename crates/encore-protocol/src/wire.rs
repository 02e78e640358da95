//! Body primitives shared by every message: checked fixed-width reads,
//! length-prefixed strings and byte arrays, endpoints.

use std::net::{IpAddr, SocketAddr};

use bytes::{Buf, BufMut};

use crate::varint::{get_varint, get_varint_u32, put_varint};
use crate::ProtocolError;

/// Write helpers, available on every `BufMut`.
pub trait WireWrite: BufMut {
    fn put_var_u32(&mut self, value: u32) {
        put_varint(self, value as u64);
    }

    fn put_bool(&mut self, value: bool) {
        self.put_u8(value as u8);
    }

    /// Varint byte length, then UTF-8 bytes.
    fn put_string(&mut self, value: &str) {
        self.put_var_bytes(value.as_bytes());
    }

    /// Varint length, then raw bytes.
    fn put_var_bytes(&mut self, value: &[u8]) {
        put_varint(self, value.len() as u64);
        self.put_slice(value);
    }

    /// Address as its string form, then varint port.
    fn put_endpoint(&mut self, value: &SocketAddr) {
        self.put_string(&value.ip().to_string());
        self.put_var_u32(value.port() as u32);
    }
}

impl<B: BufMut + ?Sized> WireWrite for B {}

/// Read helpers, available on every `Buf`. All reads are bounds-checked.
pub trait WireRead: Buf {
    fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        if self.remaining() < 1 {
            return Err(ProtocolError::Truncated);
        }
        Ok(self.get_u8())
    }

    fn read_u32_le(&mut self) -> Result<u32, ProtocolError> {
        if self.remaining() < 4 {
            return Err(ProtocolError::Truncated);
        }
        Ok(self.get_u32_le())
    }

    fn read_u64_le(&mut self) -> Result<u64, ProtocolError> {
        if self.remaining() < 8 {
            return Err(ProtocolError::Truncated);
        }
        Ok(self.get_u64_le())
    }

    fn read_var_u32(&mut self) -> Result<u32, ProtocolError> {
        get_varint_u32(self)
    }

    fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    fn read_var_bytes(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = get_varint(self)? as usize;
        if self.remaining() < len {
            return Err(ProtocolError::Truncated);
        }
        let mut out = vec![0u8; len];
        self.copy_to_slice(&mut out);
        Ok(out)
    }

    fn read_string(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let raw = self.read_var_bytes()?;
        String::from_utf8(raw).map_err(|e| ProtocolError::InvalidField {
            field,
            reason: e.to_string(),
        })
    }

    fn read_endpoint(&mut self, field: &'static str) -> Result<SocketAddr, ProtocolError> {
        let ip: IpAddr = self
            .read_string(field)?
            .parse()
            .map_err(|e: std::net::AddrParseError| ProtocolError::InvalidField {
                field,
                reason: e.to_string(),
            })?;
        let port = self.read_var_u32()?;
        let port = u16::try_from(port).map_err(|_| ProtocolError::InvalidField {
            field,
            reason: format!("port {port} out of range"),
        })?;
        Ok(SocketAddr::new(ip, port))
    }
}

impl<B: Buf + ?Sized> WireRead for B {}
