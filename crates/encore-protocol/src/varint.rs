//! Unsigned LEB128 varints: 7 payload bits per byte, low groups first,
//! high bit set on every byte except the last.

use bytes::{Buf, BufMut};

use crate::ProtocolError;

/// Longest encoding of a u64.
pub const MAX_VARINT_LEN: usize = 10;

/// Write `value` as a varint.
pub fn put_varint<B: BufMut + ?Sized>(dst: &mut B, mut value: u64) {
    while value >= 0x80 {
        dst.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// Read a varint. Returns `Truncated` if the input ends mid-value.
pub fn get_varint<B: Buf + ?Sized>(src: &mut B) -> Result<u64, ProtocolError> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        if !src.has_remaining() {
            return Err(ProtocolError::Truncated);
        }
        let byte = src.get_u8();
        let bits = (byte & 0x7f) as u64;
        if shift == 63 && bits > 1 {
            return Err(ProtocolError::VarintOverflow);
        }
        result |= bits << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift > 63 {
            return Err(ProtocolError::VarintOverflow);
        }
    }
}

/// Read a varint that must fit in 32 bits.
pub fn get_varint_u32<B: Buf + ?Sized>(src: &mut B) -> Result<u32, ProtocolError> {
    let value = get_varint(src)?;
    u32::try_from(value).map_err(|_| ProtocolError::VarintOverflow)
}

/// Encoded length of `value` in bytes.
pub fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}
