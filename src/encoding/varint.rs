use bytes::{Buf, BufMut};

use crate::error::{Error, ErrorCode, Result};

/// Encodes an integer value into LEB128 variable length format, and writes it
/// to the buffer. The buffer must have enough remaining space (maximum 10
/// bytes).
#[inline]
pub fn encode_varint(mut value: u64, buf: &mut impl BufMut) {
    // Varints are never more than 10 bytes.
    for _ in 0..10 {
        if value < 0x80 {
            buf.put_u8(value as u8);
            break;
        } else {
            buf.put_u8(((value & 0x7F) | 0x80) as u8);
            value >>= 7;
        }
    }
}

/// Returns the encoded length of the value in LEB128 variable length format.
/// The returned value will be between 1 and 10, inclusive.
#[inline]
pub fn encoded_len_varint(value: u64) -> usize {
    ((((value | 1).leading_zeros() ^ 63) * 9 + 73) / 64) as usize
}

/// Decodes a LEB128-encoded variable length integer from the buffer.
///
/// An empty buffer reports [`ErrorCode::PrematureEof`]; a continuation run
/// that never terminates within 10 bytes, or that runs off the end of a
/// non-empty buffer, reports [`ErrorCode::UnterminatedVarint`].
#[inline]
pub fn decode_varint(buf: &mut impl Buf) -> Result<u64> {
    if !buf.has_remaining() {
        return Err(Error::new(
            ErrorCode::PrematureEof,
            "expected varint, found end of input",
        ));
    }
    let mut value = 0u64;
    for i in 0..10 {
        if !buf.has_remaining() {
            return Err(Error::new(
                ErrorCode::UnterminatedVarint,
                "varint continues past end of input",
            ));
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7F) << (i * 7);
        if byte < 0x80 {
            return Ok(value);
        }
    }
    Err(Error::new(
        ErrorCode::UnterminatedVarint,
        "varint exceeds 10 bytes",
    ))
}

/// Decodes a varint from the front of `bytes` without consuming it.
///
/// Returns `Ok(None)` when the slice holds only a partial encoding, so a
/// resumable caller can wait for more input. A run of 10 continuation bytes
/// is unconditionally an error.
#[inline]
pub fn peek_varint(bytes: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value = 0u64;
    for (i, &byte) in bytes.iter().take(10).enumerate() {
        value |= u64::from(byte & 0x7F) << (i * 7);
        if byte < 0x80 {
            return Ok(Some((value, i + 1)));
        }
    }
    if bytes.len() >= 10 {
        return Err(Error::new(
            ErrorCode::UnterminatedVarint,
            "varint exceeds 10 bytes",
        ));
    }
    Ok(None)
}
