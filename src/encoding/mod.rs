//! Low-level wire-format helpers shared by the decoder, the push parser,
//! and the encoder.

use bytes::{Buf, BufMut};

use crate::error::{Error, ErrorCode, Result};

pub mod varint;
pub use varint::{decode_varint, encode_varint, encoded_len_varint, peek_varint};

pub mod wire_type;
pub use wire_type::{check_wire_type, WireType};

pub const MIN_FIELD_NUMBER: u32 = 1;
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// Encodes a Protobuf field key, which consists of a wire type designator and
/// the field number.
#[inline]
pub fn encode_key(number: u32, wire_type: WireType, buf: &mut impl BufMut) {
    debug_assert!((MIN_FIELD_NUMBER..=MAX_FIELD_NUMBER).contains(&number));
    let key = (number << 3) | wire_type as u32;
    encode_varint(u64::from(key), buf);
}

/// Decodes a Protobuf field key, which consists of a wire type designator and
/// the field number.
#[inline]
pub fn decode_key(buf: &mut impl Buf) -> Result<(u32, WireType)> {
    let key = decode_varint(buf)?;
    split_key(key)
}

/// Decodes a field key from the front of `bytes` without consuming it.
/// `Ok(None)` means the key is split across a buffer boundary.
#[inline]
pub fn peek_key(bytes: &[u8]) -> Result<Option<(u32, WireType, usize)>> {
    match peek_varint(bytes)? {
        None => Ok(None),
        Some((key, len)) => {
            let (number, wire_type) = split_key(key)?;
            Ok(Some((number, wire_type, len)))
        }
    }
}

/// Splits a raw key varint into field number and wire type.
#[inline]
pub fn split_key(key: u64) -> Result<(u32, WireType)> {
    if key > u64::from(u32::MAX) {
        return Err(Error::new(
            ErrorCode::BadWireType,
            format!("invalid key value: {}", key),
        ));
    }
    let wire_type = WireType::try_from(key & 0x07)?;
    let number = key as u32 >> 3;
    if number < MIN_FIELD_NUMBER {
        return Err(Error::new(
            ErrorCode::BadWireType,
            "field number must be positive",
        ));
    }
    Ok((number, wire_type))
}

/// Returns the width of an encoded Protobuf field key with the given number.
/// The returned width will be between 1 and 5 bytes (inclusive).
#[inline]
pub fn key_len(number: u32) -> usize {
    encoded_len_varint(u64::from(number << 3))
}

#[inline]
pub fn zigzag_encode32(value: i32) -> u64 {
    ((value << 1) ^ (value >> 31)) as u32 as u64
}

#[inline]
pub fn zigzag_encode64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub fn zigzag_decode32(value: u64) -> i32 {
    let value = value as u32;
    ((value >> 1) as i32) ^ (-((value & 1) as i32))
}

#[inline]
pub fn zigzag_decode64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ (-((value & 1) as i64))
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;

    use super::*;

    #[test]
    fn key() {
        let mut buf = Vec::new();
        encode_key(1, WireType::Varint, &mut buf);
        assert_eq!(buf, [0x08]);
        assert_eq!(
            decode_key(&mut &buf[..]).unwrap(),
            (1, WireType::Varint)
        );

        buf.clear();
        encode_key(MAX_FIELD_NUMBER, WireType::LengthDelimited, &mut buf);
        assert_eq!(buf.len(), key_len(MAX_FIELD_NUMBER));
        assert_eq!(
            decode_key(&mut &buf[..]).unwrap(),
            (MAX_FIELD_NUMBER, WireType::LengthDelimited)
        );
    }

    #[test]
    fn key_rejects_wire_type_six() {
        // 1 << 3 | 6 is not a valid wire type.
        let err = decode_key(&mut &[0x0E_u8][..]).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::BadWireType);
    }

    #[test]
    fn key_rejects_field_number_zero() {
        let err = decode_key(&mut &[0x00_u8][..]).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::BadWireType);
    }

    #[test]
    fn zigzag() {
        assert_eq!(zigzag_encode32(0), 0);
        assert_eq!(zigzag_encode32(-1), 1);
        assert_eq!(zigzag_encode32(1), 2);
        assert_eq!(zigzag_encode32(i32::MIN), u64::from(u32::MAX));
        assert_eq!(zigzag_encode64(-2), 3);
    }

    quickcheck! {
        fn zigzag32_roundtrip(value: i32) -> bool {
            zigzag_decode32(zigzag_encode32(value)) == value
        }

        fn zigzag64_roundtrip(value: i64) -> bool {
            zigzag_decode64(zigzag_encode64(value)) == value
        }
    }
}
