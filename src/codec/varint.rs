//! This module contains the pure, stateless kernels for the wire-level integer
//! encoding: zig-zag mapping of signed integers followed by variable-length
//! base-128 bytes, least-significant group first, with a continuation bit.
//!
//! Every `int` and `long` on the wire goes through these functions, as do the
//! length prefixes of strings, bytes, blocks, and union branch indexes. The
//! kernels are fully panic-free.

use num_traits::{PrimInt, Unsigned};
use std::io::Read;

use crate::error::CaskError;

//==================================================================================
// 1. Zig-Zag Mapping
//==================================================================================

/// Maps a signed 64-bit integer onto an unsigned one so small magnitudes of
/// either sign produce small varints.
#[inline]
pub fn zigzag_i64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

/// Inverse of [`zigzag_i64`].
#[inline]
pub fn unzigzag_i64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Maps a signed 32-bit integer onto an unsigned one. Bit-compatible with the
/// 64-bit mapping for every `i32` value.
#[inline]
pub fn zigzag_i32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

/// Inverse of [`zigzag_i32`].
#[inline]
pub fn unzigzag_i32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

//==================================================================================
// 2. Varint Kernels (Generic Engine)
//==================================================================================

/// Encodes a single unsigned integer into a base-128 byte sequence, appending
/// to `buffer`.
pub fn encode_varint<T>(value: T, buffer: &mut Vec<u8>) -> Result<(), CaskError>
where
    T: PrimInt + Unsigned,
{
    let zero = T::zero();
    let seven_bit_mask = T::from(0x7F)
        .ok_or_else(|| CaskError::Internal("failed to create 7-bit mask for type".to_string()))?;
    let continuation_bit = T::from(0x80)
        .ok_or_else(|| CaskError::Internal("failed to create continuation bit for type".to_string()))?;

    let mut current = value;
    loop {
        let mut byte = current & seven_bit_mask;
        current = current >> 7;
        if current != zero {
            byte = byte | continuation_bit;
        }

        let byte_u8 = byte
            .to_u8()
            .ok_or_else(|| CaskError::Internal("failed to narrow varint group to u8".to_string()))?;
        buffer.push(byte_u8);

        if current == zero {
            break;
        }
    }
    Ok(())
}

/// Decodes a single unsigned integer from a base-128 byte stream.
///
/// A stream that ends before the final group is reported as
/// [`CaskError::UnexpectedEof`]; a value that does not fit the target type is
/// a [`CaskError::Decode`].
pub fn decode_varint<T, R>(reader: &mut R) -> Result<T, CaskError>
where
    T: PrimInt + Unsigned,
    R: Read,
{
    let mut result = T::zero();
    let mut shift = 0;
    let total_bits = std::mem::size_of::<T>() * 8;

    loop {
        let byte = read_byte(reader)?;

        let seven_bit_payload = T::from(byte & 0x7F)
            .ok_or_else(|| CaskError::Internal("failed to widen varint group".to_string()))?;

        // Adding these 7 bits past the type's capacity means the stream holds
        // a wider value than the caller asked for.
        if shift >= total_bits {
            return Err(CaskError::Decode("varint overflows target type".to_string()));
        }

        result = result | (seven_bit_payload << shift);

        if byte & 0x80 == 0 {
            // The last group may only set bits that still fit when the bit
            // count is not a multiple of 7.
            if shift + 7 > total_bits && (byte >> (total_bits - shift)) > 0 {
                return Err(CaskError::Decode("varint overflows target type".to_string()));
            }
            return Ok(result);
        }

        shift += 7;
    }
}

//==================================================================================
// 3. Wire-Level `int` / `long` API
//==================================================================================

/// Appends the wire encoding of a `long` to `buffer`.
pub fn write_long(n: i64, buffer: &mut Vec<u8>) -> Result<(), CaskError> {
    encode_varint(zigzag_i64(n), buffer)
}

/// Reads one wire-encoded `long`.
pub fn read_long<R: Read>(reader: &mut R) -> Result<i64, CaskError> {
    Ok(unzigzag_i64(decode_varint::<u64, R>(reader)?))
}

/// Appends the wire encoding of an `int` to `buffer`. Identical bytes to
/// [`write_long`] for every `i32` value.
pub fn write_int(n: i32, buffer: &mut Vec<u8>) -> Result<(), CaskError> {
    encode_varint(zigzag_i32(n), buffer)
}

/// Reads one wire-encoded `int`, rejecting values outside the 32-bit range.
pub fn read_int<R: Read>(reader: &mut R) -> Result<i32, CaskError> {
    let wide = read_long(reader)?;
    i32::try_from(wide)
        .map_err(|_| CaskError::Decode(format!("int value {} out of 32-bit range", wide)))
}

/// Reads exactly one byte, mapping a clean end of input to
/// [`CaskError::UnexpectedEof`].
pub(crate) fn read_byte<R: Read>(reader: &mut R) -> Result<u8, CaskError> {
    let mut buf = [0u8; 1];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(buf[0]),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(CaskError::UnexpectedEof),
        Err(e) => Err(CaskError::Io(e)),
    }
}

//==================================================================================
// 4. Unit Tests
//==================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_zigzag_core_values() {
        assert_eq!(zigzag_i64(0), 0);
        assert_eq!(zigzag_i64(-1), 1);
        assert_eq!(zigzag_i64(1), 2);
        assert_eq!(zigzag_i64(-2), 3);
        assert_eq!(unzigzag_i64(zigzag_i64(i64::MIN)), i64::MIN);
        assert_eq!(unzigzag_i64(zigzag_i64(i64::MAX)), i64::MAX);
        assert_eq!(unzigzag_i32(zigzag_i32(i32::MIN)), i32::MIN);
    }

    #[test]
    fn test_long_wire_bytes_match_reference() {
        // Known encodings: 0 -> 00, -1 -> 01, 1 -> 02, -64 -> 7f, 64 -> 80 01.
        let cases: &[(i64, &[u8])] = &[
            (0, &[0x00]),
            (-1, &[0x01]),
            (1, &[0x02]),
            (-64, &[0x7f]),
            (64, &[0x80, 0x01]),
        ];
        for (value, expected) in cases {
            let mut buf = Vec::new();
            write_long(*value, &mut buf).unwrap();
            assert_eq!(&buf, expected, "encoding of {}", value);
        }
    }

    #[test]
    fn test_varint_roundtrip_u32() {
        let original: Vec<u32> = vec![0, 127, 128, 1000, u32::MAX];
        for value in original {
            let mut encoded = Vec::new();
            encode_varint(value, &mut encoded).unwrap();
            let decoded: u32 = decode_varint(&mut Cursor::new(&encoded[..])).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_long_roundtrip_extremes() {
        for value in [i64::MIN, -1, 0, 1, i64::MAX, 1 << 40, -(1 << 40)] {
            let mut encoded = Vec::new();
            write_long(value, &mut encoded).unwrap();
            assert_eq!(read_long(&mut Cursor::new(&encoded[..])).unwrap(), value);
        }
    }

    #[test]
    fn test_decode_truncated_is_eof() {
        let mut encoded = Vec::new();
        write_long(624485, &mut encoded).unwrap();
        let truncated = &encoded[..encoded.len() - 1];
        let result = read_long(&mut Cursor::new(truncated));
        assert!(matches!(result, Err(CaskError::UnexpectedEof)));
    }

    #[test]
    fn test_decode_empty_is_eof() {
        let result = read_long(&mut Cursor::new(&[][..]));
        assert!(matches!(result, Err(CaskError::UnexpectedEof)));
    }

    #[test]
    fn test_decode_overflow_error() {
        // One group more than a u64 can hold.
        let encoded = vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let result = decode_varint::<u64, _>(&mut Cursor::new(&encoded[..]));
        assert!(matches!(result, Err(CaskError::Decode(_))));
    }

    #[test]
    fn test_read_int_rejects_wide_values() {
        let mut encoded = Vec::new();
        write_long(i64::from(i32::MAX) + 1, &mut encoded).unwrap();
        let result = read_int(&mut Cursor::new(&encoded[..]));
        assert!(matches!(result, Err(CaskError::Decode(_))));
    }
}
