//! Single-datum framing: one value, prefixed by a 2-byte marker and the
//! 8-byte little-endian Rabin fingerprint of the writer schema's canonical
//! form. Lets a consumer with a schema store confirm it holds the right
//! schema before decoding, without shipping the schema text itself.

use std::io::Read;

use crate::error::CaskError;
use crate::schema::{Names, Schema};
use crate::value::Value;

use super::decode::{decode_value, read_exact};
use super::encode::encode_value;

/// Marker bytes opening a single-datum frame.
pub const SINGLE_MARKER: [u8; 2] = [0xC3, 0x01];

/// Appends a framed datum: marker, schema fingerprint, payload.
pub fn write_single(
    value: &Value,
    schema: &Schema,
    names: &Names,
    buffer: &mut Vec<u8>,
) -> Result<(), CaskError> {
    buffer.extend_from_slice(&SINGLE_MARKER);
    buffer.extend_from_slice(&schema.fingerprint_rabin().to_le_bytes());
    encode_value(value, schema, names, buffer)
}

/// Reads a framed datum, validating both the marker and that the embedded
/// fingerprint matches `schema`.
pub fn read_single<R: Read>(
    schema: &Schema,
    names: &Names,
    reader: &mut R,
) -> Result<Value, CaskError> {
    let mut marker = [0u8; 2];
    read_exact(reader, &mut marker)?;
    if marker != SINGLE_MARKER {
        return Err(CaskError::Decode(format!(
            "invalid single-datum marker {:02x}{:02x}",
            marker[0], marker[1]
        )));
    }
    let mut fp = [0u8; 8];
    read_exact(reader, &mut fp)?;
    let found = u64::from_le_bytes(fp);
    let expected = schema.fingerprint_rabin();
    if found != expected {
        return Err(CaskError::Decode(format!(
            "schema fingerprint mismatch: expected {:016x}, found {:016x}",
            expected, found
        )));
    }
    decode_value(schema, names, reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_single_datum_roundtrip() {
        let schema = Schema::String;
        let names = Names::default();
        let value = Value::String("solo".to_string());
        let mut buffer = Vec::new();
        write_single(&value, &schema, &names, &mut buffer).unwrap();
        assert_eq!(&buffer[..2], &SINGLE_MARKER);
        let decoded = read_single(&schema, &names, &mut Cursor::new(&buffer[..])).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_fingerprint_mismatch_is_rejected() {
        let names = Names::default();
        let mut buffer = Vec::new();
        write_single(&Value::Long(7), &Schema::Long, &names, &mut buffer).unwrap();
        let result = read_single(&Schema::Int, &names, &mut Cursor::new(&buffer[..]));
        assert!(matches!(result, Err(CaskError::Decode(_))));
    }

    #[test]
    fn test_bad_marker_is_rejected() {
        let names = Names::default();
        let buffer = vec![0xC4, 0x01, 0, 0, 0, 0, 0, 0, 0, 0];
        let result = read_single(&Schema::Null, &names, &mut Cursor::new(&buffer[..]));
        assert!(matches!(result, Err(CaskError::Decode(_))));
    }
}
