//! Stateless decoding of a [`Value`] from a `Read` source, plus
//! skip-without-decode for writer data the reader discards.
//!
//! Truncated input always surfaces as [`CaskError::UnexpectedEof`]; malformed
//! bytes (bad booleans, invalid UTF-8, out-of-range indexes, absurd lengths)
//! surface as [`CaskError::Decode`].

use std::collections::HashMap;
use std::io::Read;

use crate::error::CaskError;
use crate::schema::{strip, Names, Schema};
use crate::value::Value;

use super::varint::{read_byte, read_int, read_long};

/// Upper bound on any single length-prefixed allocation. A declared length
/// past this is treated as corruption rather than honored.
const MAX_DECODE_ALLOC: usize = 1 << 30;

//==================================================================================
// 1. Public API
//==================================================================================

/// Decodes one value shaped by `schema` from `reader`.
pub fn decode_value<R: Read>(
    schema: &Schema,
    names: &Names,
    reader: &mut R,
) -> Result<Value, CaskError> {
    let concrete = strip(schema, names)?;
    match concrete {
        Schema::Null => Ok(Value::Null),
        Schema::Boolean => match read_byte(reader)? {
            0 => Ok(Value::Boolean(false)),
            1 => Ok(Value::Boolean(true)),
            other => Err(CaskError::Decode(format!(
                "invalid boolean byte {:#04x}",
                other
            ))),
        },
        Schema::Int => Ok(Value::Int(read_int(reader)?)),
        Schema::Long => Ok(Value::Long(read_long(reader)?)),
        Schema::Float => {
            let mut buf = [0u8; 4];
            read_exact(reader, &mut buf)?;
            Ok(Value::Float(f32::from_le_bytes(buf)))
        }
        Schema::Double => {
            let mut buf = [0u8; 8];
            read_exact(reader, &mut buf)?;
            Ok(Value::Double(f64::from_le_bytes(buf)))
        }
        Schema::Bytes => Ok(Value::Bytes(read_len_prefixed(reader)?)),
        Schema::String => {
            let raw = read_len_prefixed(reader)?;
            String::from_utf8(raw)
                .map(Value::String)
                .map_err(|e| CaskError::Decode(format!("invalid UTF-8 in string: {}", e)))
        }
        Schema::Fixed(f) => {
            let mut buf = vec![0u8; f.size];
            read_exact(reader, &mut buf)?;
            Ok(Value::Fixed(buf))
        }
        Schema::Enum(e) => {
            let index = read_int(reader)?;
            let symbol = usize::try_from(index)
                .ok()
                .and_then(|i| e.symbols.get(i))
                .ok_or_else(|| {
                    CaskError::Decode(format!(
                        "enum index {} out of range for '{}' ({} symbols)",
                        index,
                        e.name,
                        e.symbols.len()
                    ))
                })?;
            Ok(Value::Enum(index as usize, symbol.clone()))
        }
        Schema::Union(u) => {
            let index = read_long(reader)?;
            let branch = usize::try_from(index)
                .ok()
                .and_then(|i| u.variants().get(i))
                .ok_or_else(|| {
                    CaskError::Decode(format!(
                        "union branch index {} out of range ({} branches)",
                        index,
                        u.variants().len()
                    ))
                })?;
            let inner = decode_value(branch, names, reader)?;
            Ok(Value::Union(index as usize, Box::new(inner)))
        }
        Schema::Array(items) => {
            let mut values = Vec::new();
            loop {
                let count = read_block_count(reader)?;
                if count == 0 {
                    break;
                }
                for _ in 0..count {
                    values.push(decode_value(items, names, reader)?);
                }
            }
            Ok(Value::Array(values))
        }
        Schema::Map(value_schema) => {
            let mut entries = HashMap::new();
            loop {
                let count = read_block_count(reader)?;
                if count == 0 {
                    break;
                }
                for _ in 0..count {
                    let key = read_map_key(reader)?;
                    let value = decode_value(value_schema, names, reader)?;
                    entries.insert(key, value);
                }
            }
            Ok(Value::Map(entries))
        }
        Schema::Record(r) => {
            let mut fields = Vec::with_capacity(r.fields.len());
            for field in &r.fields {
                let value = decode_value(&field.schema, names, reader)?;
                fields.push((field.name.clone(), value));
            }
            Ok(Value::Record(fields))
        }
        Schema::Logical(_) | Schema::Ref(_) => unreachable!("strip() removes these"),
    }
}

/// Consumes one value shaped by `schema` without building it. Blocks whose
/// count carries a byte size are skipped wholesale.
pub fn skip_value<R: Read>(
    schema: &Schema,
    names: &Names,
    reader: &mut R,
) -> Result<(), CaskError> {
    let concrete = strip(schema, names)?;
    match concrete {
        Schema::Null => Ok(()),
        Schema::Boolean => read_byte(reader).map(|_| ()),
        Schema::Int | Schema::Long | Schema::Enum(_) => read_long(reader).map(|_| ()),
        Schema::Float => skip_bytes(reader, 4),
        Schema::Double => skip_bytes(reader, 8),
        Schema::Bytes | Schema::String => {
            let len = read_declared_len(reader)?;
            skip_bytes(reader, len as u64)
        }
        Schema::Fixed(f) => skip_bytes(reader, f.size as u64),
        Schema::Union(u) => {
            let index = read_long(reader)?;
            let branch = usize::try_from(index)
                .ok()
                .and_then(|i| u.variants().get(i))
                .ok_or_else(|| {
                    CaskError::Decode(format!("union branch index {} out of range", index))
                })?;
            skip_value(branch, names, reader)
        }
        Schema::Array(items) => skip_blocks(reader, |r| skip_value(items, names, r)),
        Schema::Map(value_schema) => skip_blocks(reader, |r| {
            let len = read_declared_len(r)?;
            skip_bytes(r, len as u64)?;
            skip_value(value_schema, names, r)
        }),
        Schema::Record(r) => {
            for field in &r.fields {
                skip_value(&field.schema, names, reader)?;
            }
            Ok(())
        }
        Schema::Logical(_) | Schema::Ref(_) => unreachable!("strip() removes these"),
    }
}

//==================================================================================
// 2. Shared Helpers
//==================================================================================

pub(crate) fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), CaskError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(CaskError::UnexpectedEof),
        Err(e) => Err(CaskError::Io(e)),
    }
}

fn read_declared_len<R: Read>(reader: &mut R) -> Result<usize, CaskError> {
    let raw = read_long(reader)?;
    let len = usize::try_from(raw)
        .map_err(|_| CaskError::Decode(format!("negative length {}", raw)))?;
    if len > MAX_DECODE_ALLOC {
        return Err(CaskError::Decode(format!(
            "declared length {} exceeds the {} byte limit",
            len, MAX_DECODE_ALLOC
        )));
    }
    Ok(len)
}

pub(crate) fn read_len_prefixed<R: Read>(reader: &mut R) -> Result<Vec<u8>, CaskError> {
    let len = read_declared_len(reader)?;
    let mut buf = vec![0u8; len];
    read_exact(reader, &mut buf)?;
    Ok(buf)
}

pub(crate) fn read_map_key<R: Read>(reader: &mut R) -> Result<String, CaskError> {
    let raw = read_len_prefixed(reader)?;
    String::from_utf8(raw)
        .map_err(|e| CaskError::Decode(format!("invalid UTF-8 in map key: {}", e)))
}

/// Reads one block count. A negative count means "absolute value, preceded on
/// the wire by the block's byte size"; the size is consumed and discarded
/// here because the items are decoded anyway.
pub(crate) fn read_block_count<R: Read>(reader: &mut R) -> Result<usize, CaskError> {
    let raw = read_long(reader)?;
    let count = if raw < 0 {
        let _block_bytes = read_long(reader)?;
        raw.unsigned_abs()
    } else {
        raw as u64
    };
    usize::try_from(count)
        .map_err(|_| CaskError::Decode(format!("block count {} out of range", count)))
}

/// Walks array/map blocks for skipping. Sized blocks skip by byte count;
/// unsized blocks skip entry by entry via `skip_entry`.
fn skip_blocks<R, F>(reader: &mut R, mut skip_entry: F) -> Result<(), CaskError>
where
    R: Read,
    F: FnMut(&mut R) -> Result<(), CaskError>,
{
    loop {
        let raw = read_long(reader)?;
        if raw == 0 {
            return Ok(());
        }
        if raw < 0 {
            let block_bytes = read_long(reader)?;
            let len = u64::try_from(block_bytes)
                .map_err(|_| CaskError::Decode(format!("negative block size {}", block_bytes)))?;
            skip_bytes(reader, len)?;
        } else {
            for _ in 0..raw {
                skip_entry(reader)?;
            }
        }
    }
}

fn skip_bytes<R: Read>(reader: &mut R, n: u64) -> Result<(), CaskError> {
    let copied = std::io::copy(&mut reader.take(n), &mut std::io::sink())?;
    if copied < n {
        return Err(CaskError::UnexpectedEof);
    }
    Ok(())
}

//==================================================================================
// 3. Unit Tests
//==================================================================================
