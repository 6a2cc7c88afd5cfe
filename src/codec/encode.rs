//! Stateless encoding of a [`Value`] under a [`Schema`] into a byte sink.
//!
//! The encoder validates as it walks: a value that does not conform to the
//! schema fails with a [`CaskError::Validation`] before any further bytes are
//! appended for that subtree. Map entries are emitted in sorted key order so
//! identical data always produces identical bytes.

use crate::error::CaskError;
use crate::schema::{strip, Names, Schema, UnionSchema};
use crate::value::Value;

use super::varint::{write_int, write_long};

//==================================================================================
// 1. Public API
//==================================================================================

/// Appends the wire encoding of `value` under `schema` to `buffer`.
pub fn encode_value(
    value: &Value,
    schema: &Schema,
    names: &Names,
    buffer: &mut Vec<u8>,
) -> Result<(), CaskError> {
    let concrete = strip(schema, names)?;
    match (concrete, value) {
        (Schema::Null, Value::Null) => Ok(()),
        (Schema::Boolean, Value::Boolean(b)) => {
            buffer.push(u8::from(*b));
            Ok(())
        }
        (Schema::Int, Value::Int(n)) => write_int(*n, buffer),
        (Schema::Long, Value::Long(n)) => write_long(*n, buffer),
        // A 32-bit value is losslessly representable as a long.
        (Schema::Long, Value::Int(n)) => write_long(i64::from(*n), buffer),
        (Schema::Float, Value::Float(f)) => {
            buffer.extend_from_slice(&f.to_le_bytes());
            Ok(())
        }
        (Schema::Double, Value::Double(f)) => {
            buffer.extend_from_slice(&f.to_le_bytes());
            Ok(())
        }
        (Schema::Bytes, Value::Bytes(data)) => {
            write_long(data.len() as i64, buffer)?;
            buffer.extend_from_slice(data);
            Ok(())
        }
        (Schema::String, Value::String(s)) => {
            write_long(s.len() as i64, buffer)?;
            buffer.extend_from_slice(s.as_bytes());
            Ok(())
        }
        (Schema::Fixed(f), Value::Fixed(data)) => {
            if data.len() != f.size {
                return Err(CaskError::Validation(format!(
                    "fixed '{}' expects {} bytes, value has {}",
                    f.name,
                    f.size,
                    data.len()
                )));
            }
            buffer.extend_from_slice(data);
            Ok(())
        }
        (Schema::Enum(e), Value::Enum(index, symbol)) => {
            match e.symbols.get(*index) {
                Some(declared) if declared == symbol => write_int(*index as i32, buffer),
                _ => Err(CaskError::Validation(format!(
                    "symbol '{}' at index {} is not declared by enum '{}'",
                    symbol, index, e.name
                ))),
            }
        }
        (Schema::Union(u), value) => {
            let (index, inner) = match value {
                Value::Union(index, inner) => (*index, inner.as_ref()),
                other => (find_branch(u, other, names)?, other),
            };
            let branch = u.variants().get(index).ok_or_else(|| {
                CaskError::Validation(format!(
                    "union branch index {} out of range ({} branches)",
                    index,
                    u.variants().len()
                ))
            })?;
            write_long(index as i64, buffer)?;
            encode_value(inner, branch, names, buffer)
        }
        (Schema::Array(items), Value::Array(values)) => {
            if !values.is_empty() {
                write_long(values.len() as i64, buffer)?;
                for item in values {
                    encode_value(item, items, names, buffer)?;
                }
            }
            write_long(0, buffer)
        }
        (Schema::Map(value_schema), Value::Map(entries)) => {
            if !entries.is_empty() {
                write_long(entries.len() as i64, buffer)?;
                let mut keys: Vec<_> = entries.keys().collect();
                keys.sort();
                for key in keys {
                    write_long(key.len() as i64, buffer)?;
                    buffer.extend_from_slice(key.as_bytes());
                    encode_value(&entries[key], value_schema, names, buffer)?;
                }
            }
            write_long(0, buffer)
        }
        (Schema::Record(r), Value::Record(fields)) => {
            for field in &r.fields {
                let value = fields
                    .get(field.position)
                    .filter(|(name, _)| *name == field.name)
                    .or_else(|| fields.iter().find(|(name, _)| *name == field.name))
                    .map(|(_, v)| v)
                    .ok_or_else(|| {
                        CaskError::Validation(format!(
                            "record value lacks field '{}.{}'",
                            r.name, field.name
                        ))
                    })?;
                encode_value(value, &field.schema, names, buffer)?;
            }
            Ok(())
        }
        (schema, value) => Err(CaskError::Validation(format!(
            "cannot encode {} value as {}",
            value.type_name(),
            schema.type_label()
        ))),
    }
}

//==================================================================================
// 2. Union Branch Selection
//==================================================================================

/// Picks the first union branch that accepts an untagged value.
fn find_branch(union: &UnionSchema, value: &Value, names: &Names) -> Result<usize, CaskError> {
    union
        .variants()
        .iter()
        .position(|variant| branch_accepts(variant, value, names))
        .ok_or_else(|| {
            CaskError::Validation(format!(
                "no union branch accepts a {} value",
                value.type_name()
            ))
        })
}

fn branch_accepts(schema: &Schema, value: &Value, names: &Names) -> bool {
    let concrete = match strip(schema, names) {
        Ok(s) => s,
        Err(_) => return false,
    };
    match (concrete, value) {
        (Schema::Null, Value::Null)
        | (Schema::Boolean, Value::Boolean(_))
        | (Schema::Int, Value::Int(_))
        | (Schema::Long, Value::Long(_))
        | (Schema::Long, Value::Int(_))
        | (Schema::Float, Value::Float(_))
        | (Schema::Double, Value::Double(_))
        | (Schema::Bytes, Value::Bytes(_))
        | (Schema::String, Value::String(_))
        | (Schema::Array(_), Value::Array(_))
        | (Schema::Map(_), Value::Map(_))
        | (Schema::Record(_), Value::Record(_)) => true,
        (Schema::Fixed(f), Value::Fixed(data)) => data.len() == f.size,
        (Schema::Enum(e), Value::Enum(_, symbol)) => e.symbol_index(symbol).is_some(),
        _ => false,
    }
}

//==================================================================================
// 3. Unit Tests
//==================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn encode(value: &Value, schema: &Schema) -> Vec<u8> {
        let names = Names::from_schema(schema).unwrap();
        let mut buffer = Vec::new();
        encode_value(value, schema, &names, &mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_primitive_wire_bytes() {
        assert_eq!(encode(&Value::Null, &Schema::Null), Vec::<u8>::new());
        assert_eq!(encode(&Value::Boolean(true), &Schema::Boolean), vec![1]);
        assert_eq!(encode(&Value::Long(1), &Schema::Long), vec![0x02]);
        assert_eq!(encode(&Value::Long(-1), &Schema::Long), vec![0x01]);
        assert_eq!(
            encode(&Value::Double(1.0), &Schema::Double),
            1.0f64.to_le_bytes().to_vec()
        );
    }

    #[test]
    fn test_string_is_length_prefixed() {
        assert_eq!(
            encode(&Value::String("foo".to_string()), &Schema::String),
            vec![0x06, b'f', b'o', b'o']
        );
    }

    #[test]
    fn test_empty_array_is_single_zero_block() {
        let schema = Schema::Array(Box::new(Schema::Long));
        assert_eq!(encode(&Value::Array(vec![]), &schema), vec![0x00]);
    }

    #[test]
    fn test_array_block_layout() {
        let schema = Schema::Array(Box::new(Schema::Long));
        let value = Value::Array(vec![Value::Long(3), Value::Long(27)]);
        // count 2, items 3 and 27, terminator 0.
        assert_eq!(encode(&value, &schema), vec![0x04, 0x06, 0x36, 0x00]);
    }

    #[test]
    fn test_map_entries_are_key_sorted() {
        let schema = Schema::Map(Box::new(Schema::Long));
        let mut entries = HashMap::new();
        entries.insert("b".to_string(), Value::Long(2));
        entries.insert("a".to_string(), Value::Long(1));
        let bytes = encode(&Value::Map(entries), &schema);
        assert_eq!(
            bytes,
            vec![0x04, 0x02, b'a', 0x02, 0x02, b'b', 0x04, 0x00]
        );
    }

    #[test]
    fn test_union_writes_branch_index() {
        let schema = Schema::parse_str(r#"["null","string"]"#).unwrap();
        let tagged = Value::Union(1, Box::new(Value::String("x".to_string())));
        assert_eq!(encode(&tagged, &schema), vec![0x02, 0x02, b'x']);
        // Untagged values select the first accepting branch.
        assert_eq!(encode(&Value::Null, &schema), vec![0x00]);
    }

    #[test]
    fn test_record_concatenates_fields_in_order() {
        let schema = Schema::parse_str(
            r#"{"type":"record","name":"R","fields":[
                {"name":"a","type":"long"},{"name":"b","type":"string"}]}"#,
        )
        .unwrap();
        let value = Value::Record(vec![
            ("a".to_string(), Value::Long(1)),
            ("b".to_string(), Value::String("x".to_string())),
        ]);
        assert_eq!(encode(&value, &schema), vec![0x02, 0x02, b'x']);
    }

    #[test]
    fn test_fixed_size_is_enforced() {
        let schema = Schema::parse_str(r#"{"type":"fixed","name":"F4","size":4}"#).unwrap();
        let names = Names::from_schema(&schema).unwrap();
        let mut buffer = Vec::new();
        let result = encode_value(&Value::Fixed(vec![1, 2]), &schema, &names, &mut buffer);
        assert!(matches!(result, Err(CaskError::Validation(_))));
    }

    #[test]
    fn test_type_mismatch_is_a_validation_error() {
        let names = Names::default();
        let mut buffer = Vec::new();
        let result = encode_value(&Value::Long(1), &Schema::String, &names, &mut buffer);
        assert!(matches!(result, Err(CaskError::Validation(_))));
    }
}
