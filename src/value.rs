//! The generic in-memory value representation shared by the encoder, the
//! resolving decoder, and the container layer, plus the conversion that
//! materializes JSON field defaults into values.
//!
//! Higher-level data-binding layers are out of scope here; their boundary is
//! the [`RecordAccess`] capability (gettable/settable indexed fields), which
//! the generic record representation implements.

use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::error::CaskError;
use crate::schema::{strip, Names, Schema};

//==================================================================================
// 1. The Value Graph
//==================================================================================

/// A value shaped by some schema. Enum and union variants carry the index the
/// wire encoding uses alongside the resolved content.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    String(String),
    /// Exactly `size` raw bytes of the owning fixed schema.
    Fixed(Vec<u8>),
    /// Zero-based symbol index plus the symbol itself.
    Enum(usize, String),
    /// Zero-based branch index plus the branch value.
    Union(usize, Box<Value>),
    Array(Vec<Value>),
    Map(HashMap<String, Value>),
    /// Fields in schema declaration order.
    Record(Vec<(String, Value)>),
}

impl Value {
    /// Short label for error messages.
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Bytes(_) => "bytes",
            Value::String(_) => "string",
            Value::Fixed(_) => "fixed",
            Value::Enum(_, _) => "enum",
            Value::Union(_, _) => "union",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Record(_) => "record",
        }
    }

    /// Materializes a JSON default value into the shape `schema` describes.
    /// The parser has already validated representability; this conversion
    /// reports leftovers as internal errors rather than panicking.
    pub fn from_json(
        json: &JsonValue,
        schema: &Schema,
        names: &Names,
    ) -> Result<Value, CaskError> {
        let concrete = strip(schema, names)?;
        let mismatch = |expected: &str| {
            CaskError::Internal(format!(
                "default {} does not fit schema shape {}",
                json, expected
            ))
        };
        match concrete {
            Schema::Null => match json {
                JsonValue::Null => Ok(Value::Null),
                _ => Err(mismatch("null")),
            },
            Schema::Boolean => json
                .as_bool()
                .map(Value::Boolean)
                .ok_or_else(|| mismatch("boolean")),
            Schema::Int => json
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(Value::Int)
                .ok_or_else(|| mismatch("int")),
            Schema::Long => json.as_i64().map(Value::Long).ok_or_else(|| mismatch("long")),
            Schema::Float => json
                .as_f64()
                .map(|n| Value::Float(n as f32))
                .ok_or_else(|| mismatch("float")),
            Schema::Double => json.as_f64().map(Value::Double).ok_or_else(|| mismatch("double")),
            Schema::String => json
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(|| mismatch("string")),
            Schema::Bytes => json
                .as_str()
                .map(|s| Value::Bytes(json_chars_to_bytes(s)))
                .ok_or_else(|| mismatch("bytes")),
            Schema::Fixed(f) => {
                let bytes = json
                    .as_str()
                    .map(json_chars_to_bytes)
                    .ok_or_else(|| mismatch("fixed"))?;
                if bytes.len() != f.size {
                    return Err(mismatch("fixed of declared size"));
                }
                Ok(Value::Fixed(bytes))
            }
            Schema::Enum(e) => {
                let symbol = json.as_str().ok_or_else(|| mismatch("enum symbol"))?;
                let index = e
                    .symbol_index(symbol)
                    .ok_or_else(|| mismatch("declared enum symbol"))?;
                Ok(Value::Enum(index, symbol.to_string()))
            }
            // Defaults always select the first branch of a union.
            Schema::Union(u) => {
                let first = u.variants().first().ok_or_else(|| mismatch("union"))?;
                let inner = Value::from_json(json, first, names)?;
                Ok(Value::Union(0, Box::new(inner)))
            }
            Schema::Array(items) => {
                let entries = json.as_array().ok_or_else(|| mismatch("array"))?;
                let values = entries
                    .iter()
                    .map(|e| Value::from_json(e, items, names))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(values))
            }
            Schema::Map(value_schema) => {
                let entries = json.as_object().ok_or_else(|| mismatch("map"))?;
                let mut map = HashMap::with_capacity(entries.len());
                for (key, entry) in entries {
                    map.insert(key.clone(), Value::from_json(entry, value_schema, names)?);
                }
                Ok(Value::Map(map))
            }
            Schema::Record(r) => {
                let entries = json.as_object().ok_or_else(|| mismatch("record"))?;
                let mut fields = Vec::with_capacity(r.fields.len());
                for field in &r.fields {
                    let value = match entries.get(&field.name) {
                        Some(given) => Value::from_json(given, &field.schema, names)?,
                        None => {
                            let fallback = field.default.as_ref().ok_or_else(|| {
                                mismatch("record with all required fields")
                            })?;
                            Value::from_json(fallback, &field.schema, names)?
                        }
                    };
                    fields.push((field.name.clone(), value));
                }
                Ok(Value::Record(fields))
            }
            Schema::Logical(_) | Schema::Ref(_) => unreachable!("strip() removes these"),
        }
    }
}

/// Byte strings in schema JSON carry one byte per char code.
fn json_chars_to_bytes(s: &str) -> Vec<u8> {
    s.chars().map(|c| c as u8).collect()
}

//==================================================================================
// 2. The Indexed-Field Seam
//==================================================================================

/// Gettable/settable indexed fields: the capability any in-memory record
/// representation must offer to participate in decoding. The core itself
/// only ever produces and consumes the generic representation below.
pub trait RecordAccess {
    fn field_count(&self) -> usize;
    fn get_indexed(&self, position: usize) -> Option<&Value>;
    fn put_indexed(&mut self, position: usize, value: Value) -> Result<(), CaskError>;
}

impl RecordAccess for Vec<(String, Value)> {
    fn field_count(&self) -> usize {
        self.len()
    }

    fn get_indexed(&self, position: usize) -> Option<&Value> {
        self.get(position).map(|(_, v)| v)
    }

    fn put_indexed(&mut self, position: usize, value: Value) -> Result<(), CaskError> {
        match self.get_mut(position) {
            Some(slot) => {
                slot.1 = value;
                Ok(())
            }
            None => Err(CaskError::Internal(format!(
                "field position {} out of range ({} fields)",
                position,
                self.len()
            ))),
        }
    }
}

//==================================================================================
// 3. Unit Tests
//==================================================================================
