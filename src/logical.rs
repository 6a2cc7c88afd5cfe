//! Logical type annotations: semantic overlays (decimal, uuid, timestamps)
//! that leave the underlying binary shape untouched.
//!
//! Factories live in a process-wide name -> factory table, populated with the
//! built-ins on first use. The binary codec never consults this module; the
//! conversion hooks exist for data-binding layers above the core. An
//! annotation whose name has no registered factory is inert: it parses,
//! round-trips, and encodes as its underlying schema.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::CaskError;
use crate::schema::{LogicalSchema, Schema};
use crate::value::Value;

//==================================================================================
// 1. Capability Interfaces
//==================================================================================

/// A validated logical type instance attached to one schema node.
pub trait LogicalType: Send + Sync + std::fmt::Debug {
    /// The registry key this instance was built under.
    fn type_name(&self) -> &'static str;

    /// Converts a decoded underlying value to the annotated representation.
    fn from_underlying(&self, value: Value) -> Result<Value, CaskError> {
        Ok(value)
    }

    /// Converts an annotated representation back to the underlying value.
    fn into_underlying(&self, value: Value) -> Result<Value, CaskError> {
        Ok(value)
    }
}

/// Builds validated instances from annotated schemas.
pub trait LogicalTypeFactory: Send + Sync {
    /// The `logicalType` attribute value this factory handles.
    fn type_name(&self) -> &'static str;

    /// Validates the annotation against the annotated schema's properties
    /// and underlying shape.
    fn from_schema(&self, schema: &LogicalSchema) -> Result<Arc<dyn LogicalType>, CaskError>;
}

//==================================================================================
// 2. The Process-Wide Registry
//==================================================================================

type Registry = RwLock<HashMap<&'static str, Arc<dyn LogicalTypeFactory>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<&'static str, Arc<dyn LogicalTypeFactory>> = HashMap::new();
        for factory in built_in_factories() {
            map.insert(factory.type_name(), factory);
        }
        RwLock::new(map)
    })
}

/// Registers a factory, replacing any previous one under the same name.
pub fn register(factory: Arc<dyn LogicalTypeFactory>) -> Result<(), CaskError> {
    let mut map = registry()
        .write()
        .map_err(|_| CaskError::Internal("logical type registry is poisoned".to_string()))?;
    map.insert(factory.type_name(), factory);
    Ok(())
}

/// Builds the validated instance for an annotation, or `None` when no factory
/// is registered under its name.
pub fn resolve(schema: &LogicalSchema) -> Result<Option<Arc<dyn LogicalType>>, CaskError> {
    let factory = {
        let map = registry()
            .read()
            .map_err(|_| CaskError::Internal("logical type registry is poisoned".to_string()))?;
        map.get(schema.name.as_str()).cloned()
    };
    match factory {
        Some(factory) => factory.from_schema(schema).map(Some),
        None => Ok(None),
    }
}

fn built_in_factories() -> Vec<Arc<dyn LogicalTypeFactory>> {
    vec![
        Arc::new(DecimalFactory),
        Arc::new(UuidFactory),
        Arc::new(DateFactory),
        Arc::new(TimestampFactory::millis()),
        Arc::new(TimestampFactory::micros()),
    ]
}

//==================================================================================
// 3. Built-In Logical Types
//==================================================================================

/// Fixed-point decimal over `bytes` or `fixed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal {
    pub precision: u64,
    pub scale: u64,
}

impl LogicalType for Decimal {
    fn type_name(&self) -> &'static str {
        "decimal"
    }
}

struct DecimalFactory;

impl LogicalTypeFactory for DecimalFactory {
    fn type_name(&self) -> &'static str {
        "decimal"
    }

    fn from_schema(&self, schema: &LogicalSchema) -> Result<Arc<dyn LogicalType>, CaskError> {
        let precision = schema
            .props
            .get("precision")
            .and_then(JsonValue::as_u64)
            .ok_or_else(|| {
                CaskError::SchemaParse("decimal annotation requires a 'precision' >= 1".to_string())
            })?;
        if precision == 0 {
            return Err(CaskError::SchemaParse(
                "decimal precision must be at least 1".to_string(),
            ));
        }
        let scale = schema
            .props
            .get("scale")
            .and_then(JsonValue::as_u64)
            .unwrap_or(0);
        if scale > precision {
            return Err(CaskError::SchemaParse(format!(
                "decimal scale {} exceeds precision {}",
                scale, precision
            )));
        }
        match schema.inner.as_ref() {
            Schema::Bytes => {}
            Schema::Fixed(f) => {
                let capacity = max_precision_for(f.size);
                if precision > capacity {
                    return Err(CaskError::SchemaParse(format!(
                        "decimal precision {} does not fit fixed '{}' of {} bytes (max {})",
                        precision, f.name, f.size, capacity
                    )));
                }
            }
            other => {
                return Err(CaskError::SchemaParse(format!(
                    "decimal annotation requires bytes or fixed, found {}",
                    other.type_label()
                )))
            }
        }
        Ok(Arc::new(Decimal { precision, scale }))
    }
}

/// Largest decimal precision a two's-complement fixed of `size` bytes holds.
fn max_precision_for(size: usize) -> u64 {
    (((8 * size as u32 - 1) as f64) * 2f64.log10()).floor() as u64
}

/// RFC 4122 textual UUID over `string`.
#[derive(Debug)]
struct UuidType;

impl LogicalType for UuidType {
    fn type_name(&self) -> &'static str {
        "uuid"
    }
}

struct UuidFactory;

impl LogicalTypeFactory for UuidFactory {
    fn type_name(&self) -> &'static str {
        "uuid"
    }

    fn from_schema(&self, schema: &LogicalSchema) -> Result<Arc<dyn LogicalType>, CaskError> {
        require_underlying(schema, &Schema::String, "uuid")?;
        Ok(Arc::new(UuidType))
    }
}

/// Days since the epoch over `int`.
#[derive(Debug)]
struct DateType;

impl LogicalType for DateType {
    fn type_name(&self) -> &'static str {
        "date"
    }
}

struct DateFactory;

impl LogicalTypeFactory for DateFactory {
    fn type_name(&self) -> &'static str {
        "date"
    }

    fn from_schema(&self, schema: &LogicalSchema) -> Result<Arc<dyn LogicalType>, CaskError> {
        require_underlying(schema, &Schema::Int, "date")?;
        Ok(Arc::new(DateType))
    }
}

/// Epoch timestamps over `long`, at millisecond or microsecond resolution.
#[derive(Debug, Clone, Copy)]
struct TimestampType {
    name: &'static str,
}

impl LogicalType for TimestampType {
    fn type_name(&self) -> &'static str {
        self.name
    }
}

struct TimestampFactory {
    name: &'static str,
}

impl TimestampFactory {
    fn millis() -> Self {
        TimestampFactory {
            name: "timestamp-millis",
        }
    }

    fn micros() -> Self {
        TimestampFactory {
            name: "timestamp-micros",
        }
    }
}

impl LogicalTypeFactory for TimestampFactory {
    fn type_name(&self) -> &'static str {
        self.name
    }

    fn from_schema(&self, schema: &LogicalSchema) -> Result<Arc<dyn LogicalType>, CaskError> {
        require_underlying(schema, &Schema::Long, self.name)?;
        Ok(Arc::new(TimestampType { name: self.name }))
    }
}

fn require_underlying(
    schema: &LogicalSchema,
    expected: &Schema,
    annotation: &str,
) -> Result<(), CaskError> {
    if schema.inner.as_ref() == expected {
        Ok(())
    } else {
        Err(CaskError::SchemaParse(format!(
            "{} annotation requires {}, found {}",
            annotation,
            expected.type_label(),
            schema.inner.type_label()
        )))
    }
}

//==================================================================================
// 4. Unit Tests
//==================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn logical_of(text: &str) -> LogicalSchema {
        match Schema::parse_str(text).unwrap() {
            Schema::Logical(l) => l,
            other => panic!("expected logical annotation, got {:?}", other),
        }
    }

    #[test]
    fn test_decimal_on_bytes_validates() {
        let annotation =
            logical_of(r#"{"type":"bytes","logicalType":"decimal","precision":6,"scale":2}"#);
        let instance = resolve(&annotation).unwrap().unwrap();
        assert_eq!(instance.type_name(), "decimal");
    }

    #[test]
    fn test_decimal_scale_beyond_precision_is_rejected() {
        let annotation =
            logical_of(r#"{"type":"bytes","logicalType":"decimal","precision":2,"scale":5}"#);
        assert!(matches!(
            resolve(&annotation),
            Err(CaskError::SchemaParse(_))
        ));
    }

    #[test]
    fn test_decimal_fixed_capacity_is_enforced() {
        // Two bytes hold at most 4 decimal digits.
        let too_wide = logical_of(
            r#"{"type":"fixed","name":"D","size":2,"logicalType":"decimal","precision":9}"#,
        );
        assert!(matches!(resolve(&too_wide), Err(CaskError::SchemaParse(_))));

        let fits = logical_of(
            r#"{"type":"fixed","name":"D2","size":2,"logicalType":"decimal","precision":4}"#,
        );
        assert!(resolve(&fits).unwrap().is_some());
    }

    #[test]
    fn test_unknown_annotation_is_inert() {
        let annotation = logical_of(r#"{"type":"string","logicalType":"postal-code"}"#);
        assert!(resolve(&annotation).unwrap().is_none());
    }

    #[test]
    fn test_date_requires_int_underlying() {
        let bad = logical_of(r#"{"type":"string","logicalType":"date"}"#);
        assert!(matches!(resolve(&bad), Err(CaskError::SchemaParse(_))));

        let good = logical_of(r#"{"type":"int","logicalType":"date"}"#);
        assert_eq!(resolve(&good).unwrap().unwrap().type_name(), "date");
    }

    #[test]
    fn test_conversion_hooks_default_to_identity() {
        let annotation = logical_of(r#"{"type":"long","logicalType":"timestamp-millis"}"#);
        let instance = resolve(&annotation).unwrap().unwrap();
        let value = Value::Long(1_700_000_000_000);
        assert_eq!(
            instance.from_underlying(value.clone()).unwrap(),
            value
        );
        assert_eq!(instance.into_underlying(value.clone()).unwrap(), value);
    }
}
