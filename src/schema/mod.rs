//! This module defines the schema type model: the immutable type tree, named
//! types with namespace rules, the by-name registry that turns recursive
//! definitions into a resolvable graph, and the JSON parser that is the single
//! entry point for turning schema text into validated `Schema` values.
//!
//! Schemas are constructed once (by parsing or by the validated constructors),
//! are immutable afterwards, and are shared by reference across the encoder,
//! the resolving decoder, and the compatibility checker.

use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::CaskError;

pub mod canonical;

//==================================================================================
// 1. Names and Namespaces
//==================================================================================

/// The name of a record, enum, or fixed schema, with an optional namespace.
/// The full (dotted) name must be unique within one parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    pub name: String,
    pub namespace: Option<String>,
}

impl Name {
    /// Builds a name from a `name` attribute, an optional `namespace`
    /// attribute, and the enclosing namespace. A dotted `name` carries its own
    /// namespace and ignores the other two sources.
    pub fn parse(
        raw: &str,
        namespace_attr: Option<&str>,
        enclosing: Option<&str>,
    ) -> Result<Self, CaskError> {
        if let Some(idx) = raw.rfind('.') {
            let (ns, simple) = (&raw[..idx], &raw[idx + 1..]);
            validate_name_part(simple)?;
            validate_namespace(ns)?;
            return Ok(Name {
                name: simple.to_string(),
                namespace: Some(ns.to_string()),
            });
        }
        validate_name_part(raw)?;
        let namespace = namespace_attr
            .or(enclosing)
            .filter(|ns| !ns.is_empty())
            .map(|ns| ns.to_string());
        if let Some(ns) = &namespace {
            validate_namespace(ns)?;
        }
        Ok(Name {
            name: raw.to_string(),
            namespace,
        })
    }

    /// The dotted full name used for registry lookups and reference encoding.
    pub fn fullname(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}.{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fullname())
    }
}

fn validate_name_part(part: &str) -> Result<(), CaskError> {
    let mut chars = part.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CaskError::SchemaParse(format!("invalid name '{}'", part)))
    }
}

fn validate_namespace(ns: &str) -> Result<(), CaskError> {
    for segment in ns.split('.') {
        validate_name_part(segment)
            .map_err(|_| CaskError::SchemaParse(format!("invalid namespace '{}'", ns)))?;
    }
    Ok(())
}

//==================================================================================
// 2. The Schema Tree
//==================================================================================

/// Comparison directive for a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
    Ignore,
}

/// One member of a record. `position` is the field's index in declaration
/// order and is assigned by [`RecordSchema::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub doc: Option<String>,
    pub schema: Schema,
    pub default: Option<JsonValue>,
    pub order: SortOrder,
    pub aliases: Vec<String>,
    pub position: usize,
}

impl Field {
    pub fn new(name: &str, schema: Schema) -> Result<Self, CaskError> {
        validate_name_part(name)?;
        Ok(Field {
            name: name.to_string(),
            doc: None,
            schema,
            default: None,
            order: SortOrder::Ascending,
            aliases: Vec::new(),
            position: 0,
        })
    }

    pub fn with_default(mut self, default: JsonValue) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    pub name: Name,
    pub doc: Option<String>,
    pub aliases: Vec<Name>,
    pub fields: Vec<Field>,
}

impl RecordSchema {
    /// Validated constructor: rejects duplicate field names and assigns
    /// declaration positions.
    pub fn new(name: Name, mut fields: Vec<Field>) -> Result<Self, CaskError> {
        let mut seen = HashSet::new();
        for (position, field) in fields.iter_mut().enumerate() {
            if !seen.insert(field.name.clone()) {
                return Err(CaskError::SchemaParse(format!(
                    "duplicate field '{}' in record '{}'",
                    field.name, name
                )));
            }
            field.position = position;
        }
        Ok(RecordSchema {
            name,
            doc: None,
            aliases: Vec::new(),
            fields,
        })
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumSchema {
    pub name: Name,
    pub doc: Option<String>,
    pub aliases: Vec<Name>,
    pub symbols: Vec<String>,
    /// Symbol substituted during resolution when the writer's symbol is
    /// unknown to this (reader) schema.
    pub default: Option<String>,
}

impl EnumSchema {
    /// Validated constructor: symbols must be unique, valid names, and the
    /// default (when present) must be one of them.
    pub fn new(
        name: Name,
        symbols: Vec<String>,
        default: Option<String>,
    ) -> Result<Self, CaskError> {
        let mut seen = HashSet::new();
        for symbol in &symbols {
            validate_name_part(symbol)?;
            if !seen.insert(symbol.clone()) {
                return Err(CaskError::SchemaParse(format!(
                    "duplicate symbol '{}' in enum '{}'",
                    symbol, name
                )));
            }
        }
        if let Some(d) = &default {
            if !symbols.iter().any(|s| s == d) {
                return Err(CaskError::SchemaParse(format!(
                    "enum '{}' default '{}' is not a declared symbol",
                    name, d
                )));
            }
        }
        Ok(EnumSchema {
            name,
            doc: None,
            aliases: Vec::new(),
            symbols,
            default,
        })
    }

    pub fn symbol_index(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixedSchema {
    pub name: Name,
    pub doc: Option<String>,
    pub aliases: Vec<Name>,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionSchema {
    variants: Vec<Schema>,
}

impl UnionSchema {
    /// Validated constructor: a union may not directly contain another union,
    /// and no two members may share a type label (named types are
    /// distinguished by full name).
    pub fn new(variants: Vec<Schema>) -> Result<Self, CaskError> {
        let mut seen = HashSet::new();
        for variant in &variants {
            if matches!(variant.underlying(), Schema::Union(_)) {
                return Err(CaskError::SchemaParse(
                    "unions may not immediately contain other unions".to_string(),
                ));
            }
            let label = variant.type_label();
            if !seen.insert(label.clone()) {
                return Err(CaskError::SchemaParse(format!(
                    "duplicate union branch type '{}'",
                    label
                )));
            }
        }
        Ok(UnionSchema { variants })
    }

    pub fn variants(&self) -> &[Schema] {
        &self.variants
    }
}

/// A semantic annotation that leaves the binary shape of `inner` untouched.
/// `props` holds the `logicalType` attribute and its siblings; the registry in
/// `crate::logical` turns annotations into validated instances.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalSchema {
    pub name: String,
    pub inner: Box<Schema>,
    pub props: JsonMap<String, JsonValue>,
}

/// The schema type tree. Named types may be referenced by name (`Ref`) from
/// within their own definition or from siblings; the owning definition lives
/// at the first occurrence and in the [`Names`] registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Record(RecordSchema),
    Enum(EnumSchema),
    Array(Box<Schema>),
    Map(Box<Schema>),
    Union(UnionSchema),
    Fixed(FixedSchema),
    Logical(LogicalSchema),
    Ref(Name),
}

impl Schema {
    /// Parses schema text. Never returns a partial schema: any structural
    /// problem, invalid name, duplicate, or bad default fails the whole call.
    pub fn parse_str(text: &str) -> Result<Schema, CaskError> {
        let json: JsonValue = serde_json::from_str(text)
            .map_err(|e| CaskError::SchemaParse(format!("invalid JSON: {}", e)))?;
        Self::parse_value(&json)
    }

    /// Parses an already-deserialized JSON value.
    pub fn parse_value(json: &JsonValue) -> Result<Schema, CaskError> {
        let mut parser = Parser::default();
        let schema = parser.parse(json, None)?;
        let names = Names::from_schema(&schema)?;
        validate_schema_defaults(&schema, &names)?;
        Ok(schema)
    }

    /// The full name of a named schema (record, enum, fixed, or a reference).
    pub fn full_name(&self) -> Option<String> {
        match self {
            Schema::Record(r) => Some(r.name.fullname()),
            Schema::Enum(e) => Some(e.name.fullname()),
            Schema::Fixed(f) => Some(f.name.fullname()),
            Schema::Ref(n) => Some(n.fullname()),
            Schema::Logical(l) => l.inner.full_name(),
            _ => None,
        }
    }

    /// Strips logical annotations, yielding the schema that defines the
    /// binary shape.
    pub fn underlying(&self) -> &Schema {
        match self {
            Schema::Logical(l) => l.inner.underlying(),
            other => other,
        }
    }

    /// A short label identifying the type: the full name for named types, the
    /// type keyword otherwise. Used for union-branch uniqueness and messages.
    pub(crate) fn type_label(&self) -> String {
        match self.underlying() {
            Schema::Null => "null".to_string(),
            Schema::Boolean => "boolean".to_string(),
            Schema::Int => "int".to_string(),
            Schema::Long => "long".to_string(),
            Schema::Float => "float".to_string(),
            Schema::Double => "double".to_string(),
            Schema::Bytes => "bytes".to_string(),
            Schema::String => "string".to_string(),
            Schema::Array(_) => "array".to_string(),
            Schema::Map(_) => "map".to_string(),
            Schema::Union(_) => "union".to_string(),
            Schema::Record(r) => r.name.fullname(),
            Schema::Enum(e) => e.name.fullname(),
            Schema::Fixed(f) => f.name.fullname(),
            Schema::Ref(n) => n.fullname(),
            Schema::Logical(_) => unreachable!("underlying() strips annotations"),
        }
    }

    /// Renders the schema back to its JSON form, including defaults, aliases,
    /// and logical annotations. References render as full-name strings.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Schema::Null => JsonValue::String("null".to_string()),
            Schema::Boolean => JsonValue::String("boolean".to_string()),
            Schema::Int => JsonValue::String("int".to_string()),
            Schema::Long => JsonValue::String("long".to_string()),
            Schema::Float => JsonValue::String("float".to_string()),
            Schema::Double => JsonValue::String("double".to_string()),
            Schema::Bytes => JsonValue::String("bytes".to_string()),
            Schema::String => JsonValue::String("string".to_string()),
            Schema::Ref(name) => JsonValue::String(name.fullname()),
            Schema::Array(items) => {
                let mut obj = JsonMap::new();
                obj.insert("type".to_string(), JsonValue::String("array".to_string()));
                obj.insert("items".to_string(), items.to_json());
                JsonValue::Object(obj)
            }
            Schema::Map(values) => {
                let mut obj = JsonMap::new();
                obj.insert("type".to_string(), JsonValue::String("map".to_string()));
                obj.insert("values".to_string(), values.to_json());
                JsonValue::Object(obj)
            }
            Schema::Union(u) => {
                JsonValue::Array(u.variants().iter().map(Schema::to_json).collect())
            }
            Schema::Record(r) => {
                let mut obj = JsonMap::new();
                obj.insert("type".to_string(), JsonValue::String("record".to_string()));
                obj.insert("name".to_string(), JsonValue::String(r.name.fullname()));
                if let Some(doc) = &r.doc {
                    obj.insert("doc".to_string(), JsonValue::String(doc.clone()));
                }
                if !r.aliases.is_empty() {
                    obj.insert(
                        "aliases".to_string(),
                        JsonValue::Array(
                            r.aliases
                                .iter()
                                .map(|a| JsonValue::String(a.fullname()))
                                .collect(),
                        ),
                    );
                }
                let fields = r
                    .fields
                    .iter()
                    .map(|f| {
                        let mut fo = JsonMap::new();
                        fo.insert("name".to_string(), JsonValue::String(f.name.clone()));
                        fo.insert("type".to_string(), f.schema.to_json());
                        if let Some(d) = &f.default {
                            fo.insert("default".to_string(), d.clone());
                        }
                        match f.order {
                            SortOrder::Ascending => {}
                            SortOrder::Descending => {
                                fo.insert(
                                    "order".to_string(),
                                    JsonValue::String("descending".to_string()),
                                );
                            }
                            SortOrder::Ignore => {
                                fo.insert(
                                    "order".to_string(),
                                    JsonValue::String("ignore".to_string()),
                                );
                            }
                        }
                        if !f.aliases.is_empty() {
                            fo.insert(
                                "aliases".to_string(),
                                JsonValue::Array(
                                    f.aliases
                                        .iter()
                                        .map(|a| JsonValue::String(a.clone()))
                                        .collect(),
                                ),
                            );
                        }
                        if let Some(doc) = &f.doc {
                            fo.insert("doc".to_string(), JsonValue::String(doc.clone()));
                        }
                        JsonValue::Object(fo)
                    })
                    .collect();
                obj.insert("fields".to_string(), JsonValue::Array(fields));
                JsonValue::Object(obj)
            }
            Schema::Enum(e) => {
                let mut obj = JsonMap::new();
                obj.insert("type".to_string(), JsonValue::String("enum".to_string()));
                obj.insert("name".to_string(), JsonValue::String(e.name.fullname()));
                obj.insert(
                    "symbols".to_string(),
                    JsonValue::Array(
                        e.symbols
                            .iter()
                            .map(|s| JsonValue::String(s.clone()))
                            .collect(),
                    ),
                );
                if let Some(d) = &e.default {
                    obj.insert("default".to_string(), JsonValue::String(d.clone()));
                }
                JsonValue::Object(obj)
            }
            Schema::Fixed(f) => {
                let mut obj = JsonMap::new();
                obj.insert("type".to_string(), JsonValue::String("fixed".to_string()));
                obj.insert("name".to_string(), JsonValue::String(f.name.fullname()));
                obj.insert("size".to_string(), JsonValue::from(f.size as u64));
                JsonValue::Object(obj)
            }
            Schema::Logical(l) => {
                let inner = l.inner.to_json();
                let mut obj = match inner {
                    JsonValue::Object(o) => o,
                    JsonValue::String(s) => {
                        let mut o = JsonMap::new();
                        o.insert("type".to_string(), JsonValue::String(s));
                        o
                    }
                    other => {
                        let mut o = JsonMap::new();
                        o.insert("type".to_string(), other);
                        o
                    }
                };
                for (key, value) in &l.props {
                    obj.entry(key.clone()).or_insert_with(|| value.clone());
                }
                JsonValue::Object(obj)
            }
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.to_json()) {
            Ok(text) => write!(f, "{}", text),
            Err(_) => Err(fmt::Error),
        }
    }
}

//==================================================================================
// 3. The Named-Type Registry
//==================================================================================

/// Registry mapping full names to their owning definitions. All other
/// occurrences of a named type are [`Schema::Ref`] lookups into this map, so a
/// recursive definition is a graph with back-edges, not a duplicated tree.
#[derive(Debug, Default, Clone)]
pub struct Names {
    map: HashMap<String, Schema>,
}

impl Names {
    /// Collects every named definition reachable from `root`.
    pub fn from_schema(root: &Schema) -> Result<Names, CaskError> {
        let mut names = Names::default();
        names.collect(root)?;
        Ok(names)
    }

    fn collect(&mut self, schema: &Schema) -> Result<(), CaskError> {
        match schema {
            Schema::Record(r) => {
                self.map
                    .insert(r.name.fullname(), schema.clone());
                for field in &r.fields {
                    self.collect(&field.schema)?;
                }
            }
            Schema::Enum(e) => {
                self.map.insert(e.name.fullname(), schema.clone());
            }
            Schema::Fixed(f) => {
                self.map.insert(f.name.fullname(), schema.clone());
            }
            Schema::Array(items) => self.collect(items)?,
            Schema::Map(values) => self.collect(values)?,
            Schema::Union(u) => {
                for variant in u.variants() {
                    self.collect(variant)?;
                }
            }
            Schema::Logical(l) => self.collect(&l.inner)?,
            _ => {}
        }
        Ok(())
    }

    pub fn get(&self, fullname: &str) -> Option<&Schema> {
        self.map.get(fullname)
    }

    pub fn contains(&self, fullname: &str) -> bool {
        self.map.contains_key(fullname)
    }
}

/// Follows references and strips logical annotations until a concrete shape
/// remains. A dangling reference is an internal error: the parser and the
/// validated constructors never produce one.
pub(crate) fn strip<'a>(schema: &'a Schema, names: &'a Names) -> Result<&'a Schema, CaskError> {
    match schema {
        Schema::Ref(name) => {
            let full = name.fullname();
            match names.get(&full) {
                Some(def) => strip(def, names),
                None => Err(CaskError::Internal(format!(
                    "unresolved schema reference '{}'",
                    full
                ))),
            }
        }
        Schema::Logical(l) => strip(&l.inner, names),
        concrete => Ok(concrete),
    }
}

//==================================================================================
// 4. The JSON Parser
//==================================================================================

#[derive(Default)]
struct Parser {
    /// Completed named definitions, keyed by full name.
    names: HashMap<String, ()>,
    /// Named definitions currently being parsed; self-references resolve
    /// against this set.
    pending: HashSet<String>,
}

impl Parser {
    fn parse(&mut self, json: &JsonValue, enclosing_ns: Option<&str>) -> Result<Schema, CaskError> {
        match json {
            JsonValue::String(s) => self.parse_type_name(s, enclosing_ns),
            JsonValue::Array(branches) => self.parse_union(branches, enclosing_ns),
            JsonValue::Object(obj) => self.parse_object(obj, enclosing_ns),
            other => Err(CaskError::SchemaParse(format!(
                "expected a type name, object, or union, found {}",
                other
            ))),
        }
    }

    fn parse_type_name(
        &mut self,
        name: &str,
        enclosing_ns: Option<&str>,
    ) -> Result<Schema, CaskError> {
        match name {
            "null" => Ok(Schema::Null),
            "boolean" => Ok(Schema::Boolean),
            "int" => Ok(Schema::Int),
            "long" => Ok(Schema::Long),
            "float" => Ok(Schema::Float),
            "double" => Ok(Schema::Double),
            "bytes" => Ok(Schema::Bytes),
            "string" => Ok(Schema::String),
            other => self.resolve_reference(other, enclosing_ns),
        }
    }

    /// A non-primitive type name must refer to a named type already defined
    /// (or currently being defined) in this parse.
    fn resolve_reference(
        &mut self,
        raw: &str,
        enclosing_ns: Option<&str>,
    ) -> Result<Schema, CaskError> {
        let qualified = Name::parse(raw, None, enclosing_ns)?;
        let bare = Name::parse(raw, None, None)?;
        for candidate in [&qualified, &bare] {
            let full = candidate.fullname();
            if self.names.contains_key(&full) || self.pending.contains(&full) {
                return Ok(Schema::Ref(candidate.clone()));
            }
        }
        Err(CaskError::SchemaParse(format!(
            "undefined type reference '{}'",
            raw
        )))
    }

    fn parse_union(
        &mut self,
        branches: &[JsonValue],
        enclosing_ns: Option<&str>,
    ) -> Result<Schema, CaskError> {
        let variants = branches
            .iter()
            .map(|b| self.parse(b, enclosing_ns))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Schema::Union(UnionSchema::new(variants)?))
    }

    fn parse_object(
        &mut self,
        obj: &JsonMap<String, JsonValue>,
        enclosing_ns: Option<&str>,
    ) -> Result<Schema, CaskError> {
        let type_attr = obj
            .get("type")
            .ok_or_else(|| CaskError::SchemaParse("schema object lacks a 'type'".to_string()))?;

        let base = match type_attr {
            JsonValue::String(kind) => match kind.as_str() {
                "record" => self.parse_record(obj, enclosing_ns)?,
                "enum" => self.parse_enum(obj, enclosing_ns)?,
                "fixed" => self.parse_fixed(obj, enclosing_ns)?,
                "array" => {
                    let items = obj.get("items").ok_or_else(|| {
                        CaskError::SchemaParse("array schema lacks 'items'".to_string())
                    })?;
                    Schema::Array(Box::new(self.parse(items, enclosing_ns)?))
                }
                "map" => {
                    let values = obj.get("values").ok_or_else(|| {
                        CaskError::SchemaParse("map schema lacks 'values'".to_string())
                    })?;
                    Schema::Map(Box::new(self.parse(values, enclosing_ns)?))
                }
                other => self.parse_type_name(other, enclosing_ns)?,
            },
            // {"type": [...]} and {"type": {...}} delegate to the nested form.
            nested => self.parse(nested, enclosing_ns)?,
        };

        Ok(wrap_logical(base, obj))
    }

    fn parse_record(
        &mut self,
        obj: &JsonMap<String, JsonValue>,
        enclosing_ns: Option<&str>,
    ) -> Result<Schema, CaskError> {
        let name = self.parse_name(obj, enclosing_ns)?;
        let full = name.fullname();
        self.register_pending(&full)?;
        let record_ns = name.namespace.clone();

        let fields_json = obj
            .get("fields")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| {
                CaskError::SchemaParse(format!("record '{}' lacks a 'fields' array", full))
            })?;

        let mut fields = Vec::with_capacity(fields_json.len());
        for field_json in fields_json {
            let field_obj = field_json.as_object().ok_or_else(|| {
                CaskError::SchemaParse(format!("field of record '{}' is not an object", full))
            })?;
            let field_name = field_obj
                .get("name")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| {
                    CaskError::SchemaParse(format!("field of record '{}' lacks a name", full))
                })?;
            validate_name_part(field_name)?;
            let type_json = field_obj.get("type").ok_or_else(|| {
                CaskError::SchemaParse(format!("field '{}.{}' lacks a type", full, field_name))
            })?;
            let schema = self.parse(type_json, record_ns.as_deref())?;
            let order = match field_obj.get("order").and_then(JsonValue::as_str) {
                None | Some("ascending") => SortOrder::Ascending,
                Some("descending") => SortOrder::Descending,
                Some("ignore") => SortOrder::Ignore,
                Some(other) => {
                    return Err(CaskError::SchemaParse(format!(
                        "field '{}.{}' has invalid order '{}'",
                        full, field_name, other
                    )))
                }
            };
            let aliases = match field_obj.get("aliases") {
                None => Vec::new(),
                Some(JsonValue::Array(items)) => items
                    .iter()
                    .map(|a| {
                        a.as_str().map(str::to_string).ok_or_else(|| {
                            CaskError::SchemaParse(format!(
                                "field '{}.{}' has a non-string alias",
                                full, field_name
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                Some(_) => {
                    return Err(CaskError::SchemaParse(format!(
                        "field '{}.{}' aliases must be an array",
                        full, field_name
                    )))
                }
            };
            fields.push(Field {
                name: field_name.to_string(),
                doc: field_obj
                    .get("doc")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string),
                schema,
                default: field_obj.get("default").cloned(),
                order,
                aliases,
                position: 0,
            });
        }

        let mut record = RecordSchema::new(name, fields)?;
        record.doc = obj
            .get("doc")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        record.aliases = self.parse_aliases(obj, record.name.namespace.as_deref())?;

        self.complete_pending(&full);
        Ok(Schema::Record(record))
    }

    fn parse_enum(
        &mut self,
        obj: &JsonMap<String, JsonValue>,
        enclosing_ns: Option<&str>,
    ) -> Result<Schema, CaskError> {
        let name = self.parse_name(obj, enclosing_ns)?;
        let full = name.fullname();
        self.register_pending(&full)?;

        let symbols = obj
            .get("symbols")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| {
                CaskError::SchemaParse(format!("enum '{}' lacks a 'symbols' array", full))
            })?
            .iter()
            .map(|s| {
                s.as_str().map(str::to_string).ok_or_else(|| {
                    CaskError::SchemaParse(format!("enum '{}' has a non-string symbol", full))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let default = obj
            .get("default")
            .and_then(JsonValue::as_str)
            .map(str::to_string);

        let mut schema = EnumSchema::new(name, symbols, default)?;
        schema.doc = obj
            .get("doc")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        schema.aliases = self.parse_aliases(obj, schema.name.namespace.as_deref())?;

        self.complete_pending(&full);
        Ok(Schema::Enum(schema))
    }

    fn parse_fixed(
        &mut self,
        obj: &JsonMap<String, JsonValue>,
        enclosing_ns: Option<&str>,
    ) -> Result<Schema, CaskError> {
        let name = self.parse_name(obj, enclosing_ns)?;
        let full = name.fullname();
        self.register_pending(&full)?;

        let size = obj
            .get("size")
            .and_then(JsonValue::as_u64)
            .ok_or_else(|| {
                CaskError::SchemaParse(format!("fixed '{}' lacks a non-negative 'size'", full))
            })?;

        let schema = FixedSchema {
            aliases: self.parse_aliases(obj, name.namespace.as_deref())?,
            doc: obj
                .get("doc")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            name,
            size: size as usize,
        };

        self.complete_pending(&full);
        Ok(Schema::Fixed(schema))
    }

    fn parse_name(
        &mut self,
        obj: &JsonMap<String, JsonValue>,
        enclosing_ns: Option<&str>,
    ) -> Result<Name, CaskError> {
        let raw = obj
            .get("name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| CaskError::SchemaParse("named schema lacks a 'name'".to_string()))?;
        let namespace_attr = obj.get("namespace").and_then(JsonValue::as_str);
        Name::parse(raw, namespace_attr, enclosing_ns)
    }

    fn parse_aliases(
        &mut self,
        obj: &JsonMap<String, JsonValue>,
        namespace: Option<&str>,
    ) -> Result<Vec<Name>, CaskError> {
        match obj.get("aliases") {
            None => Ok(Vec::new()),
            Some(JsonValue::Array(items)) => items
                .iter()
                .map(|a| {
                    let raw = a.as_str().ok_or_else(|| {
                        CaskError::SchemaParse("aliases must be strings".to_string())
                    })?;
                    Name::parse(raw, None, namespace)
                })
                .collect(),
            Some(_) => Err(CaskError::SchemaParse(
                "aliases must be an array".to_string(),
            )),
        }
    }

    fn register_pending(&mut self, full: &str) -> Result<(), CaskError> {
        if self.names.contains_key(full) || !self.pending.insert(full.to_string()) {
            return Err(CaskError::SchemaParse(format!(
                "duplicate definition of type '{}'",
                full
            )));
        }
        Ok(())
    }

    fn complete_pending(&mut self, full: &str) {
        self.pending.remove(full);
        self.names.insert(full.to_string(), ());
    }
}

/// Wraps `base` in a logical annotation when the defining object carries a
/// `logicalType` attribute. All sibling attributes travel with the annotation.
fn wrap_logical(base: Schema, obj: &JsonMap<String, JsonValue>) -> Schema {
    let logical_name = match obj.get("logicalType").and_then(JsonValue::as_str) {
        Some(name) => name.to_string(),
        None => return base,
    };
    let mut props = JsonMap::new();
    for (key, value) in obj {
        if key != "type" {
            props.insert(key.clone(), value.clone());
        }
    }
    Schema::Logical(LogicalSchema {
        name: logical_name,
        inner: Box::new(base),
        props,
    })
}

//==================================================================================
// 5. Default-Value Validation
//==================================================================================

/// Walks a parsed schema and checks every field default against the field's
/// type. Union defaults validate against the first branch; numeric widening
/// mirrors what resolution allows.
fn validate_schema_defaults(schema: &Schema, names: &Names) -> Result<(), CaskError> {
    match schema {
        Schema::Record(r) => {
            for field in &r.fields {
                if let Some(default) = &field.default {
                    validate_default(&field.schema, default, names).map_err(|e| {
                        CaskError::SchemaParse(format!(
                            "invalid default for field '{}.{}': {}",
                            r.name, field.name, e
                        ))
                    })?;
                }
                validate_schema_defaults(&field.schema, names)?;
            }
        }
        Schema::Array(items) => validate_schema_defaults(items, names)?,
        Schema::Map(values) => validate_schema_defaults(values, names)?,
        Schema::Union(u) => {
            for variant in u.variants() {
                validate_schema_defaults(variant, names)?;
            }
        }
        Schema::Logical(l) => validate_schema_defaults(&l.inner, names)?,
        _ => {}
    }
    Ok(())
}

pub(crate) fn validate_default(
    schema: &Schema,
    default: &JsonValue,
    names: &Names,
) -> Result<(), String> {
    let concrete = strip(schema, names).map_err(|e| e.to_string())?;
    match concrete {
        Schema::Null => match default {
            JsonValue::Null => Ok(()),
            other => Err(format!("expected null, found {}", other)),
        },
        Schema::Boolean => match default {
            JsonValue::Bool(_) => Ok(()),
            other => Err(format!("expected boolean, found {}", other)),
        },
        Schema::Int => match default.as_i64() {
            Some(n) if i32::try_from(n).is_ok() => Ok(()),
            _ => Err(format!("expected 32-bit integer, found {}", default)),
        },
        Schema::Long => match default.as_i64() {
            Some(_) => Ok(()),
            None => Err(format!("expected integer, found {}", default)),
        },
        Schema::Float | Schema::Double => match default.as_f64() {
            Some(_) => Ok(()),
            None => Err(format!("expected number, found {}", default)),
        },
        Schema::String => match default {
            JsonValue::String(_) => Ok(()),
            other => Err(format!("expected string, found {}", other)),
        },
        Schema::Bytes => match default {
            JsonValue::String(s) if s.chars().all(|c| (c as u32) < 256) => Ok(()),
            other => Err(format!("expected byte string, found {}", other)),
        },
        Schema::Fixed(f) => match default {
            JsonValue::String(s)
                if s.chars().count() == f.size && s.chars().all(|c| (c as u32) < 256) =>
            {
                Ok(())
            }
            other => Err(format!("expected {}-byte string, found {}", f.size, other)),
        },
        Schema::Enum(e) => match default.as_str() {
            Some(s) if e.symbol_index(s).is_some() => Ok(()),
            _ => Err(format!("expected one of {:?}, found {}", e.symbols, default)),
        },
        Schema::Array(items) => match default {
            JsonValue::Array(entries) => {
                for entry in entries {
                    validate_default(items, entry, names)?;
                }
                Ok(())
            }
            other => Err(format!("expected array, found {}", other)),
        },
        Schema::Map(values) => match default {
            JsonValue::Object(entries) => {
                for entry in entries.values() {
                    validate_default(values, entry, names)?;
                }
                Ok(())
            }
            other => Err(format!("expected object, found {}", other)),
        },
        Schema::Union(u) => match u.variants().first() {
            Some(first) => validate_default(first, default, names),
            None => Err("union has no branches".to_string()),
        },
        Schema::Record(r) => match default {
            JsonValue::Object(entries) => {
                for field in &r.fields {
                    match entries.get(&field.name) {
                        Some(value) => validate_default(&field.schema, value, names)?,
                        None if field.default.is_some() => {}
                        None => {
                            return Err(format!(
                                "record default lacks a value for field '{}'",
                                field.name
                            ))
                        }
                    }
                }
                Ok(())
            }
            other => Err(format!("expected object, found {}", other)),
        },
        Schema::Logical(_) | Schema::Ref(_) => unreachable!("strip() removes these"),
    }
}

//==================================================================================
// 6. Unit Tests
//==================================================================================
