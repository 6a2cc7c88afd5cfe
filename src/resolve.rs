//! The resolving decoder: reads bytes produced under a writer schema and
//! yields values shaped by a reader schema.
//!
//! Construction is a plan-then-execute split. `ResolvingDecoder::new` first
//! runs the compatibility checker and refuses construction on any finding;
//! it then compiles a resolution plan into an arena of nodes linked by index,
//! memoizing per (writer record, reader record) pair so recursive schemas
//! yield finite plans. Decoding executes the plan against the input with no
//! further schema analysis.

use std::collections::HashMap;
use std::io::Read;

use crate::codec::decode::{
    decode_value, read_block_count, read_exact, read_len_prefixed, read_map_key, skip_value,
};
use crate::codec::varint::{read_int, read_long};
use crate::compat;
use crate::error::CaskError;
use crate::schema::{strip, Names, Schema};
use crate::value::Value;

//==================================================================================
// 1. Plan Representation
//==================================================================================

/// Writer-to-reader widenings the plan can apply while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Promotion {
    IntToLong,
    IntToFloat,
    IntToDouble,
    LongToFloat,
    LongToDouble,
    FloatToDouble,
    BytesToString,
    StringToBytes,
}

/// One writer field's fate during record decoding.
#[derive(Debug)]
enum FieldAction {
    /// Decode through `plan` into the reader field at `reader_position`.
    Read { reader_position: usize, plan: usize },
    /// Decode and discard; the schema is writer-side.
    Skip(Schema),
}

#[derive(Debug)]
enum PlanNode {
    /// Writer and reader shapes agree: plain decode with the reader schema.
    Direct(Schema),
    Promote(Promotion),
    Record {
        /// Actions for the writer's fields, in writer declaration order.
        actions: Vec<FieldAction>,
        /// Reader-only fields: (position, materialized default).
        defaults: Vec<(usize, Value)>,
        /// Reader field names in declaration order.
        reader_fields: Vec<String>,
    },
    Enum {
        /// Writer symbol index -> reader symbol index.
        mapping: Vec<Option<usize>>,
        /// Reader symbols.
        symbols: Vec<String>,
        /// Reader default symbol index, substituted for unknown writer
        /// symbols.
        default: Option<usize>,
    },
    Array(usize),
    Map(usize),
    Fixed(usize),
    /// Writer union: per writer branch, the reader branch to re-tag with
    /// (when the reader is a union) and the branch plan.
    WriterUnion { branches: Vec<(Option<usize>, usize)> },
    /// Non-union writer decoded into a union reader branch.
    ReaderUnion { branch: usize, plan: usize },
    /// Reserved slot while a recursive record pair is being compiled.
    Placeholder,
}

//==================================================================================
// 2. Construction
//==================================================================================

/// Decodes writer-encoded bytes into reader-shaped values.
#[derive(Debug)]
pub struct ResolvingDecoder {
    reader_names: Names,
    writer_names: Names,
    nodes: Vec<PlanNode>,
    root: usize,
}

impl ResolvingDecoder {
    /// Builds the resolution plan for the pair, failing with
    /// [`CaskError::SchemaResolution`] if the compatibility checker reports
    /// anything.
    pub fn new(writer: &Schema, reader: &Schema) -> Result<Self, CaskError> {
        let report = compat::check(reader, writer)?;
        if !report.is_compatible() {
            return Err(CaskError::SchemaResolution(report.into_incompatibilities()));
        }

        let reader_names = Names::from_schema(reader)?;
        let writer_names = Names::from_schema(writer)?;

        let mut builder = PlanBuilder {
            reader_names: &reader_names,
            writer_names: &writer_names,
            nodes: Vec::new(),
            memo: HashMap::new(),
        };

        // Identity resolution decodes with the reader schema outright.
        let root = if writer.canonical_form() == reader.canonical_form() {
            builder.nodes.push(PlanNode::Direct(reader.clone()));
            builder.nodes.len() - 1
        } else {
            builder.build(writer, reader)?
        };

        let nodes = builder.nodes;
        Ok(ResolvingDecoder {
            reader_names,
            writer_names,
            nodes,
            root,
        })
    }

    /// Decodes one value from `input`.
    pub fn decode<R: Read>(&self, input: &mut R) -> Result<Value, CaskError> {
        self.decode_node(self.root, input)
    }

    fn decode_node<R: Read>(&self, index: usize, input: &mut R) -> Result<Value, CaskError> {
        match &self.nodes[index] {
            PlanNode::Direct(schema) => decode_value(schema, &self.reader_names, input),
            PlanNode::Promote(promotion) => self.decode_promotion(*promotion, input),
            PlanNode::Record {
                actions,
                defaults,
                reader_fields,
            } => {
                let mut slots: Vec<Option<Value>> = Vec::with_capacity(reader_fields.len());
                slots.resize_with(reader_fields.len(), || None);
                for action in actions {
                    match action {
                        FieldAction::Read {
                            reader_position,
                            plan,
                        } => {
                            slots[*reader_position] = Some(self.decode_node(*plan, input)?);
                        }
                        FieldAction::Skip(schema) => {
                            skip_value(schema, &self.writer_names, input)?;
                        }
                    }
                }
                for (position, default) in defaults {
                    slots[*position] = Some(default.clone());
                }
                let mut fields = Vec::with_capacity(reader_fields.len());
                for (name, slot) in reader_fields.iter().zip(slots) {
                    let value = slot.ok_or_else(|| {
                        CaskError::Internal(format!("record field '{}' left unfilled", name))
                    })?;
                    fields.push((name.clone(), value));
                }
                Ok(Value::Record(fields))
            }
            PlanNode::Enum {
                mapping,
                symbols,
                default,
            } => {
                let raw = read_int(input)?;
                let writer_index = usize::try_from(raw).ok().filter(|i| *i < mapping.len());
                let writer_slot = match writer_index {
                    Some(i) => mapping[i],
                    None => {
                        return Err(CaskError::Decode(format!(
                            "enum index {} out of range for writer schema",
                            raw
                        )))
                    }
                };
                match writer_slot.or(*default) {
                    Some(reader_index) => {
                        Ok(Value::Enum(reader_index, symbols[reader_index].clone()))
                    }
                    None => Err(CaskError::Decode(
                        "writer enum symbol is unknown to the reader and no default is declared"
                            .to_string(),
                    )),
                }
            }
            PlanNode::Array(item_plan) => {
                let mut values = Vec::new();
                loop {
                    let count = read_block_count(input)?;
                    if count == 0 {
                        break;
                    }
                    for _ in 0..count {
                        values.push(self.decode_node(*item_plan, input)?);
                    }
                }
                Ok(Value::Array(values))
            }
            PlanNode::Map(value_plan) => {
                let mut entries = HashMap::new();
                loop {
                    let count = read_block_count(input)?;
                    if count == 0 {
                        break;
                    }
                    for _ in 0..count {
                        let key = read_map_key(input)?;
                        entries.insert(key, self.decode_node(*value_plan, input)?);
                    }
                }
                Ok(Value::Map(entries))
            }
            PlanNode::Fixed(size) => {
                let mut buf = vec![0u8; *size];
                read_exact(input, &mut buf)?;
                Ok(Value::Fixed(buf))
            }
            PlanNode::WriterUnion { branches } => {
                let raw = read_long(input)?;
                let (retag, plan) = usize::try_from(raw)
                    .ok()
                    .and_then(|i| branches.get(i))
                    .ok_or_else(|| {
                        CaskError::Decode(format!(
                            "union branch index {} out of range ({} branches)",
                            raw,
                            branches.len()
                        ))
                    })?;
                let value = self.decode_node(*plan, input)?;
                Ok(match retag {
                    Some(reader_branch) => Value::Union(*reader_branch, Box::new(value)),
                    None => value,
                })
            }
            PlanNode::ReaderUnion { branch, plan } => {
                let value = self.decode_node(*plan, input)?;
                Ok(Value::Union(*branch, Box::new(value)))
            }
            PlanNode::Placeholder => Err(CaskError::Internal(
                "resolution plan contains an unfilled node".to_string(),
            )),
        }
    }

    fn decode_promotion<R: Read>(
        &self,
        promotion: Promotion,
        input: &mut R,
    ) -> Result<Value, CaskError> {
        match promotion {
            Promotion::IntToLong => Ok(Value::Long(i64::from(read_int(input)?))),
            Promotion::IntToFloat => Ok(Value::Float(read_int(input)? as f32)),
            Promotion::IntToDouble => Ok(Value::Double(f64::from(read_int(input)?))),
            Promotion::LongToFloat => Ok(Value::Float(read_long(input)? as f32)),
            Promotion::LongToDouble => Ok(Value::Double(read_long(input)? as f64)),
            Promotion::FloatToDouble => {
                let mut buf = [0u8; 4];
                read_exact(input, &mut buf)?;
                Ok(Value::Double(f64::from(f32::from_le_bytes(buf))))
            }
            Promotion::BytesToString => {
                let raw = read_len_prefixed(input)?;
                String::from_utf8(raw)
                    .map(Value::String)
                    .map_err(|e| CaskError::Decode(format!("invalid UTF-8 in promoted bytes: {}", e)))
            }
            Promotion::StringToBytes => Ok(Value::Bytes(read_len_prefixed(input)?)),
        }
    }
}

//==================================================================================
// 3. The Plan Builder
//==================================================================================

struct PlanBuilder<'a> {
    reader_names: &'a Names,
    writer_names: &'a Names,
    nodes: Vec<PlanNode>,
    /// (writer full name, reader full name) -> node index.
    memo: HashMap<(String, String), usize>,
}

impl<'a> PlanBuilder<'a> {
    fn push(&mut self, node: PlanNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Compiles the plan for one (writer, reader) pair. The compatibility
    /// checker has already passed this pair, so an unmatched shape here is an
    /// internal error, not a user one.
    fn build(&mut self, writer: &Schema, reader: &Schema) -> Result<usize, CaskError> {
        let w = strip(writer, self.writer_names)?;
        let r = strip(reader, self.reader_names)?;

        match (w, r) {
            (Schema::Union(wu), _) => {
                let reader_union = match r {
                    Schema::Union(ru) => Some(ru),
                    _ => None,
                };
                let mut branches = Vec::with_capacity(wu.variants().len());
                for writer_branch in wu.variants() {
                    match reader_union {
                        Some(ru) => {
                            let (reader_index, reader_branch) = self
                                .first_matching_branch(ru.variants(), writer_branch)?
                                .ok_or_else(|| {
                                    CaskError::Internal(
                                        "checker passed a union pair with an unmatched branch"
                                            .to_string(),
                                    )
                                })?;
                            let plan = self.build(writer_branch, reader_branch)?;
                            branches.push((Some(reader_index), plan));
                        }
                        None => {
                            let plan = self.build(writer_branch, reader)?;
                            branches.push((None, plan));
                        }
                    }
                }
                Ok(self.push(PlanNode::WriterUnion { branches }))
            }
            (_, Schema::Union(ru)) => {
                let (branch, reader_branch) = self
                    .first_matching_branch(ru.variants(), writer)?
                    .ok_or_else(|| {
                        CaskError::Internal(
                            "checker passed a writer type no reader branch accepts".to_string(),
                        )
                    })?;
                let plan = self.build(writer, reader_branch)?;
                Ok(self.push(PlanNode::ReaderUnion { branch, plan }))
            }
            (Schema::Null, Schema::Null) => Ok(self.push(PlanNode::Direct(Schema::Null))),
            (Schema::Boolean, Schema::Boolean) => {
                Ok(self.push(PlanNode::Direct(Schema::Boolean)))
            }
            (Schema::Int, Schema::Int) => Ok(self.push(PlanNode::Direct(Schema::Int))),
            (Schema::Long, Schema::Long) => Ok(self.push(PlanNode::Direct(Schema::Long))),
            (Schema::Float, Schema::Float) => Ok(self.push(PlanNode::Direct(Schema::Float))),
            (Schema::Double, Schema::Double) => Ok(self.push(PlanNode::Direct(Schema::Double))),
            (Schema::Bytes, Schema::Bytes) => Ok(self.push(PlanNode::Direct(Schema::Bytes))),
            (Schema::String, Schema::String) => Ok(self.push(PlanNode::Direct(Schema::String))),

            (Schema::Int, Schema::Long) => Ok(self.push(PlanNode::Promote(Promotion::IntToLong))),
            (Schema::Int, Schema::Float) => {
                Ok(self.push(PlanNode::Promote(Promotion::IntToFloat)))
            }
            (Schema::Int, Schema::Double) => {
                Ok(self.push(PlanNode::Promote(Promotion::IntToDouble)))
            }
            (Schema::Long, Schema::Float) => {
                Ok(self.push(PlanNode::Promote(Promotion::LongToFloat)))
            }
            (Schema::Long, Schema::Double) => {
                Ok(self.push(PlanNode::Promote(Promotion::LongToDouble)))
            }
            (Schema::Float, Schema::Double) => {
                Ok(self.push(PlanNode::Promote(Promotion::FloatToDouble)))
            }
            (Schema::Bytes, Schema::String) => {
                Ok(self.push(PlanNode::Promote(Promotion::BytesToString)))
            }
            (Schema::String, Schema::Bytes) => {
                Ok(self.push(PlanNode::Promote(Promotion::StringToBytes)))
            }

            (Schema::Fixed(_), Schema::Fixed(rf)) => Ok(self.push(PlanNode::Fixed(rf.size))),

            (Schema::Enum(we), Schema::Enum(re)) => {
                let mapping = we
                    .symbols
                    .iter()
                    .map(|symbol| re.symbol_index(symbol))
                    .collect();
                let default = re.default.as_deref().and_then(|d| re.symbol_index(d));
                Ok(self.push(PlanNode::Enum {
                    mapping,
                    symbols: re.symbols.clone(),
                    default,
                }))
            }

            (Schema::Array(w_items), Schema::Array(r_items)) => {
                let item_plan = self.build(w_items, r_items)?;
                Ok(self.push(PlanNode::Array(item_plan)))
            }
            (Schema::Map(w_values), Schema::Map(r_values)) => {
                let value_plan = self.build(w_values, r_values)?;
                Ok(self.push(PlanNode::Map(value_plan)))
            }

            (Schema::Record(wr), Schema::Record(rr)) => {
                let key = (wr.name.fullname(), rr.name.fullname());
                if let Some(&existing) = self.memo.get(&key) {
                    return Ok(existing);
                }
                let index = self.push(PlanNode::Placeholder);
                self.memo.insert(key, index);

                // Reader fields are matched to writer fields by name (or
                // reader alias), never by position.
                let mut matched_reader: Vec<bool> = vec![false; rr.fields.len()];
                let mut actions = Vec::with_capacity(wr.fields.len());
                for w_field in &wr.fields {
                    let r_field = rr.field(&w_field.name).or_else(|| {
                        rr.fields
                            .iter()
                            .find(|rf| rf.aliases.iter().any(|a| a == &w_field.name))
                    });
                    match r_field {
                        Some(r_field) => {
                            matched_reader[r_field.position] = true;
                            let plan = self.build(&w_field.schema, &r_field.schema)?;
                            actions.push(FieldAction::Read {
                                reader_position: r_field.position,
                                plan,
                            });
                        }
                        None => actions.push(FieldAction::Skip(w_field.schema.clone())),
                    }
                }

                let mut defaults = Vec::new();
                for (position, r_field) in rr.fields.iter().enumerate() {
                    if matched_reader[position] {
                        continue;
                    }
                    let json = r_field.default.as_ref().ok_or_else(|| {
                        CaskError::Internal(format!(
                            "checker passed record pair but reader field '{}' has no default",
                            r_field.name
                        ))
                    })?;
                    let value = Value::from_json(json, &r_field.schema, self.reader_names)?;
                    defaults.push((position, value));
                }

                let reader_fields = rr.fields.iter().map(|f| f.name.clone()).collect();
                self.nodes[index] = PlanNode::Record {
                    actions,
                    defaults,
                    reader_fields,
                };
                Ok(index)
            }

            (w, r) => Err(CaskError::Internal(format!(
                "checker passed an unresolvable pair: writer {} vs reader {}",
                w.type_label(),
                r.type_label()
            ))),
        }
    }

    /// First reader branch, in declaration order, that the checker accepts
    /// for this writer type.
    fn first_matching_branch<'s>(
        &self,
        reader_branches: &'s [Schema],
        writer: &Schema,
    ) -> Result<Option<(usize, &'s Schema)>, CaskError> {
        for (index, branch) in reader_branches.iter().enumerate() {
            let report =
                compat::check_with_names(branch, writer, self.reader_names, self.writer_names)?;
            if report.is_compatible() {
                return Ok(Some((index, branch)));
            }
        }
        Ok(None)
    }
}

//==================================================================================
// 4. Unit Tests
//==================================================================================
