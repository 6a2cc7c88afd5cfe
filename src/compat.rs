//! Static schema-compatibility checking.
//!
//! `check(reader, writer)` is the static counterpart of the resolving
//! decoder: it walks the two schemas structurally, with no I/O and no data,
//! and returns a report of every reason writer-encoded bytes could not be
//! resolved into reader-shaped values. An empty report means the pair is
//! safely resolvable; the resolving decoder refuses construction for any
//! pair this checker rejects.
//!
//! Recursive schema pairs are cut off by a visited set keyed by the
//! (reader full name, writer full name) pair: a revisited pair is treated as
//! compatible, since a genuine mismatch was already reported at first visit.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::error::CaskError;
use crate::schema::{strip, Names, Schema, UnionSchema};

//==================================================================================
// 1. Report Types
//==================================================================================

/// What went wrong at one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompatibilityKind {
    /// The writer type cannot be read (or promoted) as the reader type.
    TypeMismatch,
    /// Record/enum/fixed full names differ and no reader alias matches.
    NameMismatch,
    /// Two fixed schemas with different byte lengths.
    FixedSizeMismatch,
    /// Writer symbols absent from the reader, and the reader has no default.
    MissingEnumSymbols,
    /// The reader has a field the writer lacks, and that field has no default.
    ReaderFieldMissingDefaultValue,
    /// A writer value has no reader union branch that accepts it.
    MissingUnionBranch,
}

/// One located reason the schemas fail to resolve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incompatibility {
    pub kind: IncompatibilityKind,
    /// JSON-pointer-like path from the schema root, e.g. `/fields/0/type`.
    pub path: String,
    pub message: String,
}

impl Incompatibility {
    pub fn new(
        kind: IncompatibilityKind,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Incompatibility {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({:?})", self.path, self.message, self.kind)
    }
}

/// Every reason two schemas fail to resolve; empty means compatible.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompatibilityReport {
    incompatibilities: Vec<Incompatibility>,
}

impl CompatibilityReport {
    pub fn is_compatible(&self) -> bool {
        self.incompatibilities.is_empty()
    }

    pub fn incompatibilities(&self) -> &[Incompatibility] {
        &self.incompatibilities
    }

    pub fn into_incompatibilities(self) -> Vec<Incompatibility> {
        self.incompatibilities
    }
}

//==================================================================================
// 2. Public API
//==================================================================================

/// Statically determines whether writer-encoded data can be resolved into
/// reader-shaped values, reporting every located incompatibility instead of
/// stopping at the first.
pub fn check(reader: &Schema, writer: &Schema) -> Result<CompatibilityReport, CaskError> {
    let reader_names = Names::from_schema(reader)?;
    let writer_names = Names::from_schema(writer)?;
    check_with_names(reader, writer, &reader_names, &writer_names)
}

/// Names-aware entry point for callers that hold sub-schemas whose named
/// definitions live elsewhere in their documents (the resolving decoder's
/// plan builder).
pub(crate) fn check_with_names(
    reader: &Schema,
    writer: &Schema,
    reader_names: &Names,
    writer_names: &Names,
) -> Result<CompatibilityReport, CaskError> {
    let mut checker = Checker {
        reader_names,
        writer_names,
        visited: HashSet::new(),
        findings: Vec::new(),
    };
    checker.check_pair(reader, writer, "/")?;
    Ok(CompatibilityReport {
        incompatibilities: checker.findings,
    })
}

//==================================================================================
// 3. The Checker Walk
//==================================================================================

struct Checker<'a> {
    reader_names: &'a Names,
    writer_names: &'a Names,
    /// (reader full name, writer full name) pairs already entered.
    visited: HashSet<(String, String)>,
    findings: Vec<Incompatibility>,
}

impl<'a> Checker<'a> {
    fn check_pair(
        &mut self,
        reader: &Schema,
        writer: &Schema,
        path: &str,
    ) -> Result<(), CaskError> {
        let r = strip(reader, self.reader_names)?;
        let w = strip(writer, self.writer_names)?;

        match (r, w) {
            // Every writer branch must be readable on its own: the branch
            // index is chosen by the writer at encode time.
            (_, Schema::Union(wu)) => {
                for (i, branch) in wu.variants().iter().enumerate() {
                    let branch_path = child(path, &format!("branches/{}", i));
                    self.check_pair(r, branch, &branch_path)?;
                }
                Ok(())
            }
            // A non-union writer value needs at least one accepting reader
            // branch, searched in reader declaration order.
            (Schema::Union(ru), _) => {
                if !self.any_branch_accepts(ru, w)? {
                    self.findings.push(Incompatibility::new(
                        IncompatibilityKind::MissingUnionBranch,
                        path,
                        format!(
                            "no reader branch accepts writer type {}",
                            w.type_label()
                        ),
                    ));
                }
                Ok(())
            }
            (r, w) => self.check_concrete(r, w, path),
        }
    }

    fn check_concrete(
        &mut self,
        reader: &Schema,
        writer: &Schema,
        path: &str,
    ) -> Result<(), CaskError> {
        match (reader, writer) {
            (Schema::Null, Schema::Null)
            | (Schema::Boolean, Schema::Boolean)
            | (Schema::Int, Schema::Int)
            | (Schema::Long, Schema::Long)
            | (Schema::Float, Schema::Float)
            | (Schema::Double, Schema::Double)
            | (Schema::Bytes, Schema::Bytes)
            | (Schema::String, Schema::String) => Ok(()),

            // Numeric widening and bytes/string interchange, in the
            // writer -> reader direction only.
            (Schema::Long, Schema::Int)
            | (Schema::Float, Schema::Int)
            | (Schema::Float, Schema::Long)
            | (Schema::Double, Schema::Int)
            | (Schema::Double, Schema::Long)
            | (Schema::Double, Schema::Float)
            | (Schema::String, Schema::Bytes)
            | (Schema::Bytes, Schema::String) => Ok(()),

            (Schema::Array(r_items), Schema::Array(w_items)) => {
                self.check_pair(r_items, w_items, &child(path, "items"))
            }
            (Schema::Map(r_values), Schema::Map(w_values)) => {
                self.check_pair(r_values, w_values, &child(path, "values"))
            }

            (Schema::Fixed(rf), Schema::Fixed(wf)) => {
                let w_full = wf.name.fullname();
                if rf.name.fullname() != w_full
                    && !rf.aliases.iter().any(|a| a.fullname() == w_full)
                {
                    self.findings.push(Incompatibility::new(
                        IncompatibilityKind::NameMismatch,
                        child(path, "name"),
                        format!("reader fixed '{}' vs writer '{}'", rf.name, wf.name),
                    ));
                }
                if rf.size != wf.size {
                    self.findings.push(Incompatibility::new(
                        IncompatibilityKind::FixedSizeMismatch,
                        child(path, "size"),
                        format!("reader size {} vs writer size {}", rf.size, wf.size),
                    ));
                }
                Ok(())
            }

            (Schema::Enum(re), Schema::Enum(we)) => {
                let w_full = we.name.fullname();
                if re.name.fullname() != w_full
                    && !re.aliases.iter().any(|a| a.fullname() == w_full)
                {
                    self.findings.push(Incompatibility::new(
                        IncompatibilityKind::NameMismatch,
                        child(path, "name"),
                        format!("reader enum '{}' vs writer '{}'", re.name, we.name),
                    ));
                }
                let missing: Vec<&String> = we
                    .symbols
                    .iter()
                    .filter(|s| re.symbol_index(s.as_str()).is_none())
                    .collect();
                if !missing.is_empty() && re.default.is_none() {
                    self.findings.push(Incompatibility::new(
                        IncompatibilityKind::MissingEnumSymbols,
                        child(path, "symbols"),
                        format!(
                            "writer symbols {:?} are unknown to reader '{}', which has no default",
                            missing, re.name
                        ),
                    ));
                }
                Ok(())
            }

            (Schema::Record(rr), Schema::Record(wr)) => {
                let key = (rr.name.fullname(), wr.name.fullname());
                if !self.visited.insert(key) {
                    return Ok(());
                }

                let w_full = wr.name.fullname();
                if rr.name.fullname() != w_full
                    && !rr.aliases.iter().any(|a| a.fullname() == w_full)
                {
                    self.findings.push(Incompatibility::new(
                        IncompatibilityKind::NameMismatch,
                        child(path, "name"),
                        format!("reader record '{}' vs writer '{}'", rr.name, wr.name),
                    ));
                }

                // Fields match by name (or reader alias), never by position.
                for (i, r_field) in rr.fields.iter().enumerate() {
                    let matched = wr.field(&r_field.name).or_else(|| {
                        r_field
                            .aliases
                            .iter()
                            .find_map(|alias| wr.field(alias))
                    });
                    match matched {
                        Some(w_field) => {
                            let field_path = child(path, &format!("fields/{}/type", i));
                            self.check_pair(&r_field.schema, &w_field.schema, &field_path)?;
                        }
                        None if r_field.default.is_some() => {}
                        None => {
                            self.findings.push(Incompatibility::new(
                                IncompatibilityKind::ReaderFieldMissingDefaultValue,
                                child(path, &format!("fields/{}", i)),
                                format!(
                                    "reader field '{}' is absent from writer '{}' and has no default",
                                    r_field.name, wr.name
                                ),
                            ));
                        }
                    }
                }
                Ok(())
            }

            (reader, writer) => {
                self.findings.push(Incompatibility::new(
                    IncompatibilityKind::TypeMismatch,
                    path,
                    format!(
                        "reader type {} cannot read writer type {}",
                        reader.type_label(),
                        writer.type_label()
                    ),
                ));
                Ok(())
            }
        }
    }

    /// Trial-checks the writer type against each reader branch in order,
    /// without polluting this checker's findings. The trial inherits the
    /// visited set so recursive pairs still terminate.
    fn any_branch_accepts(
        &self,
        reader_union: &UnionSchema,
        writer: &Schema,
    ) -> Result<bool, CaskError> {
        for branch in reader_union.variants() {
            let mut trial = Checker {
                reader_names: self.reader_names,
                writer_names: self.writer_names,
                visited: self.visited.clone(),
                findings: Vec::new(),
            };
            trial.check_pair(branch, writer, "/")?;
            if trial.findings.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn child(path: &str, segment: &str) -> String {
    if path == "/" {
        format!("/{}", segment)
    } else {
        format!("{}/{}", path, segment)
    }
}

//==================================================================================
// 4. Unit Tests
//==================================================================================
