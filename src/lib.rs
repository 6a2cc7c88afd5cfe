//! This file is the root of the `cask` Rust crate.
//!
//! cask is a schema-driven binary serialization engine: a closed schema type
//! model with canonical forms and fingerprints, deterministic binary
//! encoding rules, a resolving decoder for reading data written under one
//! schema as another compatible schema, a static compatibility checker, and
//! a sync-marked block container file format with pluggable compression and
//! corruption repair.
//!
//! The crate root's responsibilities are strictly limited to:
//! 1.  Declaring the top-level modules of the library.
//! 2.  Re-exporting the consumer-facing surface: parse/build a schema,
//!     obtain a writer or reader over a byte stream, check compatibility,
//!     and fingerprint a schema.

//==================================================================================
// 0. Constants
//==================================================================================
/// The crate version, automatically set from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//==================================================================================
// 1. Module Declarations
//==================================================================================

pub mod codec;
pub mod compat;
pub mod container;
pub mod logical;
pub mod resolve;
pub mod schema;
pub mod value;

mod error;

//==================================================================================
// 2. Public Re-Exports
//==================================================================================

pub use compat::{check, CompatibilityReport, Incompatibility, IncompatibilityKind};
pub use container::{
    FileReader, FileWriter, RepairMode, RepairOptions, RepairReport, WriterOptions,
};
pub use error::CaskError;
pub use resolve::ResolvingDecoder;
pub use schema::canonical::{Fingerprint, FingerprintAlgorithm};
pub use schema::{Names, Schema};
pub use value::Value;
