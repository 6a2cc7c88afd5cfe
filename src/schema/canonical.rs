//! Canonical-form serialization and fingerprinting.
//!
//! The canonical form strips every attribute that does not affect the wire
//! shape (docs, aliases, defaults, logical annotations, whitespace), expands
//! names to full names, and fixes the attribute order, so two schemas encode
//! the same data iff their canonical forms are equal. Fingerprints are
//! digests of that form: a 64-bit Rabin variant for compact identifiers, and
//! MD5 / SHA-256 for callers that want standard cryptographic digests.
//!
//! A recursive named type is serialized in full once per pass; every later
//! visit emits only the full name, which both breaks the recursion and keeps
//! the form canonical.

use md5::Md5;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::fmt::Write as _;
use std::sync::OnceLock;

use super::Schema;

//==================================================================================
// 1. Fingerprint Types
//==================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FingerprintAlgorithm {
    /// 64-bit non-cryptographic Rabin fingerprint; the algorithm is part of
    /// the wire format (single-datum framing embeds it little-endian).
    Rabin64,
    /// 128-bit MD5 digest.
    Md5,
    /// 256-bit SHA-256 digest.
    Sha256,
}

/// A fixed-length digest of a schema's canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub algorithm: FingerprintAlgorithm,
    pub bytes: Vec<u8>,
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.bytes {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

//==================================================================================
// 2. Public API on Schema
//==================================================================================

impl Schema {
    /// The whitespace- and attribute-stripped textual form used for semantic
    /// comparison and fingerprinting.
    pub fn canonical_form(&self) -> String {
        let mut out = String::new();
        let mut seen = HashSet::new();
        write_canonical(self, &mut seen, &mut out);
        out
    }

    /// Digest of the canonical form under the requested algorithm.
    pub fn fingerprint(&self, algorithm: FingerprintAlgorithm) -> Fingerprint {
        let canonical = self.canonical_form();
        let bytes = match algorithm {
            FingerprintAlgorithm::Rabin64 => {
                rabin64(canonical.as_bytes()).to_le_bytes().to_vec()
            }
            FingerprintAlgorithm::Md5 => Md5::digest(canonical.as_bytes()).to_vec(),
            FingerprintAlgorithm::Sha256 => Sha256::digest(canonical.as_bytes()).to_vec(),
        };
        Fingerprint { algorithm, bytes }
    }

    /// The Rabin fingerprint as an integer, as embedded in single-datum
    /// framing.
    pub fn fingerprint_rabin(&self) -> u64 {
        rabin64(self.canonical_form().as_bytes())
    }
}

//==================================================================================
// 3. Canonical Writer
//==================================================================================

fn write_canonical(schema: &Schema, seen: &mut HashSet<String>, out: &mut String) {
    match schema {
        Schema::Null => out.push_str("\"null\""),
        Schema::Boolean => out.push_str("\"boolean\""),
        Schema::Int => out.push_str("\"int\""),
        Schema::Long => out.push_str("\"long\""),
        Schema::Float => out.push_str("\"float\""),
        Schema::Double => out.push_str("\"double\""),
        Schema::Bytes => out.push_str("\"bytes\""),
        Schema::String => out.push_str("\"string\""),
        // Annotations do not change the wire shape and are stripped.
        Schema::Logical(l) => write_canonical(&l.inner, seen, out),
        Schema::Ref(name) => {
            let _ = write!(out, "\"{}\"", name.fullname());
        }
        Schema::Array(items) => {
            out.push_str("{\"type\":\"array\",\"items\":");
            write_canonical(items, seen, out);
            out.push('}');
        }
        Schema::Map(values) => {
            out.push_str("{\"type\":\"map\",\"values\":");
            write_canonical(values, seen, out);
            out.push('}');
        }
        Schema::Union(u) => {
            out.push('[');
            for (i, variant) in u.variants().iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(variant, seen, out);
            }
            out.push(']');
        }
        Schema::Record(r) => {
            let full = r.name.fullname();
            if !seen.insert(full.clone()) {
                let _ = write!(out, "\"{}\"", full);
                return;
            }
            let _ = write!(out, "{{\"name\":\"{}\",\"type\":\"record\",\"fields\":[", full);
            for (i, field) in r.fields.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{{\"name\":\"{}\",\"type\":", field.name);
                write_canonical(&field.schema, seen, out);
                out.push_str("}");
            }
            out.push_str("]}");
        }
        Schema::Enum(e) => {
            let full = e.name.fullname();
            if !seen.insert(full.clone()) {
                let _ = write!(out, "\"{}\"", full);
                return;
            }
            let _ = write!(out, "{{\"name\":\"{}\",\"type\":\"enum\",\"symbols\":[", full);
            for (i, symbol) in e.symbols.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "\"{}\"", symbol);
            }
            out.push_str("]}");
        }
        Schema::Fixed(f) => {
            let full = f.name.fullname();
            if !seen.insert(full.clone()) {
                let _ = write!(out, "\"{}\"", full);
                return;
            }
            let _ = write!(
                out,
                "{{\"name\":\"{}\",\"type\":\"fixed\",\"size\":{}}}",
                full, f.size
            );
        }
    }
}

//==================================================================================
// 4. Rabin-64
//==================================================================================

const RABIN_EMPTY: u64 = 0xc15d_213a_a4d7_a795;

fn rabin_table() -> &'static [u64; 256] {
    static TABLE: OnceLock<[u64; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0u64; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            let mut fp = i as u64;
            for _ in 0..8 {
                fp = (fp >> 1) ^ (RABIN_EMPTY & 0u64.wrapping_sub(fp & 1));
            }
            *slot = fp;
        }
        table
    })
}

/// The 64-bit Rabin fingerprint over `data`.
pub fn rabin64(data: &[u8]) -> u64 {
    let table = rabin_table();
    let mut fp = RABIN_EMPTY;
    for &byte in data {
        fp = (fp >> 8) ^ table[((fp ^ u64::from(byte)) & 0xff) as usize];
    }
    fp
}

//==================================================================================
// 5. Unit Tests
//==================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_canonical_form() {
        assert_eq!(Schema::Int.canonical_form(), "\"int\"");
        assert_eq!(Schema::String.canonical_form(), "\"string\"");
    }

    #[test]
    fn test_canonical_form_strips_attributes() {
        let text = r#"{
            "type": "record",
            "name": "User",
            "namespace": "com.example",
            "doc": "a user",
            "aliases": ["Person"],
            "fields": [
                {"name": "id", "type": "long", "default": 0, "doc": "pk"}
            ]
        }"#;
        let schema = Schema::parse_str(text).unwrap();
        assert_eq!(
            schema.canonical_form(),
            r#"{"name":"com.example.User","type":"record","fields":[{"name":"id","type":"long"}]}"#
        );
    }

    #[test]
    fn test_canonical_form_is_whitespace_insensitive() {
        let compact = Schema::parse_str(r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"}]}"#).unwrap();
        let spaced = Schema::parse_str(
            r#"{
                "type" : "record" ,
                "name" : "R" ,
                "fields" : [ { "name" : "a" , "type" : "int" } ]
            }"#,
        )
        .unwrap();
        assert_eq!(compact.canonical_form(), spaced.canonical_form());
        assert_eq!(
            compact.fingerprint_rabin(),
            spaced.fingerprint_rabin()
        );
    }

    #[test]
    fn test_recursive_schema_terminates_with_name_reference() {
        let text = r#"{
            "type": "record",
            "name": "Node",
            "fields": [
                {"name": "next", "type": ["null", "Node"], "default": null}
            ]
        }"#;
        let schema = Schema::parse_str(text).unwrap();
        let canonical = schema.canonical_form();
        assert_eq!(
            canonical,
            r#"{"name":"Node","type":"record","fields":[{"name":"next","type":["null","Node"]}]}"#
        );
    }

    #[test]
    fn test_logical_annotation_is_stripped() {
        let annotated =
            Schema::parse_str(r#"{"type":"bytes","logicalType":"decimal","precision":4,"scale":2}"#)
                .unwrap();
        assert_eq!(annotated.canonical_form(), "\"bytes\"");
        assert_eq!(
            annotated.fingerprint_rabin(),
            Schema::Bytes.fingerprint_rabin()
        );
    }

    #[test]
    fn test_fingerprint_lengths_per_algorithm() {
        let schema = Schema::parse_str(r#""string""#).unwrap();
        assert_eq!(schema.fingerprint(FingerprintAlgorithm::Rabin64).bytes.len(), 8);
        assert_eq!(schema.fingerprint(FingerprintAlgorithm::Md5).bytes.len(), 16);
        assert_eq!(schema.fingerprint(FingerprintAlgorithm::Sha256).bytes.len(), 32);
    }

    #[test]
    fn test_fingerprints_distinguish_schemas() {
        assert_ne!(Schema::Int.fingerprint_rabin(), Schema::Long.fingerprint_rabin());
        assert_ne!(
            Schema::Int.fingerprint(FingerprintAlgorithm::Sha256),
            Schema::Long.fingerprint(FingerprintAlgorithm::Sha256)
        );
    }

    #[test]
    fn test_rabin_of_empty_input_is_seed() {
        assert_eq!(rabin64(b""), RABIN_EMPTY);
    }

    #[test]
    fn test_fingerprint_hex_rendering() {
        let fp = Fingerprint {
            algorithm: FingerprintAlgorithm::Rabin64,
            bytes: vec![0x0f, 0xa0],
        };
        assert_eq!(fp.to_string(), "0fa0");
    }
}
