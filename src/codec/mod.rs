//! This module is the binary codec: the collection of pure, stateless
//! encode/decode kernels for every schema shape, operating on byte-vector
//! sinks and `Read` sources.
//!
//! The wire rules are fixed and must match bit-for-bit across
//! implementations: zig-zag varints for integers, little-endian IEEE-754 for
//! floats, length-prefixed bytes/strings, tagless field concatenation for
//! records, zero-terminated blocks for arrays and maps, and a branch index
//! prefix for unions. Decoding is the exact inverse and reports truncated
//! input as an end-of-input condition distinct from any valid value.

/// Zig-zag + base-128 varint kernels.
pub mod varint;

/// Value -> bytes for every schema shape.
pub mod encode;

/// Bytes -> value, plus skip-without-decode.
pub mod decode;

/// Fingerprint-framed single datum encoding.
pub mod single;

pub use decode::{decode_value, skip_value};
pub use encode::encode_value;
