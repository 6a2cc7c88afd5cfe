// In: src/error.rs

//! This module defines the single, unified error type for the entire cask library.
//! It uses the `thiserror` crate to provide ergonomic, context-aware error handling.

use thiserror::Error;

use crate::compat::Incompatibility;

#[derive(Error, Debug)]
pub enum CaskError {
    // =========================================================================
    // === Schema Layer Errors
    // =========================================================================
    /// Malformed schema text, an invalid name, a duplicate field/symbol/type
    /// name, or an unrepresentable default value. The parse never returns a
    /// partial schema.
    #[error("schema parse failed: {0}")]
    SchemaParse(String),

    /// The reader and writer schemas cannot be resolved. Carries every located
    /// incompatibility the checker found.
    #[error("schema resolution failed: {}", summarize_incompatibilities(.0))]
    SchemaResolution(Vec<Incompatibility>),

    // =========================================================================
    // === Codec Layer Errors
    // =========================================================================
    /// A value did not match the schema it was being encoded under.
    #[error("value does not conform to schema: {0}")]
    Validation(String),

    /// Malformed bytes encountered while decoding a value.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The input ended before a complete value could be decoded. Distinct from
    /// a zero-length value, which is a valid encoding for some shapes.
    #[error("unexpected end of input")]
    UnexpectedEof,

    // =========================================================================
    // === Container Layer Errors
    // =========================================================================
    /// Invalid or truncated magic bytes, or unreadable header metadata. The
    /// file is unusable.
    #[error("not a cask container: {0}")]
    Format(String),

    /// A sync-marker mismatch or a decode failure inside a block. Recoverable
    /// via an explicit resync or the repair scanner; `offset` is where the
    /// affected block starts.
    #[error("corrupt block at offset {offset}: {reason}")]
    BlockCorruption { offset: u64, reason: String },

    /// A block codec name with no registered implementation.
    #[error("unknown compression codec: {0}")]
    UnknownCodec(String),

    /// A registered block codec failed to compress or decompress a payload.
    #[error("codec '{codec}' failed: {reason}")]
    Codec { codec: String, reason: String },

    /// An attempt to set a reserved (`cask.`-prefixed) metadata key.
    #[error("metadata key '{0}' is reserved")]
    ReservedMetadata(String),

    // =========================================================================
    // === External Error Wrappers (Using #[from] for automatic conversion)
    // =========================================================================
    /// An error originating from the underlying I/O subsystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the Serde JSON library while rendering schema text.
    #[error("Serde JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal invariant was violated.
    #[error("internal logic error (this is a bug): {0}")]
    Internal(String),
}

/// Renders the first incompatibility plus a count for the rest.
fn summarize_incompatibilities(list: &[Incompatibility]) -> String {
    match list.len() {
        0 => "no details recorded".to_string(),
        1 => list[0].to_string(),
        n => format!("{} (and {} more)", list[0], n - 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::IncompatibilityKind;

    #[test]
    fn test_resolution_error_display_summarizes() {
        let err = CaskError::SchemaResolution(vec![
            Incompatibility::new(
                IncompatibilityKind::TypeMismatch,
                "/fields/0/type",
                "int vs string",
            ),
            Incompatibility::new(
                IncompatibilityKind::FixedSizeMismatch,
                "/fields/1/type",
                "4 vs 8",
            ),
        ]);
        let text = err.to_string();
        assert!(text.contains("/fields/0/type"));
        assert!(text.contains("and 1 more"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "sink closed");
        let err: CaskError = io.into();
        assert!(matches!(err, CaskError::Io(_)));
    }
}
