//! The container file format: a self-describing header (magic, metadata map,
//! sync marker) followed by sync-marked, optionally compressed blocks of
//! binary-encoded values.
//!
//! The layout constants live in [`format`], the pluggable compressors in
//! [`codecs`], and the stateful endpoints in [`writer`] and [`reader`].
//! [`repair`] implements the corruption-recovery scans on top of the reader.

pub mod codecs;
pub mod format;
pub mod reader;
pub mod repair;
pub mod writer;

#[cfg(test)]
mod tests;

pub use reader::FileReader;
pub use repair::{repair, RepairMode, RepairOptions, RepairReport};
pub use writer::{FileWriter, WriterOptions};
