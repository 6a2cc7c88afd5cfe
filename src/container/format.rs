// In: src/container/format.rs

//! Defines the on-disk constants for the cask container format. This is the
//! single source of truth for the magic sequence, the sync-marker geometry,
//! the reserved metadata keys, and the block-size bounds that the writer and
//! reader both honor.

/// The magic sequence opening every cask container file.
pub const FILE_MAGIC: &[u8; 4] = b"Csk\x01";

/// Byte length of the sync marker delimiting blocks.
pub const SYNC_SIZE: usize = 16;

/// A sync marker: random by default, caller-supplied for deterministic files.
pub type SyncMarker = [u8; SYNC_SIZE];

/// Reserved metadata key holding the writer schema as JSON text.
pub const META_SCHEMA: &str = "cask.schema";

/// Reserved metadata key holding the block codec name.
pub const META_CODEC: &str = "cask.codec";

/// Callers may not set keys under this prefix.
pub const RESERVED_META_PREFIX: &str = "cask.";

/// Buffered bytes after which the writer closes the current block.
pub const DEFAULT_SYNC_INTERVAL: usize = 64 * 1024;

/// Bounds on a configurable sync interval.
pub const MIN_SYNC_INTERVAL: usize = 64;
pub const MAX_SYNC_INTERVAL: usize = 1 << 30;

/// A block declaring a payload larger than this is treated as corrupt rather
/// than allocated.
pub(crate) const MAX_BLOCK_SIZE: usize = 1 << 30;
