//! The container file reader: validates the header, recovers the writer
//! schema and codec, and iterates values one at a time across block
//! boundaries.
//!
//! A block is consumed as one unit — count, payload length, payload, and the
//! trailing sync marker — so `previous_sync` always names the offset just
//! past the most recently crossed marker, the same offset the writer's
//! `sync()` reported. `sync(offset)` scans forward for the 16-byte marker to
//! support random-access resume and corruption recovery.

use log::{debug, warn};
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::codec::decode::{decode_value, read_len_prefixed, read_map_key};
use crate::codec::varint::read_long;
use crate::error::CaskError;
use crate::resolve::ResolvingDecoder;
use crate::schema::{Names, Schema};
use crate::value::Value;

use super::codecs::{self, BlockCodec};
use super::format::{FILE_MAGIC, MAX_BLOCK_SIZE, META_CODEC, META_SCHEMA, SYNC_SIZE};

//==================================================================================
// 1. The File Reader
//==================================================================================

pub struct FileReader<R: Read + Seek> {
    source: R,
    metadata: HashMap<String, Vec<u8>>,
    writer_schema: Schema,
    writer_names: Names,
    /// Present when the caller supplied a reader schema that differs from the
    /// writer's; `None` decodes with the writer schema directly.
    resolver: Option<ResolvingDecoder>,
    codec: Arc<dyn BlockCodec>,
    sync_marker: [u8; SYNC_SIZE],
    /// Decompressed payload of the current block.
    block_cursor: Cursor<Vec<u8>>,
    /// Values left in the current block (decremented per attempt).
    block_remaining: u64,
    /// Values the current block declared.
    block_entries: u64,
    /// Declared (possibly compressed) payload length of the current block.
    block_bytes: u64,
    /// Offset just past the most recently crossed sync marker.
    block_start: u64,
    /// Offset just past the current block's trailing marker.
    block_end: u64,
    eof: bool,
}

impl<R: Read + Seek> FileReader<R> {
    /// Opens a container, auto-detecting the writer schema from the header.
    pub fn new(source: R) -> Result<Self, CaskError> {
        Self::open(source, None)
    }

    /// Opens a container and resolves every value into `reader_schema`.
    pub fn with_schema(reader_schema: Schema, source: R) -> Result<Self, CaskError> {
        Self::open(source, Some(reader_schema))
    }

    fn open(mut source: R, reader_schema: Option<Schema>) -> Result<Self, CaskError> {
        let mut magic = [0u8; FILE_MAGIC.len()];
        match source.read_exact(&mut magic) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(CaskError::Format(
                    "shorter than the magic sequence".to_string(),
                ))
            }
            Err(e) => return Err(CaskError::Io(e)),
        }
        if &magic != FILE_MAGIC {
            return Err(CaskError::Format("magic sequence mismatch".to_string()));
        }

        let metadata = read_metadata(&mut source)
            .map_err(|e| CaskError::Format(format!("unreadable metadata: {}", e)))?;

        let schema_text = metadata
            .get(META_SCHEMA)
            .ok_or_else(|| CaskError::Format("header lacks a schema entry".to_string()))?;
        let schema_text = std::str::from_utf8(schema_text)
            .map_err(|e| CaskError::Format(format!("schema entry is not UTF-8: {}", e)))?;
        let writer_schema = Schema::parse_str(schema_text)
            .map_err(|e| CaskError::Format(format!("unparseable writer schema: {}", e)))?;
        let writer_names = Names::from_schema(&writer_schema)?;

        let codec_name = match metadata.get(META_CODEC) {
            Some(raw) => std::str::from_utf8(raw)
                .map_err(|e| CaskError::Format(format!("codec entry is not UTF-8: {}", e)))?
                .to_string(),
            None => "null".to_string(),
        };
        let codec = codecs::lookup(&codec_name)?;

        let mut sync_marker = [0u8; SYNC_SIZE];
        source
            .read_exact(&mut sync_marker)
            .map_err(|e| CaskError::Format(format!("truncated sync marker: {}", e)))?;

        let resolver = match &reader_schema {
            Some(reader) if reader.canonical_form() != writer_schema.canonical_form() => {
                Some(ResolvingDecoder::new(&writer_schema, reader)?)
            }
            _ => None,
        };

        let block_start = source.stream_position()?;
        debug!(
            "opened container: codec={}, first block at {}",
            codec_name, block_start
        );

        Ok(FileReader {
            source,
            metadata,
            writer_schema,
            writer_names,
            resolver,
            codec,
            sync_marker,
            block_cursor: Cursor::new(Vec::new()),
            block_remaining: 0,
            block_entries: 0,
            block_bytes: 0,
            block_start,
            block_end: block_start,
            eof: false,
        })
    }

    //==============================================================================
    // Iteration
    //==============================================================================

    /// True when another value is available, loading the next block if the
    /// current one is exhausted.
    pub fn has_next(&mut self) -> Result<bool, CaskError> {
        loop {
            if self.eof {
                return Ok(false);
            }
            if self.block_remaining > 0 {
                return Ok(true);
            }
            if !self.load_block()? {
                return Ok(false);
            }
        }
    }

    /// Decodes the next value. A decode failure inside a block surfaces as
    /// [`CaskError::BlockCorruption`] carrying the block's starting offset.
    pub fn next_value(&mut self) -> Result<Value, CaskError> {
        if !self.has_next()? {
            return Err(CaskError::Decode(
                "no more values in this container".to_string(),
            ));
        }

        let block_offset = self.block_start;

        // One declared slot is consumed per attempt, success or not, so a
        // repair pass can keep probing the rest of the block.
        self.block_remaining -= 1;
        let result = match &self.resolver {
            Some(resolver) => resolver.decode(&mut self.block_cursor),
            None => decode_value(&self.writer_schema, &self.writer_names, &mut self.block_cursor),
        };
        if self.block_remaining == 0 {
            if result.is_ok()
                && (self.block_cursor.position() as usize) < self.block_cursor.get_ref().len()
            {
                warn!(
                    "block at {} has {} undecoded trailing bytes",
                    self.block_start,
                    self.block_cursor.get_ref().len() - self.block_cursor.position() as usize
                );
            }
            self.block_start = self.block_end;
        }

        result.map_err(|e| match e {
            CaskError::Io(_) | CaskError::Internal(_) => e,
            other => CaskError::BlockCorruption {
                offset: block_offset,
                reason: other.to_string(),
            },
        })
    }

    //==============================================================================
    // Sync Points
    //==============================================================================

    /// The offset just past the most recently crossed sync marker: the point
    /// `sync(offset)` resumes from.
    pub fn previous_sync(&self) -> u64 {
        self.block_start
    }

    /// Seeks to `offset` and scans forward for the sync marker, leaving the
    /// reader positioned at the block that follows it. Reaching the end of
    /// the stream is not an error; the reader just reports no more values.
    pub fn sync(&mut self, offset: u64) -> Result<(), CaskError> {
        self.source.seek(SeekFrom::Start(offset))?;
        self.block_remaining = 0;
        self.block_entries = 0;
        self.block_cursor = Cursor::new(Vec::new());
        self.eof = false;

        let mut window = [0u8; SYNC_SIZE];
        let mut filled = 0usize;
        while filled < SYNC_SIZE {
            let n = self.source.read(&mut window[filled..])?;
            if n == 0 {
                self.eof = true;
                return Ok(());
            }
            filled += n;
        }

        // Ring comparison, one byte of forward progress per mismatch.
        let mut i = SYNC_SIZE;
        loop {
            let matched = (0..SYNC_SIZE)
                .all(|j| self.sync_marker[j] == window[(i + j) % SYNC_SIZE]);
            if matched {
                break;
            }
            let mut byte = [0u8; 1];
            let n = self.source.read(&mut byte)?;
            if n == 0 {
                self.eof = true;
                return Ok(());
            }
            window[i % SYNC_SIZE] = byte[0];
            i += 1;
        }

        self.block_start = self.source.stream_position()?;
        self.block_end = self.block_start;
        debug!("resynced to block at {}", self.block_start);
        Ok(())
    }

    /// True once the reader has consumed past `offset`: used to bound a scan
    /// to one split of a larger file.
    pub fn past_sync(&mut self, offset: u64) -> Result<bool, CaskError> {
        Ok(!self.has_next()? || self.block_start >= offset + SYNC_SIZE as u64)
    }

    //==============================================================================
    // Introspection
    //==============================================================================

    pub fn writer_schema(&self) -> &Schema {
        &self.writer_schema
    }

    /// Header metadata value for `key`.
    pub fn get_meta(&self, key: &str) -> Option<&[u8]> {
        self.metadata.get(key).map(Vec::as_slice)
    }

    pub fn meta_keys(&self) -> impl Iterator<Item = &str> {
        self.metadata.keys().map(String::as_str)
    }

    /// Values declared by the current block.
    pub fn block_count(&self) -> u64 {
        self.block_entries
    }

    /// Declared payload length of the current block.
    pub fn block_size(&self) -> u64 {
        self.block_bytes
    }

    /// Releases the underlying source.
    pub fn into_inner(self) -> R {
        self.source
    }

    //==============================================================================
    // Block Loading
    //==============================================================================

    /// Abandons the rest of the current block; the reader resumes at the
    /// block's trailing sync marker, which was already consumed and verified.
    pub(crate) fn abandon_block(&mut self) {
        self.block_remaining = 0;
        self.block_cursor = Cursor::new(Vec::new());
        self.block_start = self.block_end;
    }

    /// Loads one block: count, payload length, payload, trailing sync.
    /// Returns false on a clean end of stream at a block boundary.
    fn load_block(&mut self) -> Result<bool, CaskError> {
        self.block_start = self.source.stream_position()?;

        let mut first = [0u8; 1];
        match self.source.read_exact(&mut first) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.eof = true;
                return Ok(false);
            }
            Err(e) => return Err(CaskError::Io(e)),
        }

        let offset = self.block_start;
        let corrupt = |reason: String| CaskError::BlockCorruption { offset, reason };

        let (count, declared_len) = {
            let mut header = first.as_slice().chain(&mut self.source);
            let count = read_long(&mut header)
                .map_err(|e| corrupt(format!("unreadable block count: {}", e)))?;
            let declared_len = read_long(&mut header)
                .map_err(|e| corrupt(format!("unreadable block length: {}", e)))?;
            (count, declared_len)
        };

        let count = u64::try_from(count)
            .map_err(|_| corrupt(format!("negative block count {}", count)))?;
        let payload_len = usize::try_from(declared_len)
            .ok()
            .filter(|len| *len <= MAX_BLOCK_SIZE)
            .ok_or_else(|| corrupt(format!("implausible block length {}", declared_len)))?;

        let mut payload = vec![0u8; payload_len];
        self.source
            .read_exact(&mut payload)
            .map_err(|e| corrupt(format!("truncated block payload: {}", e)))?;

        let mut marker = [0u8; SYNC_SIZE];
        self.source
            .read_exact(&mut marker)
            .map_err(|e| corrupt(format!("truncated sync marker: {}", e)))?;
        if marker != self.sync_marker {
            return Err(corrupt("sync marker mismatch".to_string()));
        }

        let decompressed = self
            .codec
            .decompress(&payload)
            .map_err(|e| corrupt(format!("block decompression failed: {}", e)))?;

        self.block_end = self.source.stream_position()?;
        self.block_cursor = Cursor::new(decompressed);
        self.block_remaining = count;
        self.block_entries = count;
        self.block_bytes = declared_len as u64;
        Ok(true)
    }
}

impl<R: Read + Seek> Iterator for FileReader<R> {
    type Item = Result<Value, CaskError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => Some(self.next_value()),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

//==================================================================================
// 2. Header Metadata
//==================================================================================

/// Decodes the header's string->bytes map, laid out with the same block rules
/// as any map value.
fn read_metadata<R: Read>(source: &mut R) -> Result<HashMap<String, Vec<u8>>, CaskError> {
    let mut metadata = HashMap::new();
    loop {
        let raw = read_long(source)?;
        if raw == 0 {
            break;
        }
        let count = if raw < 0 {
            let _block_bytes = read_long(source)?;
            raw.unsigned_abs()
        } else {
            raw as u64
        };
        for _ in 0..count {
            let key = read_map_key(source)?;
            let value = read_len_prefixed(source)?;
            metadata.insert(key, value);
        }
    }
    Ok(metadata)
}

//==================================================================================
// 3. Unit Tests
//==================================================================================

#[cfg(test)]
mod tests {
    use super::super::writer::{FileWriter, WriterOptions};
    use super::*;

    fn sample_file(values: &[&str]) -> Vec<u8> {
        let mut writer =
            FileWriter::create(Schema::String, Vec::new(), WriterOptions::default()).unwrap();
        for v in values {
            writer.append(&Value::String(v.to_string())).unwrap();
        }
        writer.close().unwrap()
    }

    #[test]
    fn test_reader_roundtrips_values() {
        let bytes = sample_file(&["one", "two", "three"]);
        let reader = FileReader::new(Cursor::new(bytes)).unwrap();
        let values: Vec<Value> = reader.map(Result::unwrap).collect();
        assert_eq!(
            values,
            vec![
                Value::String("one".to_string()),
                Value::String("two".to_string()),
                Value::String("three".to_string()),
            ]
        );
    }

    #[test]
    fn test_truncated_magic_is_a_format_error() {
        let result = FileReader::new(Cursor::new(vec![b'C', b's']));
        assert!(matches!(result, Err(CaskError::Format(_))));
    }

    #[test]
    fn test_wrong_magic_is_a_format_error() {
        let mut bytes = sample_file(&["x"]);
        bytes[0] = b'Z';
        let result = FileReader::new(Cursor::new(bytes));
        assert!(matches!(result, Err(CaskError::Format(_))));
    }

    #[test]
    fn test_writer_schema_is_recovered_from_header() {
        let bytes = sample_file(&["x"]);
        let reader = FileReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.writer_schema(), &Schema::String);
        assert_eq!(reader.get_meta(META_CODEC), Some(&b"null"[..]));
    }

    #[test]
    fn test_user_metadata_survives_the_roundtrip() {
        let mut options = WriterOptions::default();
        options
            .user_metadata
            .insert("origin".to_string(), b"unit-test".to_vec());
        let mut writer = FileWriter::create(Schema::Long, Vec::new(), options).unwrap();
        writer.append(&Value::Long(1)).unwrap();
        let bytes = writer.close().unwrap();

        let reader = FileReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.get_meta("origin"), Some(&b"unit-test"[..]));
    }

    #[test]
    fn test_next_past_end_is_an_error_not_a_panic() {
        let bytes = sample_file(&["only"]);
        let mut reader = FileReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(
            reader.next_value().unwrap(),
            Value::String("only".to_string())
        );
        assert!(!reader.has_next().unwrap());
        assert!(reader.next_value().is_err());
    }
}
