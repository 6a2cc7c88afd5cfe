//! Pluggable block compression codecs and their process-wide registry.
//!
//! The container layer depends only on the [`BlockCodec`] capability and the
//! name -> implementation table; swapping or adding a compressor never
//! touches the framing logic. `null`, `deflate`, and `zstandard` are always
//! registered; `snappy`, `bzip2`, and `xz` join behind their cargo features.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::CaskError;

//==================================================================================
// 1. The Capability Interface and Registry
//==================================================================================

/// A block compressor. Implementations may keep reusable internal buffers;
/// one writer or reader owns an instance at a time.
pub trait BlockCodec: Send + Sync {
    /// Registry key, stored in the container header.
    fn name(&self) -> &'static str;

    fn compress(&self, block: &[u8]) -> Result<Vec<u8>, CaskError>;

    fn decompress(&self, block: &[u8]) -> Result<Vec<u8>, CaskError>;
}

type Registry = RwLock<HashMap<&'static str, Arc<dyn BlockCodec>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<&'static str, Arc<dyn BlockCodec>> = HashMap::new();
        let defaults: Vec<Arc<dyn BlockCodec>> = vec![
            Arc::new(NullCodec),
            Arc::new(DeflateCodec),
            Arc::new(ZstandardCodec),
            #[cfg(feature = "snappy")]
            Arc::new(SnappyCodec),
            #[cfg(feature = "bzip")]
            Arc::new(Bzip2Codec),
            #[cfg(feature = "xz")]
            Arc::new(XzCodec),
        ];
        for codec in defaults {
            map.insert(codec.name(), codec);
        }
        RwLock::new(map)
    })
}

/// Registers a codec, replacing any previous one under the same name.
pub fn register(codec: Arc<dyn BlockCodec>) -> Result<(), CaskError> {
    let mut map = registry()
        .write()
        .map_err(|_| CaskError::Internal("block codec registry is poisoned".to_string()))?;
    map.insert(codec.name(), codec);
    Ok(())
}

/// Looks a codec up by its registry name.
pub fn lookup(name: &str) -> Result<Arc<dyn BlockCodec>, CaskError> {
    let map = registry()
        .read()
        .map_err(|_| CaskError::Internal("block codec registry is poisoned".to_string()))?;
    map.get(name)
        .cloned()
        .ok_or_else(|| CaskError::UnknownCodec(name.to_string()))
}

fn codec_error(codec: &'static str, err: impl std::fmt::Display) -> CaskError {
    CaskError::Codec {
        codec: codec.to_string(),
        reason: err.to_string(),
    }
}

//==================================================================================
// 2. Built-In Codecs
//==================================================================================

/// Stores blocks verbatim.
struct NullCodec;

impl BlockCodec for NullCodec {
    fn name(&self) -> &'static str {
        "null"
    }

    fn compress(&self, block: &[u8]) -> Result<Vec<u8>, CaskError> {
        Ok(block.to_vec())
    }

    fn decompress(&self, block: &[u8]) -> Result<Vec<u8>, CaskError> {
        Ok(block.to_vec())
    }
}

/// Raw DEFLATE, no zlib wrapper. The baseline codec every reader carries.
struct DeflateCodec;

impl BlockCodec for DeflateCodec {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn compress(&self, block: &[u8]) -> Result<Vec<u8>, CaskError> {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(block)
            .map_err(|e| codec_error("deflate", e))?;
        encoder.finish().map_err(|e| codec_error("deflate", e))
    }

    fn decompress(&self, block: &[u8]) -> Result<Vec<u8>, CaskError> {
        let mut decoder = flate2::read::DeflateDecoder::new(block);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| codec_error("deflate", e))?;
        Ok(out)
    }
}

/// Zstandard frames via the streaming encoder.
struct ZstandardCodec;

impl BlockCodec for ZstandardCodec {
    fn name(&self) -> &'static str {
        "zstandard"
    }

    fn compress(&self, block: &[u8]) -> Result<Vec<u8>, CaskError> {
        let mut encoder =
            zstd::stream::Encoder::new(Vec::new(), zstd::DEFAULT_COMPRESSION_LEVEL)
                .map_err(|e| codec_error("zstandard", e))?;
        encoder
            .write_all(block)
            .map_err(|e| codec_error("zstandard", e))?;
        encoder.finish().map_err(|e| codec_error("zstandard", e))
    }

    fn decompress(&self, block: &[u8]) -> Result<Vec<u8>, CaskError> {
        let mut decoder =
            zstd::stream::Decoder::new(block).map_err(|e| codec_error("zstandard", e))?;
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| codec_error("zstandard", e))?;
        Ok(out)
    }
}

/// Snappy raw blocks with a 4-byte big-endian CRC-32 of the uncompressed
/// payload appended, detected on decompression.
#[cfg(feature = "snappy")]
struct SnappyCodec;

#[cfg(feature = "snappy")]
impl BlockCodec for SnappyCodec {
    fn name(&self) -> &'static str {
        "snappy"
    }

    fn compress(&self, block: &[u8]) -> Result<Vec<u8>, CaskError> {
        let mut out = snap::raw::Encoder::new()
            .compress_vec(block)
            .map_err(|e| codec_error("snappy", e))?;
        out.extend_from_slice(&crc32fast::hash(block).to_be_bytes());
        Ok(out)
    }

    fn decompress(&self, block: &[u8]) -> Result<Vec<u8>, CaskError> {
        if block.len() < 4 {
            return Err(codec_error("snappy", "block too short for checksum"));
        }
        let (payload, trailer) = block.split_at(block.len() - 4);
        let out = snap::raw::Decoder::new()
            .decompress_vec(payload)
            .map_err(|e| codec_error("snappy", e))?;
        let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let actual = crc32fast::hash(&out);
        if expected != actual {
            return Err(codec_error(
                "snappy",
                format!("checksum mismatch: expected {:08x}, got {:08x}", expected, actual),
            ));
        }
        Ok(out)
    }
}

#[cfg(feature = "bzip")]
struct Bzip2Codec;

#[cfg(feature = "bzip")]
impl BlockCodec for Bzip2Codec {
    fn name(&self) -> &'static str {
        "bzip2"
    }

    fn compress(&self, block: &[u8]) -> Result<Vec<u8>, CaskError> {
        let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder
            .write_all(block)
            .map_err(|e| codec_error("bzip2", e))?;
        encoder.finish().map_err(|e| codec_error("bzip2", e))
    }

    fn decompress(&self, block: &[u8]) -> Result<Vec<u8>, CaskError> {
        let mut decoder = bzip2::read::BzDecoder::new(block);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| codec_error("bzip2", e))?;
        Ok(out)
    }
}

#[cfg(feature = "xz")]
struct XzCodec;

#[cfg(feature = "xz")]
impl BlockCodec for XzCodec {
    fn name(&self) -> &'static str {
        "xz"
    }

    fn compress(&self, block: &[u8]) -> Result<Vec<u8>, CaskError> {
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder.write_all(block).map_err(|e| codec_error("xz", e))?;
        encoder.finish().map_err(|e| codec_error("xz", e))
    }

    fn decompress(&self, block: &[u8]) -> Result<Vec<u8>, CaskError> {
        let mut decoder = xz2::read::XzDecoder::new(block);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| codec_error("xz", e))?;
        Ok(out)
    }
}

//==================================================================================
// 3. Unit Tests
//==================================================================================
