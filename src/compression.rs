//! Per-brick compression codecs.
//!
//! Every brick is compressed independently; no cross-brick state is
//! permitted. This is the invariant that makes O(1) random brick access
//! possible. Decoding always validates the output length against the
//! size recorded in the catalog — the primary local corruption detector,
//! independent of the whole-file checksum.

use crate::error::{Result, VolumeError};
use bzip2::read::{BzDecoder, BzEncoder};
use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression as FlateCompression;
use serde::{Deserialize, Serialize};
use std::io::Read;
use xz2::read::{XzDecoder, XzEncoder};

/// Compression methods supported for brick payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionMethod {
    /// No compression
    None = 0,
    /// zlib (deflate with zlib framing)
    Zlib = 1,
    /// LZMA (xz container)
    Lzma = 2,
    /// LZ4 block format with length prefix
    Lz4 = 3,
    /// bzip2
    Bzip2 = 4,
}

impl CompressionMethod {
    /// Get the method from its persisted byte value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionMethod::None),
            1 => Some(CompressionMethod::Zlib),
            2 => Some(CompressionMethod::Lzma),
            3 => Some(CompressionMethod::Lz4),
            4 => Some(CompressionMethod::Bzip2),
            _ => None,
        }
    }
}

/// Generic compression level on a 1-10 scale, mapped to each codec's
/// native range (zlib/bzip2 1-9, lzma preset 0-9; lz4 has no levels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    pub fn new(level: u8) -> Self {
        Self(level.clamp(1, 10))
    }

    pub fn fastest() -> Self {
        Self(1)
    }

    pub fn best() -> Self {
        Self(10)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    fn zlib(&self) -> u32 {
        self.0.min(9) as u32
    }

    fn lzma_preset(&self) -> u32 {
        (self.0 - 1) as u32
    }

    fn bzip2(&self) -> u32 {
        self.0.min(9) as u32
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(1)
    }
}

/// Trait for per-brick compression/decompression
pub trait Compressor: Send + Sync {
    /// Compress one brick payload
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>>;

    /// Decompress one brick payload. `raw_len` is the original size
    /// recorded in the catalog; a length mismatch is a decompression
    /// error (surfaced to callers as a corrupt brick).
    fn decompress(&self, data: &[u8], raw_len: usize) -> Result<Vec<u8>>;

    /// Get the compression method
    fn method(&self) -> CompressionMethod;
}

fn check_len(decompressed: Vec<u8>, raw_len: usize) -> Result<Vec<u8>> {
    if decompressed.len() != raw_len {
        return Err(VolumeError::Decompression(format!(
            "decompressed to {} bytes but catalog records {}",
            decompressed.len(),
            raw_len
        )));
    }
    Ok(decompressed)
}

/// No compression
#[derive(Debug, Default)]
pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn compress(&self, data: &[u8], _level: CompressionLevel) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8], raw_len: usize) -> Result<Vec<u8>> {
        check_len(data.to_vec(), raw_len)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::None
    }
}

/// zlib compression
#[derive(Debug, Default)]
pub struct ZlibCompressor;

impl Compressor for ZlibCompressor {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(data, FlateCompression::new(level.zlib()));
        let mut compressed = Vec::new();
        encoder
            .read_to_end(&mut compressed)
            .map_err(|e| VolumeError::Compression(e.to_string()))?;
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8], raw_len: usize) -> Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(data);
        let mut decompressed = Vec::with_capacity(raw_len);
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| VolumeError::Decompression(e.to_string()))?;
        check_len(decompressed, raw_len)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Zlib
    }
}

/// LZMA compression (xz container)
#[derive(Debug, Default)]
pub struct LzmaCompressor;

impl Compressor for LzmaCompressor {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        let mut encoder = XzEncoder::new(data, level.lzma_preset());
        let mut compressed = Vec::new();
        encoder
            .read_to_end(&mut compressed)
            .map_err(|e| VolumeError::Compression(e.to_string()))?;
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8], raw_len: usize) -> Result<Vec<u8>> {
        let mut decoder = XzDecoder::new(data);
        let mut decompressed = Vec::with_capacity(raw_len);
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| VolumeError::Decompression(e.to_string()))?;
        check_len(decompressed, raw_len)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Lzma
    }
}

/// LZ4 compression (block format, length-prefixed)
#[derive(Debug, Default)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn compress(&self, data: &[u8], _level: CompressionLevel) -> Result<Vec<u8>> {
        Ok(lz4_flex::block::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8], raw_len: usize) -> Result<Vec<u8>> {
        let decompressed = lz4_flex::block::decompress_size_prepended(data)
            .map_err(|e| VolumeError::Decompression(e.to_string()))?;
        check_len(decompressed, raw_len)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Lz4
    }
}

/// bzip2 compression
#[derive(Debug, Default)]
pub struct Bzip2Compressor;

impl Compressor for Bzip2Compressor {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        let mut encoder = BzEncoder::new(data, bzip2::Compression::new(level.bzip2()));
        let mut compressed = Vec::new();
        encoder
            .read_to_end(&mut compressed)
            .map_err(|e| VolumeError::Compression(e.to_string()))?;
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8], raw_len: usize) -> Result<Vec<u8>> {
        let mut decoder = BzDecoder::new(data);
        let mut decompressed = Vec::with_capacity(raw_len);
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| VolumeError::Decompression(e.to_string()))?;
        check_len(decompressed, raw_len)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Bzip2
    }
}

/// Get a compressor for a given method
pub fn get_compressor(method: CompressionMethod) -> Box<dyn Compressor> {
    match method {
        CompressionMethod::None => Box::new(NoneCompressor),
        CompressionMethod::Zlib => Box::new(ZlibCompressor),
        CompressionMethod::Lzma => Box::new(LzmaCompressor),
        CompressionMethod::Lz4 => Box::new(Lz4Compressor),
        CompressionMethod::Bzip2 => Box::new(Bzip2Compressor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const METHODS: [CompressionMethod; 5] = [
        CompressionMethod::None,
        CompressionMethod::Zlib,
        CompressionMethod::Lzma,
        CompressionMethod::Lz4,
        CompressionMethod::Bzip2,
    ];

    #[test]
    fn test_roundtrip_all_methods() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        for method in METHODS {
            let compressor = get_compressor(method);
            let compressed = compressor
                .compress(&data, CompressionLevel::default())
                .unwrap();
            let decompressed = compressor.decompress(&compressed, data.len()).unwrap();
            assert_eq!(decompressed, data, "round trip failed for {:?}", method);
        }
    }

    #[test]
    fn test_roundtrip_all_levels() {
        let data = b"abcabcabc".repeat(500);
        for level in 1..=10 {
            let compressor = ZlibCompressor;
            let compressed = compressor
                .compress(&data, CompressionLevel::new(level))
                .unwrap();
            assert!(compressed.len() < data.len());
            let decompressed = compressor.decompress(&compressed, data.len()).unwrap();
            assert_eq!(decompressed, data);
        }
    }

    #[test]
    fn test_level_clamping() {
        assert_eq!(CompressionLevel::new(0).value(), 1);
        assert_eq!(CompressionLevel::new(12).value(), 10);
        assert_eq!(CompressionLevel::best().zlib(), 9);
        assert_eq!(CompressionLevel::best().lzma_preset(), 9);
        assert_eq!(CompressionLevel::fastest().lzma_preset(), 0);
    }

    #[test]
    fn test_size_mismatch_detected() {
        let data = b"highly repetitive payload ".repeat(100);
        for method in METHODS {
            let compressor = get_compressor(method);
            let compressed = compressor
                .compress(&data, CompressionLevel::default())
                .unwrap();
            let result = compressor.decompress(&compressed, data.len() + 1);
            assert!(
                matches!(result, Err(VolumeError::Decompression(_))),
                "size mismatch not detected for {:?}",
                method
            );
        }
    }

    #[test]
    fn test_garbage_input_rejected() {
        let garbage = [0x13u8, 0x37, 0x00, 0xFF, 0xAB];
        for method in METHODS {
            if method == CompressionMethod::None {
                continue;
            }
            let compressor = get_compressor(method);
            assert!(
                compressor.decompress(&garbage, 100).is_err(),
                "garbage accepted by {:?}",
                method
            );
        }
    }

    #[test]
    fn test_method_ids_stable() {
        // Persisted ids; changing them breaks every existing container.
        assert_eq!(CompressionMethod::None as u8, 0);
        assert_eq!(CompressionMethod::Zlib as u8, 1);
        assert_eq!(CompressionMethod::Lzma as u8, 2);
        assert_eq!(CompressionMethod::Lz4 as u8, 3);
        assert_eq!(CompressionMethod::Bzip2 as u8, 4);
        assert_eq!(CompressionMethod::from_u8(5), None);
        for method in METHODS {
            assert_eq!(get_compressor(method).method(), method);
        }
    }
}
