//! On-disk format constants, the global file header, and the closed set
//! of block kinds.
//!
//! A container is one file: a global header followed by `block_count`
//! blocks, each a kind byte, a u64 payload length, and the payload. Block
//! dispatch is a closed enum matched exhaustively at this boundary; a kind
//! byte outside the enum makes the file invalid rather than silently
//! skipped.

use crate::checksum::ChecksumKind;
use crate::error::{Result, VolumeError};
use crate::io::{ByteReader, ByteWriter};

/// Magic bytes opening every container file
pub const MAGIC: &[u8; 8] = b"BVF-DATA";

/// Current format version
pub const FORMAT_VERSION: u32 = 1;

/// Byte offset of the digest field: magic (8) + endianness (1) +
/// version (4) + checksum kind (1).
pub const DIGEST_OFFSET: u64 = 14;

/// Size in bytes of the per-block prefix (kind u8 + payload length u64)
pub const BLOCK_PREFIX: u64 = 9;

/// Block kinds — closed set, exhaustively matched at the serialization
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockKind {
    /// Raw brick payloads, back to back, in physical write order
    Data = 0,
    /// Table of contents: layout descriptor + dense brick entry table
    Toc = 1,
    /// Per-LOD global min/max pairs
    MaxMin = 2,
    /// 1D value histogram over the finest level's core regions
    Histogram1d = 3,
    /// Free-form key/value metadata pairs
    KeyValue = 4,
}

impl BlockKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(BlockKind::Data),
            1 => Some(BlockKind::Toc),
            2 => Some(BlockKind::MaxMin),
            3 => Some(BlockKind::Histogram1d),
            4 => Some(BlockKind::KeyValue),
            _ => None,
        }
    }
}

/// Global file header.
///
/// Written first with a zeroed digest and block count of 0; both fields
/// are patched once the last block is on disk. A file whose digest is
/// still zeroed under a non-`None` checksum kind was never finalized.
#[derive(Debug, Clone)]
pub struct GlobalHeader {
    /// Byte order of every multi-byte integer in the file
    pub big_endian: bool,
    pub version: u32,
    pub checksum_kind: ChecksumKind,
    /// Digest bytes, width fixed by the kind
    pub digest: Vec<u8>,
    pub block_count: u64,
}

impl GlobalHeader {
    /// New little-endian header with a zeroed digest placeholder
    pub fn new(checksum_kind: ChecksumKind) -> Self {
        Self {
            big_endian: false,
            version: FORMAT_VERSION,
            checksum_kind,
            digest: vec![0; checksum_kind.digest_len()],
            block_count: 0,
        }
    }

    /// Total header size in bytes
    pub fn size(&self) -> u64 {
        DIGEST_OFFSET + self.checksum_kind.digest_len() as u64 + 8
    }

    /// Byte offset of the digest field
    pub fn digest_offset(&self) -> u64 {
        DIGEST_OFFSET
    }

    /// Byte offset of the block count field
    pub fn block_count_offset(&self) -> u64 {
        DIGEST_OFFSET + self.checksum_kind.digest_len() as u64
    }

    /// Serialize to exactly [`GlobalHeader::size`] bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::new(self.big_endian);
        w.put_bytes(MAGIC);
        w.put_u8(self.big_endian as u8);
        w.put_u32(self.version);
        w.put_u8(self.checksum_kind as u8);
        w.put_bytes(&self.digest);
        w.put_u64(self.block_count);
        w.into_inner()
    }

    /// Parse the fixed header prefix (first [`DIGEST_OFFSET`] bytes),
    /// returning a header whose digest and block count are still unset.
    /// The caller then reads `checksum_kind.digest_len() + 8` more bytes
    /// and completes parsing with [`GlobalHeader::parse_tail`].
    pub fn parse_prefix(buf: &[u8]) -> Result<Self> {
        if buf.len() < DIGEST_OFFSET as usize {
            return Err(VolumeError::InvalidFormat(
                "file too small to be a volume container".to_string(),
            ));
        }
        if &buf[..8] != MAGIC {
            return Err(VolumeError::InvalidFormat(
                "file magic not found".to_string(),
            ));
        }
        let big_endian = match buf[8] {
            0 => false,
            1 => true,
            other => {
                return Err(VolumeError::InvalidFormat(format!(
                    "invalid endianness flag {}",
                    other
                )))
            }
        };
        let mut r = ByteReader::new(&buf[9..14], big_endian);
        let version = r.u32()?;
        if version != FORMAT_VERSION {
            return Err(VolumeError::UnsupportedVersion(version));
        }
        let checksum_kind = ChecksumKind::from_u8(r.u8()?).ok_or_else(|| {
            VolumeError::InvalidFormat("unknown checksum kind".to_string())
        })?;
        Ok(Self {
            big_endian,
            version,
            checksum_kind,
            digest: Vec::new(),
            block_count: 0,
        })
    }

    /// Complete a prefix-parsed header from the digest + block count bytes
    pub fn parse_tail(&mut self, buf: &[u8]) -> Result<()> {
        let digest_len = self.checksum_kind.digest_len();
        let mut r = ByteReader::new(buf, self.big_endian);
        self.digest = r.bytes(digest_len)?.to_vec();
        self.block_count = r.u64()?;
        Ok(())
    }

    /// Parse a complete header from one buffer
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let mut header = Self::parse_prefix(buf)?;
        if buf.len() < header.size() as usize {
            return Err(VolumeError::InvalidFormat(
                "truncated global header".to_string(),
            ));
        }
        header.parse_tail(&buf[DIGEST_OFFSET as usize..])?;
        Ok(header)
    }
}
