//! Whole-file checksum engines.
//!
//! The digest covers every byte of the container with the digest field
//! itself read as zeros: the header is first written with a zeroed
//! placeholder, the finished file is streamed through the engine, and the
//! result is patched back into the placeholder. Readers recompute over the
//! same range, substituting zeros for the digest field, so writer and
//! reader always hash identical byte streams.

use crate::error::Result;
use md5::{Digest as _, Md5};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Streaming chunk size for digest passes.
const CHUNK_SIZE: usize = 1 << 20;

/// Checksum kinds persisted in the global header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChecksumKind {
    /// No whole-file digest
    None = 0,
    /// CRC32 (IEEE), 4-byte digest stored little-endian
    Crc32 = 1,
    /// MD5, 16-byte digest
    Md5 = 2,
}

impl ChecksumKind {
    /// Fixed digest width in bytes for this kind
    pub fn digest_len(&self) -> usize {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Crc32 => 4,
            ChecksumKind::Md5 => 16,
        }
    }

    /// Get the kind from its persisted byte value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ChecksumKind::None),
            1 => Some(ChecksumKind::Crc32),
            2 => Some(ChecksumKind::Md5),
            _ => None,
        }
    }
}

/// Streaming digest engine: create, feed bytes, finalize.
pub enum DigestEngine {
    None,
    Crc32(crc32fast::Hasher),
    Md5(Box<Md5>),
}

impl DigestEngine {
    pub fn new(kind: ChecksumKind) -> Self {
        match kind {
            ChecksumKind::None => DigestEngine::None,
            ChecksumKind::Crc32 => DigestEngine::Crc32(crc32fast::Hasher::new()),
            ChecksumKind::Md5 => DigestEngine::Md5(Box::new(Md5::new())),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            DigestEngine::None => {}
            DigestEngine::Crc32(hasher) => hasher.update(bytes),
            DigestEngine::Md5(hasher) => hasher.update(bytes),
        }
    }

    /// Finish the digest; the width matches [`ChecksumKind::digest_len`].
    pub fn finalize(self) -> Vec<u8> {
        match self {
            DigestEngine::None => Vec::new(),
            DigestEngine::Crc32(hasher) => hasher.finalize().to_le_bytes().to_vec(),
            DigestEngine::Md5(hasher) => hasher.finalize().to_vec(),
        }
    }
}

/// Stream an entire file through a digest engine, substituting zeros for
/// `zero_range` (the digest field itself).
pub(crate) async fn digest_file(
    file: &mut tokio::fs::File,
    kind: ChecksumKind,
    zero_range: Range<u64>,
) -> Result<Vec<u8>> {
    let mut engine = DigestEngine::new(kind);
    file.seek(std::io::SeekFrom::Start(0)).await?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut pos = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let chunk = &mut buf[..n];
        // Zero out any part of the chunk overlapping the digest field
        let chunk_range = pos..pos + n as u64;
        if chunk_range.start < zero_range.end && zero_range.start < chunk_range.end {
            let from = zero_range.start.max(chunk_range.start) - pos;
            let to = zero_range.end.min(chunk_range.end) - pos;
            chunk[from as usize..to as usize].fill(0);
        }
        engine.update(chunk);
        pos += n as u64;
    }
    Ok(engine.finalize())
}

/// Render a digest for log and error messages
pub fn digest_hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_widths() {
        assert_eq!(ChecksumKind::None.digest_len(), 0);
        assert_eq!(ChecksumKind::Crc32.digest_len(), 4);
        assert_eq!(ChecksumKind::Md5.digest_len(), 16);
    }

    #[test]
    fn test_md5_known_vector() {
        let mut engine = DigestEngine::new(ChecksumKind::Md5);
        engine.update(b"abc");
        assert_eq!(
            digest_hex(&engine.finalize()),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn test_crc32_incremental_matches_oneshot() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut split = DigestEngine::new(ChecksumKind::Crc32);
        split.update(&data[..10]);
        split.update(&data[10..]);

        let mut whole = DigestEngine::new(ChecksumKind::Crc32);
        whole.update(data);

        assert_eq!(split.finalize(), whole.finalize());
    }

    #[tokio::test]
    async fn test_digest_file_zero_substitution() {
        use std::io::Write;

        // A file whose bytes 4..8 are garbage must hash identically to one
        // where they are zero, when 4..8 is the excluded digest field.
        let mut clean = tempfile::NamedTempFile::new().unwrap();
        clean.write_all(&[1, 2, 3, 4, 0, 0, 0, 0, 9, 10]).unwrap();
        let mut dirty = tempfile::NamedTempFile::new().unwrap();
        dirty
            .write_all(&[1, 2, 3, 4, 0xde, 0xad, 0xbe, 0xef, 9, 10])
            .unwrap();

        let mut clean_file = tokio::fs::File::open(clean.path()).await.unwrap();
        let mut dirty_file = tokio::fs::File::open(dirty.path()).await.unwrap();

        let a = digest_file(&mut clean_file, ChecksumKind::Md5, 4..8)
            .await
            .unwrap();
        let b = digest_file(&mut dirty_file, ChecksumKind::Md5, 4..8)
            .await
            .unwrap();
        assert_eq!(a, b);

        // Without the exclusion they differ
        let mut dirty_file = tokio::fs::File::open(dirty.path()).await.unwrap();
        let c = digest_file(&mut dirty_file, ChecksumKind::Md5, 0..0)
            .await
            .unwrap();
        assert_ne!(a, c);
    }
}
