//! Endian-aware serialization primitives and file access.
//!
//! Every on-disk structure goes through [`ByteWriter`]/[`ByteReader`]
//! (in-memory block payloads) or [`BlockWriter`] (the seekable container
//! file): no component encodes bytes on its own. Random-access reads use
//! atomic pread-style positioned IO so any number of reader threads can
//! share one file handle without a seek race.

use crate::error::{Result, VolumeError};
use async_trait::async_trait;
use bytes::Bytes;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

// ---------------------------------------------------------------------------
// In-memory payload serialization
// ---------------------------------------------------------------------------

/// Endian-aware writer for in-memory block payloads
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
    big_endian: bool,
}

impl ByteWriter {
    pub fn new(big_endian: bool) -> Self {
        Self {
            buf: Vec::new(),
            big_endian,
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        let bytes = if self.big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        };
        self.buf.extend_from_slice(&bytes);
    }

    pub fn put_u64(&mut self, v: u64) {
        let bytes = if self.big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        };
        self.buf.extend_from_slice(&bytes);
    }

    pub fn put_f64(&mut self, v: f64) {
        self.put_u64(v.to_bits());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Length-prefixed UTF-8 string (u32 length + bytes)
    pub fn put_str(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Endian-aware reader over an in-memory block payload
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    big_endian: bool,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8], big_endian: bool) -> Self {
        Self {
            buf,
            pos: 0,
            big_endian,
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.buf.len() {
            return Err(VolumeError::InvalidFormat(
                "truncated block payload".to_string(),
            ));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(if self.big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        })
    }

    pub fn u64(&mut self) -> Result<u64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(if self.big_endian {
            u64::from_be_bytes(bytes)
        } else {
            u64::from_le_bytes(bytes)
        })
    }

    pub fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.u64()?))
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    pub fn str(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| VolumeError::InvalidFormat("invalid UTF-8 in block payload".to_string()))
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

// ---------------------------------------------------------------------------
// Container file writer
// ---------------------------------------------------------------------------

/// Seekable writer over the container file being produced. Appends run
/// through a cursor mirror so block offsets are known without re-querying
/// the OS; placeholder fields (header digest, block payload lengths) are
/// patched in place after the fact.
pub(crate) struct BlockWriter {
    file: tokio::fs::File,
    position: u64,
    big_endian: bool,
}

impl BlockWriter {
    /// Create (or truncate) the container file. Opened read+write so the
    /// finalize pass can stream the finished bytes back through the
    /// checksum engine.
    pub async fn create(path: &Path, big_endian: bool) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        Ok(Self {
            file,
            position: 0,
            big_endian,
        })
    }

    /// Current append position (bytes from file start)
    pub fn position(&self) -> u64 {
        self.position
    }

    pub async fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes).await?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    pub async fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_bytes(&[v]).await
    }

    pub async fn write_u64(&mut self, v: u64) -> Result<()> {
        let bytes = if self.big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        };
        self.write_bytes(&bytes).await
    }

    /// Overwrite previously written bytes at `offset`, then return the
    /// cursor to the append position.
    pub async fn patch_bytes_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file.seek(std::io::SeekFrom::Start(offset)).await?;
        self.file.write_all(bytes).await?;
        self.file
            .seek(std::io::SeekFrom::Start(self.position))
            .await?;
        Ok(())
    }

    pub async fn patch_u64_at(&mut self, offset: u64, v: u64) -> Result<()> {
        let bytes = if self.big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        };
        self.patch_bytes_at(offset, &bytes).await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.file.flush().await?;
        Ok(())
    }

    /// Borrow the underlying file for checksum streaming. The caller must
    /// restore the cursor (patch or seek) before appending again.
    pub fn file_mut(&mut self) -> &mut tokio::fs::File {
        &mut self.file
    }
}

// ---------------------------------------------------------------------------
// Positioned reads
// ---------------------------------------------------------------------------

/// Atomic positioned read: never a separate seek followed by a read, so
/// concurrent readers can share the handle.
pub(crate) fn read_exact_at(file: &File, offset: u64, buf: &mut [u8]) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.read_exact_at(buf, offset)?;
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::FileExt;
        let mut read = 0usize;
        while read < buf.len() {
            let n = file.seek_read(&mut buf[read..], offset + read as u64)?;
            if n == 0 {
                return Err(VolumeError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "unexpected end of file",
                )));
            }
            read += n;
        }
    }
    Ok(())
}

/// Positioned read dispatched to the blocking pool, for async callers.
pub(crate) async fn read_at_async(file: Arc<File>, offset: u64, len: usize) -> Result<Bytes> {
    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; len];
        read_exact_at(&file, offset, &mut buf)?;
        Ok(Bytes::from(buf))
    })
    .await
    .map_err(|e| VolumeError::Io(std::io::Error::other(e)))?
}

// ---------------------------------------------------------------------------
// Flat sources
// ---------------------------------------------------------------------------

/// A readable flat voxel array: the level-0 input of a conversion and the
/// backing abstraction for scratch pyramid levels. Implementations must
/// support concurrent positioned reads.
#[async_trait]
pub trait FlatSource: Send + Sync {
    /// Total length in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `len` bytes starting at `offset`
    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes>;
}

/// Flat source over an in-memory buffer
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl FlatSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        let start = offset as usize;
        if start + len > self.data.len() {
            return Err(VolumeError::OutOfBounds(format!(
                "read of {} bytes at {} beyond source of {} bytes",
                len,
                offset,
                self.data.len()
            )));
        }
        Ok(self.data.slice(start..start + len))
    }
}

/// Flat source over a large file on disk
pub struct FileSource {
    file: Arc<File>,
    len: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

#[async_trait]
impl FlatSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        if offset + len as u64 > self.len {
            return Err(VolumeError::OutOfBounds(format!(
                "read of {} bytes at {} beyond source of {} bytes",
                len, offset, self.len
            )));
        }
        read_at_async(Arc::clone(&self.file), offset, len).await
    }
}
