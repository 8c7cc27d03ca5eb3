//! Random access to a finished container.
//!
//! Opening loads the header and every metadata block into memory; brick
//! reads then cost one positioned read plus one decompression each. All
//! state is immutable after open, so a [`VolumeAccess`] can be shared
//! freely across reader tasks; concurrent brick reads issue atomic
//! pread-style reads on one shared file handle, never seek-then-read.
//!
//! Failures stay local: a corrupt brick poisons only the request that hit
//! it, and a whole-file checksum mismatch is reported as a warning while
//! the file stays open.

use crate::catalog::{BrickEntry, Catalog, TocBlock};
use crate::checksum::{digest_file, digest_hex, ChecksumKind};
use crate::compression::get_compressor;
use crate::error::{Result, VolumeError};
use crate::format::{BlockKind, GlobalHeader, BLOCK_PREFIX, DIGEST_OFFSET};
use crate::io::{read_at_async, read_exact_at, ByteReader};
use crate::layout::{BrickExtent, VolumeLayout};
use crate::metadata::{HistogramBlock, KeyValueBlock, MaxMinBlock};
use crate::types::{Domain, ValueRange};
use bytes::Bytes;
use futures::future::try_join_all;
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::File;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Decoded bricks kept around for repeat requests
const DEFAULT_BRICK_CACHE: usize = 32;

/// Read handle over one container file
pub struct VolumeAccess {
    file: Arc<File>,
    path: PathBuf,
    header: GlobalHeader,
    toc: TocBlock,
    maxmin: Option<MaxMinBlock>,
    histogram: Option<HistogramBlock>,
    keyvalue: KeyValueBlock,
    data_offset: u64,
    data_len: u64,
    cache: Mutex<LruCache<(usize, u64), Bytes>>,
}

impl VolumeAccess {
    /// Open a container for random brick access without verifying the
    /// whole-file checksum.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || Self::open_sync(path))
            .await
            .map_err(|e| VolumeError::Io(std::io::Error::other(e)))?
    }

    /// Open and verify the whole-file checksum. A digest mismatch does
    /// not fail the open: the handle is returned together with the
    /// recoverable [`VolumeError::ChecksumMismatch`] so the caller can
    /// decide how loudly to complain.
    pub async fn open_verified(path: impl AsRef<Path>) -> Result<(Self, Option<VolumeError>)> {
        let access = Self::open(path).await?;
        match access.verify_checksum().await {
            Ok(()) => Ok((access, None)),
            Err(err @ VolumeError::ChecksumMismatch { .. }) => {
                warn!("{}", err);
                Ok((access, Some(err)))
            }
            Err(err) => Err(err),
        }
    }

    fn open_sync(path: PathBuf) -> Result<Self> {
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();

        let mut prefix = [0u8; DIGEST_OFFSET as usize];
        read_exact_at(&file, 0, &mut prefix)?;
        let mut header = GlobalHeader::parse_prefix(&prefix)?;

        let tail_len = header.checksum_kind.digest_len() + 8;
        let mut tail = vec![0u8; tail_len];
        read_exact_at(&file, DIGEST_OFFSET, &mut tail)?;
        header.parse_tail(&tail)?;

        if header.block_count == 0 {
            return Err(VolumeError::InvalidFormat(
                "container was never finalized".to_string(),
            ));
        }

        let mut toc = None;
        let mut maxmin = None;
        let mut histogram = None;
        let mut keyvalue = None;
        let mut data = None;

        let mut pos = header.size();
        for _ in 0..header.block_count {
            let mut block_prefix = [0u8; BLOCK_PREFIX as usize];
            read_exact_at(&file, pos, &mut block_prefix)?;
            let kind_byte = block_prefix[0];
            let mut r = ByteReader::new(&block_prefix[1..], header.big_endian);
            let payload_len = r.u64()?;
            let payload_at = pos + BLOCK_PREFIX;
            if payload_at + payload_len > file_len {
                return Err(VolumeError::InvalidFormat(
                    "block payload runs past end of file".to_string(),
                ));
            }

            let kind = BlockKind::from_u8(kind_byte).ok_or_else(|| {
                VolumeError::InvalidFormat(format!("unknown block kind {}", kind_byte))
            })?;
            match kind {
                BlockKind::Data => {
                    data = Some((payload_at, payload_len));
                }
                BlockKind::Toc => {
                    let payload = read_payload(&file, payload_at, payload_len)?;
                    toc = Some(TocBlock::decode(&payload, header.big_endian)?);
                }
                BlockKind::MaxMin => {
                    let payload = read_payload(&file, payload_at, payload_len)?;
                    maxmin = Some(MaxMinBlock::decode(&payload, header.big_endian)?);
                }
                BlockKind::Histogram1d => {
                    let payload = read_payload(&file, payload_at, payload_len)?;
                    histogram = Some(HistogramBlock::decode(&payload, header.big_endian)?);
                }
                BlockKind::KeyValue => {
                    let payload = read_payload(&file, payload_at, payload_len)?;
                    keyvalue = Some(KeyValueBlock::decode(&payload, header.big_endian)?);
                }
            }
            pos = payload_at + payload_len;
        }

        let (data_offset, data_len) = data.ok_or_else(|| {
            VolumeError::InvalidFormat("container has no data block".to_string())
        })?;
        let toc = toc.ok_or_else(|| {
            VolumeError::InvalidFormat("container has no table of contents".to_string())
        })?;

        Ok(Self {
            file: Arc::new(file),
            path,
            header,
            toc,
            maxmin,
            histogram,
            keyvalue: keyvalue.unwrap_or_default(),
            data_offset,
            data_len,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_BRICK_CACHE).unwrap(),
            )),
        })
    }

    /// Resize the decoded-brick cache (pass 0 to keep the minimum of one)
    pub fn with_cache_capacity(mut self, bricks: usize) -> Self {
        self.cache = Mutex::new(LruCache::new(
            NonZeroUsize::new(bricks.max(1)).unwrap(),
        ));
        self
    }

    /// Recompute the whole-file digest (digest field read as zeros) and
    /// compare it to the stored one.
    pub async fn verify_checksum(&self) -> Result<()> {
        let kind = self.header.checksum_kind;
        if kind == ChecksumKind::None {
            return Ok(());
        }
        let mut file = tokio::fs::File::open(&self.path).await?;
        let digest_at = self.header.digest_offset();
        let digest_end = digest_at + kind.digest_len() as u64;
        let computed = digest_file(&mut file, kind, digest_at..digest_end).await?;
        if computed != self.header.digest {
            return Err(VolumeError::ChecksumMismatch {
                stored: digest_hex(&self.header.digest),
                computed: digest_hex(&computed),
            });
        }
        Ok(())
    }

    /// Read and decode one brick. O(1): one positioned read of the
    /// brick's payload plus its decompression; no other brick is touched.
    pub async fn brick(&self, lod: usize, index: u64) -> Result<Bytes> {
        let entry = self
            .toc
            .catalog
            .lookup(lod, index)
            .ok_or_else(|| {
                VolumeError::OutOfBounds(format!("no brick {} at lod {}", index, lod))
            })?
            .clone();

        if let Some(cached) = self.cache.lock().get(&(lod, index)) {
            return Ok(cached.clone());
        }

        if entry.offset + entry.compressed_len > self.data_len {
            return Err(VolumeError::CorruptBrick {
                lod,
                index,
                reason: "catalog entry runs past the data region".to_string(),
            });
        }

        let compressed = read_at_async(
            Arc::clone(&self.file),
            self.data_offset + entry.offset,
            entry.compressed_len as usize,
        )
        .await?;

        let codec = entry.codec;
        let raw_len = entry.raw_len as usize;
        let decoded = tokio::task::spawn_blocking(move || {
            get_compressor(codec).decompress(&compressed, raw_len)
        })
        .await
        .map_err(|e| VolumeError::Io(std::io::Error::other(e)))?
        .map_err(|err| VolumeError::CorruptBrick {
            lod,
            index,
            reason: err.to_string(),
        })?;

        let decoded = Bytes::from(decoded);
        self.cache.lock().put((lod, index), decoded.clone());
        Ok(decoded)
    }

    /// Read several bricks concurrently
    pub async fn bricks(&self, requests: &[(usize, u64)]) -> Result<Vec<Bytes>> {
        try_join_all(requests.iter().map(|&(lod, index)| self.brick(lod, index))).await
    }

    /// Domain of the stored volume
    pub fn domain(&self) -> &Domain {
        self.toc.layout.domain()
    }

    /// Full bricking description
    pub fn layout(&self) -> &VolumeLayout {
        &self.toc.layout
    }

    /// Catalog mapping brick identity to physical location
    pub fn catalog(&self) -> &Catalog {
        &self.toc.catalog
    }

    /// Catalog entry for one brick
    pub fn brick_entry(&self, lod: usize, index: u64) -> Option<&BrickEntry> {
        self.toc.catalog.lookup(lod, index)
    }

    /// Extent of one brick in level voxel coordinates
    pub fn brick_extent(&self, lod: usize, index: u64) -> Result<BrickExtent> {
        self.toc.layout.brick_extent(lod, index)
    }

    pub fn lod_count(&self) -> usize {
        self.toc.layout.lod_count()
    }

    /// Whether the file's integers are big-endian (brick payloads are
    /// returned in file byte order)
    pub fn is_big_endian(&self) -> bool {
        self.header.big_endian
    }

    /// Global value range of one LOD level, when recorded
    pub fn value_range(&self, lod: usize) -> Option<ValueRange> {
        self.maxmin.as_ref()?.ranges.get(lod).copied()
    }

    /// 1D value histogram over the finest level, when recorded
    pub fn histogram(&self) -> Option<&[u64]> {
        self.histogram.as_ref().map(|h| h.bins.as_slice())
    }

    /// Free-form metadata recorded at conversion time
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.keyvalue.get(key)
    }
}

fn read_payload(file: &File, offset: u64, len: u64) -> Result<Vec<u8>> {
    let mut payload = vec![0u8; len as usize];
    read_exact_at(file, offset, &mut payload)?;
    Ok(payload)
}
