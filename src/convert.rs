//! Conversion session: flat source → bricked multi-resolution container.
//!
//! The session walks LOD levels finest to coarsest. Within a level,
//! brick extraction and compression fan out to a bounded worker pool
//! (permits derived from the memory budget) while the single writer
//! awaits the results in exactly the sequencer's order — computation may
//! complete out of order, the file is appended in order, so identical
//! input and configuration always produce identical bytes. A level's
//! downsampled successor is only built after the level completes (the
//! pyramid builder reads the level just written), which is the one join
//! barrier per level.
//!
//! Failures are fatal to the conversion: the partial output is deleted
//! and, having neither a patched block count nor a digest, would not
//! open even if it survived.

use crate::bricker::{extract_brick, ExtractedBrick, HistogramSpec};
use crate::catalog::{BrickEntry, Catalog, TocBlock};
use crate::checksum::{digest_file, digest_hex, ChecksumKind};
use crate::compression::{get_compressor, CompressionLevel, CompressionMethod};
use crate::error::{Result, VolumeError};
use crate::format::{BlockKind, GlobalHeader};
use crate::io::{BlockWriter, FlatSource};
use crate::layout::{BrickSize, VolumeLayout};
use crate::metadata::{HistogramBlock, KeyValueBlock, MaxMinBlock};
use crate::pyramid::{build_level, AverageFilter, DownsampleFilter};
use crate::sequence::{order_bricks, BrickOrdering};
use crate::types::{Domain, ValueRange};
use crate::utils::format_bytes;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Upper bound on bricks in flight regardless of the memory budget
const MAX_INFLIGHT_BRICKS: u64 = 32;

/// A brick being extracted and compressed by the worker pool
type BrickTask = tokio::task::JoinHandle<Result<(ExtractedBrick, Vec<u8>)>>;

/// Conversion-time configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertConfig {
    /// Maximum brick core size per axis
    pub max_brick_size: u64,
    /// Overlap voxels duplicated across internal brick boundaries
    pub overlap: u64,
    /// Physical brick write order
    pub ordering: BrickOrdering,
    /// Per-brick codec
    pub compression: CompressionMethod,
    /// Codec level on the generic 1-10 scale
    pub compression_level: CompressionLevel,
    /// Whole-file checksum kind
    pub checksum: ChecksumKind,
    /// Available memory in MB; bounds how many bricks may be buffered
    /// before the writer forces a flush
    pub memory_budget_mb: u64,
    /// Directory for scratch pyramid levels (system temp when unset)
    pub scratch_dir: Option<PathBuf>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            max_brick_size: 64,
            overlap: 2,
            ordering: BrickOrdering::Scanline,
            compression: CompressionMethod::None,
            compression_level: CompressionLevel::default(),
            checksum: ChecksumKind::Md5,
            memory_budget_mb: 512,
            scratch_dir: None,
        }
    }
}

impl ConvertConfig {
    pub fn with_brick_size(mut self, size: u64) -> Self {
        self.max_brick_size = size;
        self
    }

    pub fn with_overlap(mut self, overlap: u64) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_ordering(mut self, ordering: BrickOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_compression(mut self, method: CompressionMethod, level: CompressionLevel) -> Self {
        self.compression = method;
        self.compression_level = level;
        self
    }

    pub fn with_checksum(mut self, kind: ChecksumKind) -> Self {
        self.checksum = kind;
        self
    }

    pub fn with_memory_budget_mb(mut self, mb: u64) -> Self {
        self.memory_budget_mb = mb;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }
}

/// Progress events delivered to the conversion callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    LevelStarted { lod: usize, bricks: u64 },
    BrickWritten { lod: usize, written: u64, total: u64 },
    LevelFinished { lod: usize },
    Finalizing,
}

/// Conversion progress callback
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// What a finished conversion produced
#[derive(Debug, Clone)]
pub struct ConversionSummary {
    pub lod_count: usize,
    pub total_bricks: u64,
    /// Uncompressed brick bytes, apron included
    pub raw_bytes: u64,
    /// Compressed data region size
    pub data_bytes: u64,
    /// Final container file size
    pub file_bytes: u64,
}

impl ConversionSummary {
    pub fn summary(&self) -> String {
        format!(
            "{} LOD levels, {} bricks, {} raw -> {} on disk ({} total file)",
            self.lod_count,
            self.total_bricks,
            format_bytes(self.raw_bytes),
            format_bytes(self.data_bytes),
            format_bytes(self.file_bytes),
        )
    }
}

/// A conversion session. Owns its configuration, filter, progress sink
/// and cancellation token; holds no process-wide state.
pub struct Converter {
    config: ConvertConfig,
    filter: Arc<dyn DownsampleFilter>,
    progress: Option<ProgressCallback>,
    cancel: Arc<AtomicBool>,
}

impl Converter {
    pub fn new(config: ConvertConfig) -> Self {
        Self {
            config,
            filter: Arc::new(AverageFilter),
            progress: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the default average downsampling filter
    pub fn with_filter(mut self, filter: Arc<dyn DownsampleFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Token that aborts the conversion at the next brick boundary
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn report(&self, event: Progress) {
        if let Some(callback) = &self.progress {
            callback(event);
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(VolumeError::Cancelled);
        }
        Ok(())
    }

    /// Join the oldest in-flight brick and append it: the single writer
    /// consuming tasks in spawn order is what turns out-of-order
    /// computation into a deterministic file.
    #[allow(clippy::too_many_arguments)]
    async fn consume_brick(
        &self,
        task: BrickTask,
        lod: usize,
        index: u64,
        total: u64,
        written: &mut u64,
        data_start: u64,
        writer: &mut BlockWriter,
        catalog: &mut Catalog,
        level_range: &mut ValueRange,
        histogram: &mut Option<Vec<u64>>,
        raw_bytes: &mut u64,
    ) -> Result<()> {
        let (brick, compressed) = task
            .await
            .map_err(|e| VolumeError::Io(std::io::Error::other(e)))??;

        let offset = writer.position() - data_start;
        writer.write_bytes(&compressed).await?;

        level_range.merge(&brick.range);
        if let (Some(bins), Some(brick_bins)) = (histogram.as_mut(), &brick.histogram) {
            for (bin, add) in bins.iter_mut().zip(brick_bins.iter()) {
                *bin += add;
            }
        }
        *raw_bytes += brick.bytes.len() as u64;
        catalog.record(
            lod,
            index,
            BrickEntry {
                offset,
                compressed_len: compressed.len() as u64,
                raw_len: brick.bytes.len() as u64,
                codec: self.config.compression,
                range: brick.range,
            },
        )?;

        *written += 1;
        debug!(lod, index, bytes = compressed.len(), "brick written");
        self.report(Progress::BrickWritten {
            lod,
            written: *written,
            total,
        });
        Ok(())
    }

    /// Convert a flat source into a bricked container at `dest`.
    ///
    /// Fatal errors delete the partial output; a partially written file
    /// is never openable in any case since its header is only patched at
    /// finalize time.
    pub async fn convert(
        &self,
        source: Arc<dyn FlatSource>,
        domain: Domain,
        dest: &Path,
    ) -> Result<ConversionSummary> {
        let result = self.convert_inner(source, domain, dest).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    async fn convert_inner(
        &self,
        source: Arc<dyn FlatSource>,
        domain: Domain,
        dest: &Path,
    ) -> Result<ConversionSummary> {
        let element = domain.element();
        let expected = domain.flat_size_bytes();
        if source.len() != expected {
            return Err(VolumeError::InvalidDimensions(format!(
                "source holds {} bytes but the domain describes {}",
                source.len(),
                expected
            )));
        }

        let layout = VolumeLayout::new(
            domain.clone(),
            BrickSize::uniform(domain.rank(), self.config.max_brick_size)?,
            self.config.overlap,
        )?;
        let lod_count = layout.lod_count();
        let brick_counts: Vec<u64> = (0..lod_count).map(|lod| layout.brick_count(lod)).collect();
        info!(
            lod_count,
            total_bricks = layout.total_bricks(),
            "starting conversion"
        );

        let mut catalog = Catalog::with_counts(&brick_counts);
        let mut level_ranges = vec![ValueRange::empty(); lod_count];
        let hist_spec = HistogramSpec::for_element(element);
        let mut histogram: Option<Vec<u64>> = hist_spec.map(|spec| vec![0; spec.bins]);

        let header = GlobalHeader::new(self.config.checksum);
        let mut writer = BlockWriter::create(dest, header.big_endian).await?;
        writer.write_bytes(&header.to_bytes()).await?;

        // Data block with a length placeholder, patched after the levels
        writer.write_u8(BlockKind::Data as u8).await?;
        let data_len_offset = writer.position();
        writer.write_u64(0).await?;
        let data_start = writer.position();

        // Worker window: how many bricks the memory budget can hold in
        // flight at once. The window is also what keeps writes ordered:
        // bricks are spawned and consumed in sequencer order, so
        // computation may finish out of order but never lands out of
        // order.
        let apron_brick_bytes: u64 = layout
            .brick_size()
            .dims()
            .iter()
            .map(|&b| b + 2 * self.config.overlap)
            .product::<u64>()
            * element.size_in_bytes() as u64;
        let budget_bytes = self.config.memory_budget_mb.max(1) * (1 << 20);
        let window = (budget_bytes / apron_brick_bytes.max(1))
            .clamp(1, MAX_INFLIGHT_BRICKS) as usize;

        let mut raw_bytes = 0u64;
        let mut level_store: Arc<dyn FlatSource> = source;
        let mut level_size = domain.level_size(0);

        for lod in 0..lod_count {
            let grid = layout.brick_grid(lod);
            let order = order_bricks(&grid, self.config.ordering);
            let total = order.len() as u64;
            self.report(Progress::LevelStarted { lod, bricks: total });
            info!(lod, bricks = total, "writing level");

            let mut pending: VecDeque<(u64, BrickTask)> = VecDeque::new();
            let mut written = 0u64;
            let mut failure: Option<VolumeError> = None;

            for &index in &order {
                if failure.is_some() {
                    break;
                }
                if let Err(err) = self.check_cancelled() {
                    failure = Some(err);
                    break;
                }

                if pending.len() == window {
                    let (front, task) = pending.pop_front().unwrap();
                    if let Err(err) = self
                        .consume_brick(
                            task,
                            lod,
                            front,
                            total,
                            &mut written,
                            data_start,
                            &mut writer,
                            &mut catalog,
                            &mut level_ranges[lod],
                            &mut histogram,
                            &mut raw_bytes,
                        )
                        .await
                    {
                        failure = Some(err);
                        break;
                    }
                }

                let store = Arc::clone(&level_store);
                let size = level_size.clone();
                let extent = layout.brick_extent(lod, index)?;
                let method = self.config.compression;
                let level = self.config.compression_level;
                let collect = if lod == 0 { hist_spec } else { None };

                let task = tokio::spawn(async move {
                    let brick = extract_brick(&store, &size, element, &extent, collect).await?;
                    tokio::task::spawn_blocking(move || {
                        let compressed = get_compressor(method).compress(&brick.bytes, level)?;
                        Ok::<_, VolumeError>((brick, compressed))
                    })
                    .await
                    .map_err(|e| VolumeError::Io(std::io::Error::other(e)))?
                });
                pending.push_back((index, task));
            }

            while failure.is_none() {
                if let Err(err) = self.check_cancelled() {
                    failure = Some(err);
                    break;
                }
                match pending.pop_front() {
                    Some((index, task)) => {
                        if let Err(err) = self
                            .consume_brick(
                                task,
                                lod,
                                index,
                                total,
                                &mut written,
                                data_start,
                                &mut writer,
                                &mut catalog,
                                &mut level_ranges[lod],
                                &mut histogram,
                                &mut raw_bytes,
                            )
                            .await
                        {
                            failure = Some(err);
                        }
                    }
                    None => break,
                }
            }

            if let Some(err) = failure {
                for (_, task) in &pending {
                    task.abort();
                }
                return Err(err);
            }
            self.report(Progress::LevelFinished { lod });

            // Join barrier: the next level is decimated from the one that
            // just completed.
            if lod + 1 < lod_count {
                let (scratch, next_size) = build_level(
                    &level_store,
                    &level_size,
                    domain.decimation(),
                    element,
                    self.filter.as_ref(),
                    self.config.scratch_dir.as_deref(),
                )
                .await?;
                level_store = Arc::new(scratch);
                level_size = next_size;
            }
        }

        let data_bytes = writer.position() - data_start;
        writer.patch_u64_at(data_len_offset, data_bytes).await?;

        catalog.ensure_complete()?;
        self.report(Progress::Finalizing);

        let toc = TocBlock {
            layout: layout.clone(),
            ordering: self.config.ordering,
            codec: self.config.compression,
            level: self.config.compression_level,
            catalog,
        };
        let mut block_count = 2u64; // data + toc
        write_block(&mut writer, BlockKind::Toc, &toc.encode(header.big_endian)).await?;

        let maxmin = MaxMinBlock {
            ranges: level_ranges,
        };
        write_block(
            &mut writer,
            BlockKind::MaxMin,
            &maxmin.encode(header.big_endian),
        )
        .await?;
        block_count += 1;

        if let Some(bins) = histogram {
            let block = HistogramBlock { bins };
            write_block(
                &mut writer,
                BlockKind::Histogram1d,
                &block.encode(header.big_endian),
            )
            .await?;
            block_count += 1;
        }

        let keyvalue = KeyValueBlock::for_conversion(self.filter.name(), expected);
        write_block(
            &mut writer,
            BlockKind::KeyValue,
            &keyvalue.encode(header.big_endian),
        )
        .await?;
        block_count += 1;

        writer
            .patch_u64_at(header.block_count_offset(), block_count)
            .await?;
        writer.flush().await?;

        // Two-phase checksum: the digest field still holds zeros, so
        // streaming the file now hashes exactly what a verifying reader
        // will reconstruct.
        let file_bytes = writer.position();
        if self.config.checksum != ChecksumKind::None {
            let digest_at = header.digest_offset();
            let digest_end = digest_at + self.config.checksum.digest_len() as u64;
            let digest = digest_file(writer.file_mut(), self.config.checksum, digest_at..digest_end)
                .await?;
            info!(digest = %digest_hex(&digest), "finalized checksum");
            writer.patch_bytes_at(digest_at, &digest).await?;
            writer.flush().await?;
        }

        let summary = ConversionSummary {
            lod_count,
            total_bricks: layout.total_bricks(),
            raw_bytes,
            data_bytes,
            file_bytes,
        };
        info!("{}", summary.summary());
        Ok(summary)
    }
}

async fn write_block(writer: &mut BlockWriter, kind: BlockKind, payload: &[u8]) -> Result<()> {
    writer.write_u8(kind as u8).await?;
    writer.write_u64(payload.len() as u64).await?;
    writer.write_bytes(payload).await
}
