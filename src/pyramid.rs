//! Out-of-core LOD pyramid construction.
//!
//! Each level is produced from the previous one by windowed decimation:
//! for every output voxel the `decimation^rank` corresponding input voxels
//! (clamped at domain edges) are combined by a pluggable filter. The
//! builder processes one output row at a time and only ever holds the
//! input rows that row's windows touch, so no level needs to be memory
//! resident. Output levels land in anonymous scratch files; the level-0
//! source is only read, never copied, which keeps the bottom-level
//! "source and destination share a backing file" case safe.

use crate::error::{Result, VolumeError};
use crate::io::{read_at_async, FlatSource};
use crate::types::{dispatch_element_kind, ElementType, Sample};
use crate::utils::{ceil_div, flat_offset, for_each_coord};
use async_trait::async_trait;
use bytes::Bytes;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Flush granularity for scratch writes
const WRITE_CHUNK: usize = 4 << 20;

/// Strategy combining one decimation window into one output sample.
/// Samples arrive widened to f64; the result is cast back to the element
/// kind by the caller (truncating for integer kinds).
pub trait DownsampleFilter: Send + Sync {
    fn combine(&self, samples: &[f64]) -> f64;

    /// Name persisted in the key/value metadata block
    fn name(&self) -> &'static str;
}

/// Arithmetic mean (the default). Integer volumes truncate the mean
/// toward zero rather than rounding; this lossy step is part of the
/// on-disk contract and must not be "fixed".
#[derive(Debug, Default)]
pub struct AverageFilter;

impl DownsampleFilter for AverageFilter {
    fn combine(&self, samples: &[f64]) -> f64 {
        let sum: f64 = samples.iter().sum();
        sum / samples.len() as f64
    }

    fn name(&self) -> &'static str {
        "average"
    }
}

/// Window minimum
#[derive(Debug, Default)]
pub struct MinimumFilter;

impl DownsampleFilter for MinimumFilter {
    fn combine(&self, samples: &[f64]) -> f64 {
        samples.iter().copied().fold(f64::INFINITY, f64::min)
    }

    fn name(&self) -> &'static str {
        "minimum"
    }
}

/// Window maximum
#[derive(Debug, Default)]
pub struct MaximumFilter;

impl DownsampleFilter for MaximumFilter {
    fn combine(&self, samples: &[f64]) -> f64 {
        samples.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    fn name(&self) -> &'static str {
        "maximum"
    }
}

/// Window median (mean of the two middle samples for even windows)
#[derive(Debug, Default)]
pub struct MedianFilter;

impl DownsampleFilter for MedianFilter {
    fn combine(&self, samples: &[f64]) -> f64 {
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 1 {
            sorted[mid]
        } else {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        }
    }

    fn name(&self) -> &'static str {
        "median"
    }
}

/// One downsampled level in an anonymous scratch file (unlinked on
/// creation, reclaimed by the OS when the last handle drops).
pub(crate) struct ScratchLevel {
    file: Arc<File>,
    len: u64,
}

#[async_trait]
impl FlatSource for ScratchLevel {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        if offset + len as u64 > self.len {
            return Err(VolumeError::OutOfBounds(format!(
                "read of {} bytes at {} beyond scratch level of {} bytes",
                len, offset, self.len
            )));
        }
        read_at_async(Arc::clone(&self.file), offset, len).await
    }
}

/// Build level L+1 from level L.
///
/// Returns the scratch level and its per-axis size,
/// `ceil(source_size / decimation)` clamped to at least 1.
pub(crate) async fn build_level(
    source: &Arc<dyn FlatSource>,
    source_size: &[u64],
    decimation: &[u32],
    element: ElementType,
    filter: &dyn DownsampleFilter,
    scratch_dir: Option<&Path>,
) -> Result<(ScratchLevel, Vec<u64>)> {
    let rank = source_size.len();
    let target_size: Vec<u64> = source_size
        .iter()
        .zip(decimation.iter())
        .map(|(&s, &d)| ceil_div(s, d as u64).max(1))
        .collect();

    let scratch = match scratch_dir {
        Some(dir) => tempfile::tempfile_in(dir)?,
        None => tempfile::tempfile()?,
    };
    let scratch = Arc::new(scratch);

    let elem_bytes = element.size_in_bytes();
    let comps = element.components();
    let src_last = source_size[rank - 1];
    let out_last = target_size[rank - 1];
    let dec_last = decimation[rank - 1] as u64;
    let src_row_bytes = (src_last * elem_bytes as u64) as usize;

    let outer_out: Vec<u64> = target_size[..rank - 1].to_vec();
    let mut outer_coords: Vec<Vec<u64>> = Vec::new();
    for_each_coord(&outer_out, |c| outer_coords.push(c.to_vec()));

    let mut pending: Vec<u8> = Vec::with_capacity(WRITE_CHUNK);
    let mut written = 0u64;

    for out_coord in &outer_coords {
        // Input rows whose windows feed this output row: the cartesian
        // product of the per-axis decimation windows, clamped at edges.
        let windows: Vec<(u64, u64)> = out_coord
            .iter()
            .enumerate()
            .map(|(axis, &c)| {
                let d = decimation[axis] as u64;
                let start = c * d;
                (start, ((c + 1) * d).min(source_size[axis]))
            })
            .collect();
        let window_shape: Vec<u64> = windows.iter().map(|(lo, hi)| hi - lo).collect();

        let mut row_offsets: Vec<u64> = Vec::new();
        for_each_coord(&window_shape, |local| {
            let in_outer: Vec<u64> = local
                .iter()
                .zip(windows.iter())
                .map(|(l, (lo, _))| l + lo)
                .collect();
            let mut in_coord = in_outer;
            in_coord.push(0);
            row_offsets.push(flat_offset(&in_coord, source_size) * elem_bytes as u64);
        });

        let mut in_rows: Vec<Bytes> = Vec::with_capacity(row_offsets.len());
        for offset in row_offsets {
            in_rows.push(source.read_at(offset, src_row_bytes).await?);
        }

        let out_row = dispatch_element_kind!(element.kind, T => {
            downsample_row::<T>(&in_rows, src_last, out_last, dec_last, comps, filter)
        });
        pending.extend_from_slice(&out_row);

        if pending.len() >= WRITE_CHUNK {
            written += flush(&scratch, std::mem::take(&mut pending)).await?;
        }
    }
    if !pending.is_empty() {
        written += flush(&scratch, pending).await?;
    }

    let expected: u64 = target_size.iter().product::<u64>() * elem_bytes as u64;
    debug_assert_eq!(written, expected);

    Ok((
        ScratchLevel {
            file: scratch,
            len: written,
        },
        target_size,
    ))
}

async fn flush(file: &Arc<File>, chunk: Vec<u8>) -> Result<u64> {
    let file = Arc::clone(file);
    let len = chunk.len() as u64;
    tokio::task::spawn_blocking(move || (&*file).write_all(&chunk))
        .await
        .map_err(|e| VolumeError::Io(std::io::Error::other(e)))??;
    Ok(len)
}

/// Combine the gathered input rows into one output row.
fn downsample_row<T: Sample>(
    in_rows: &[Bytes],
    src_last: u64,
    out_last: u64,
    dec_last: u64,
    comps: usize,
    filter: &dyn DownsampleFilter,
) -> Vec<u8> {
    let mut out = vec![0u8; (out_last as usize) * comps * T::BYTES];
    let mut samples: Vec<f64> = Vec::with_capacity(in_rows.len() * dec_last as usize);

    for t in 0..out_last {
        let lo = t * dec_last;
        let hi = ((t + 1) * dec_last).min(src_last);
        for comp in 0..comps {
            samples.clear();
            for row in in_rows {
                for u in lo..hi {
                    let at = (u as usize * comps + comp) * T::BYTES;
                    samples.push(T::read_le(&row[at..at + T::BYTES]).as_f64());
                }
            }
            let combined = filter.combine(&samples);
            let at = (t as usize * comps + comp) * T::BYTES;
            T::from_f64_truncated(combined).write_le(&mut out[at..at + T::BYTES]);
        }
    }
    out
}
