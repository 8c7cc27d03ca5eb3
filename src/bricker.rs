//! Brick extraction: gather one brick's voxels (apron included) from a
//! flat level store into a dense buffer, computing per-brick statistics
//! on the way through.
//!
//! Min/max covers every stored voxel including the apron (the range is
//! used for culling, so it must bound everything a consumer can sample);
//! the histogram covers only the core region, so level totals equal the
//! level's voxel count with no double-counting of overlap.

use crate::error::Result;
use crate::io::FlatSource;
use crate::layout::BrickExtent;
use crate::types::{dispatch_element_kind, ElementType, Sample, ValueRange};
use crate::utils::{flat_offset, for_each_coord};
use std::sync::Arc;

/// Histogram configuration for a conversion: bin count plus the right
/// shift mapping a raw unsigned sample to its bin.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HistogramSpec {
    pub bins: usize,
    pub shift: u32,
}

impl HistogramSpec {
    /// Histograms are produced for unsigned scalar integers only: u8 maps
    /// one bin per value, u16 is folded to 4096 bins.
    /// Float and signed volumes carry no histogram block.
    pub fn for_element(element: ElementType) -> Option<Self> {
        use crate::types::ElementKind;
        if element.components() != 1 {
            return None;
        }
        match element.kind {
            ElementKind::U8 => Some(Self {
                bins: 256,
                shift: 0,
            }),
            ElementKind::U16 => Some(Self {
                bins: 4096,
                shift: 4,
            }),
            _ => None,
        }
    }
}

/// One extracted brick: its dense bytes plus the statistics gathered
/// while reading.
pub(crate) struct ExtractedBrick {
    pub bytes: Vec<u8>,
    pub range: ValueRange,
    pub histogram: Option<Vec<u64>>,
}

/// Read the brick at `extent` from a level store laid out row-major with
/// the given per-axis size. Rows are fetched with positioned reads; the
/// store is never required to be memory resident.
pub(crate) async fn extract_brick(
    level: &Arc<dyn FlatSource>,
    level_size: &[u64],
    element: ElementType,
    extent: &BrickExtent,
    histogram: Option<HistogramSpec>,
) -> Result<ExtractedBrick> {
    let rank = level_size.len();
    let elem_bytes = element.size_in_bytes();
    let brick_size = extent.size();

    let row_len = brick_size[rank - 1];
    let row_bytes = (row_len * elem_bytes as u64) as usize;
    let outer_shape: Vec<u64> = brick_size[..rank - 1].to_vec();

    // Core span along the row axis, relative to the row start
    let core_lo = (extent.core_min[rank - 1] - extent.min[rank - 1]) as usize;
    let core_hi = (extent.core_max[rank - 1] - extent.min[rank - 1]) as usize;

    let mut bytes = Vec::with_capacity((extent.voxels() * elem_bytes as u64) as usize);
    let mut range = ValueRange::empty();
    let mut bins = histogram.map(|spec| vec![0u64; spec.bins]);

    let mut rows: Vec<(u64, bool)> = Vec::new();
    for_each_coord(&outer_shape, |local| {
        let mut coord: Vec<u64> = local
            .iter()
            .enumerate()
            .map(|(axis, l)| l + extent.min[axis])
            .collect();
        // A row contributes to the histogram only if its outer coordinates
        // sit inside the core region.
        let in_core = coord
            .iter()
            .enumerate()
            .all(|(axis, &c)| c >= extent.core_min[axis] && c < extent.core_max[axis]);
        coord.push(extent.min[rank - 1]);
        rows.push((flat_offset(&coord, level_size) * elem_bytes as u64, in_core));
    });

    for (offset, in_core) in rows {
        let row = level.read_at(offset, row_bytes).await?;

        dispatch_element_kind!(element.kind, T => {
            scan_row::<T>(
                &row,
                &mut range,
                if in_core { bins.as_deref_mut() } else { None },
                histogram,
                core_lo,
                core_hi,
            )
        });

        bytes.extend_from_slice(&row);
    }

    Ok(ExtractedBrick {
        bytes,
        range,
        histogram: bins,
    })
}

fn scan_row<T: Sample>(
    row: &[u8],
    range: &mut ValueRange,
    bins: Option<&mut [u64]>,
    spec: Option<HistogramSpec>,
    core_lo: usize,
    core_hi: usize,
) {
    for chunk in row.chunks_exact(T::BYTES) {
        range.observe(T::read_le(chunk).as_f64());
    }
    if let (Some(bins), Some(spec)) = (bins, spec) {
        // Histogram only applies to scalar unsigned kinds, so each voxel
        // is exactly one sample.
        for chunk in row[core_lo * T::BYTES..core_hi * T::BYTES].chunks_exact(T::BYTES) {
            let value = T::read_le(chunk).as_f64() as u64;
            bins[(value >> spec.shift) as usize] += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;
    use crate::layout::{BrickSize, VolumeLayout};
    use crate::types::{Domain, ElementKind, ElementType};

    fn layout_1d(size: u64, brick: u64, overlap: u64) -> VolumeLayout {
        let domain = Domain::new(vec![size], ElementType::scalar(ElementKind::U8)).unwrap();
        VolumeLayout::new(domain, BrickSize::uniform(1, brick).unwrap(), overlap).unwrap()
    }

    #[tokio::test]
    async fn test_extract_with_apron() {
        let data: Vec<u8> = (0..16).collect();
        let source: Arc<dyn FlatSource> = Arc::new(MemorySource::new(data));
        let layout = layout_1d(16, 8, 2);

        // Second brick: core [8,16), apron reaches back to 6
        let extent = layout.brick_extent(0, 1).unwrap();
        let brick = extract_brick(
            &source,
            &[16],
            ElementType::scalar(ElementKind::U8),
            &extent,
            None,
        )
        .await
        .unwrap();
        assert_eq!(brick.bytes, (6..16).collect::<Vec<u8>>());
        assert_eq!(brick.range.min, 6.0);
        assert_eq!(brick.range.max, 15.0);
    }

    #[tokio::test]
    async fn test_apron_omitted_at_domain_edge() {
        let data: Vec<u8> = (0..16).collect();
        let source: Arc<dyn FlatSource> = Arc::new(MemorySource::new(data));
        let layout = layout_1d(16, 8, 2);

        // First brick: no voxels exist before 0, so the apron is one-sided
        let extent = layout.brick_extent(0, 0).unwrap();
        let brick = extract_brick(
            &source,
            &[16],
            ElementType::scalar(ElementKind::U8),
            &extent,
            None,
        )
        .await
        .unwrap();
        assert_eq!(brick.bytes, (0..10).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_2d_extraction_row_gather() {
        // 4x4 plane, brick 2x2 with overlap 1: brick (1,1) core is the
        // bottom-right quadrant, apron pulls one row/column from its
        // neighbours.
        let data: Vec<u8> = (0..16).collect();
        let source: Arc<dyn FlatSource> = Arc::new(MemorySource::new(data));
        let domain = Domain::new(vec![4, 4], ElementType::scalar(ElementKind::U8)).unwrap();
        let layout = VolumeLayout::new(domain, BrickSize::uniform(2, 2).unwrap(), 1).unwrap();

        let index = layout.coords_to_index(0, &[1, 1]);
        let extent = layout.brick_extent(0, index).unwrap();
        let brick = extract_brick(
            &source,
            &[4, 4],
            ElementType::scalar(ElementKind::U8),
            &extent,
            None,
        )
        .await
        .unwrap();
        // rows 1..4, columns 1..4
        assert_eq!(brick.bytes, vec![5, 6, 7, 9, 10, 11, 13, 14, 15]);
    }

    #[tokio::test]
    async fn test_histogram_counts_core_only() {
        let data: Vec<u8> = vec![3; 16];
        let source: Arc<dyn FlatSource> = Arc::new(MemorySource::new(data));
        let layout = layout_1d(16, 8, 2);
        let spec = HistogramSpec::for_element(ElementType::scalar(ElementKind::U8)).unwrap();

        let mut total = 0u64;
        for index in 0..2 {
            let extent = layout.brick_extent(0, index).unwrap();
            let brick = extract_brick(
                &source,
                &[16],
                ElementType::scalar(ElementKind::U8),
                &extent,
                Some(spec),
            )
            .await
            .unwrap();
            total += brick.histogram.unwrap()[3];
        }
        // Apron voxels are stored twice but counted once
        assert_eq!(total, 16);
    }

    #[test]
    fn test_histogram_spec_selection() {
        assert!(HistogramSpec::for_element(ElementType::scalar(ElementKind::U8)).is_some());
        let u16_spec =
            HistogramSpec::for_element(ElementType::scalar(ElementKind::U16)).unwrap();
        assert_eq!(u16_spec.bins, 4096);
        assert!(HistogramSpec::for_element(ElementType::scalar(ElementKind::F32)).is_none());
        assert!(HistogramSpec::for_element(
            ElementType::vector(ElementKind::U8, 3).unwrap()
        )
        .is_none());
    }
}
