//! The catalog (table of contents): brick identity → physical location
//! and properties.
//!
//! Entries are held in dense per-LOD tables indexed by the flat logical
//! brick index, so lookup is O(1) no matter which physical order the
//! sequencer wrote the bricks in. The serialized TOC block stores the
//! entries in logical order for the same reason. A catalog only reaches
//! disk after every expected entry is present; a missing slot at finalize
//! time is the fatal `IncompleteCatalog`.

use crate::compression::{CompressionLevel, CompressionMethod};
use crate::error::{Result, VolumeError};
use crate::io::{ByteReader, ByteWriter};
use crate::layout::{BrickSize, VolumeLayout};
use crate::sequence::BrickOrdering;
use crate::types::{Domain, ElementKind, ElementType, ValueRange};

/// Catalog entry for one brick
#[derive(Debug, Clone, PartialEq)]
pub struct BrickEntry {
    /// Byte offset into the data region
    pub offset: u64,
    /// Compressed payload length in bytes
    pub compressed_len: u64,
    /// Uncompressed length in bytes
    pub raw_len: u64,
    /// Codec this brick was compressed with
    pub codec: CompressionMethod,
    /// Min/max over every stored voxel (apron included)
    pub range: ValueRange,
}

/// In-memory catalog: one dense table per LOD level
#[derive(Debug, Clone)]
pub struct Catalog {
    levels: Vec<Vec<Option<BrickEntry>>>,
}

impl Catalog {
    /// Empty catalog sized for the given per-LOD brick counts
    pub(crate) fn with_counts(brick_counts: &[u64]) -> Self {
        Self {
            levels: brick_counts
                .iter()
                .map(|&c| vec![None; c as usize])
                .collect(),
        }
    }

    pub fn lod_count(&self) -> usize {
        self.levels.len()
    }

    /// Bricks expected at one level
    pub fn level_len(&self, lod: usize) -> u64 {
        self.levels.get(lod).map_or(0, |l| l.len() as u64)
    }

    /// Record a brick written by the conversion session
    pub(crate) fn record(&mut self, lod: usize, index: u64, entry: BrickEntry) -> Result<()> {
        let slot = self
            .levels
            .get_mut(lod)
            .and_then(|level| level.get_mut(index as usize))
            .ok_or_else(|| {
                VolumeError::OutOfBounds(format!("brick {} at lod {} outside catalog", index, lod))
            })?;
        if slot.is_some() {
            return Err(VolumeError::InvalidFormat(format!(
                "brick {} at lod {} recorded twice",
                index, lod
            )));
        }
        *slot = Some(entry);
        Ok(())
    }

    /// Look up one brick's metadata
    pub fn lookup(&self, lod: usize, index: u64) -> Option<&BrickEntry> {
        self.levels.get(lod)?.get(index as usize)?.as_ref()
    }

    /// Verify that every expected brick has exactly one entry
    pub(crate) fn ensure_complete(&self) -> Result<()> {
        for (lod, level) in self.levels.iter().enumerate() {
            for (index, slot) in level.iter().enumerate() {
                if slot.is_none() {
                    return Err(VolumeError::IncompleteCatalog {
                        lod,
                        index: index as u64,
                    });
                }
            }
        }
        Ok(())
    }

    fn write_to(&self, w: &mut ByteWriter) {
        for level in &self.levels {
            for entry in level.iter().flatten() {
                w.put_u64(entry.offset);
                w.put_u64(entry.compressed_len);
                w.put_u64(entry.raw_len);
                w.put_u8(entry.codec as u8);
                w.put_f64(entry.range.min);
                w.put_f64(entry.range.max);
            }
        }
    }

    fn read_from(r: &mut ByteReader<'_>, brick_counts: &[u64]) -> Result<Self> {
        let mut levels = Vec::with_capacity(brick_counts.len());
        for &count in brick_counts {
            let mut level = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let offset = r.u64()?;
                let compressed_len = r.u64()?;
                let raw_len = r.u64()?;
                let codec = CompressionMethod::from_u8(r.u8()?).ok_or_else(|| {
                    VolumeError::InvalidFormat("unknown codec id in catalog".to_string())
                })?;
                let range = ValueRange::new(r.f64()?, r.f64()?);
                level.push(Some(BrickEntry {
                    offset,
                    compressed_len,
                    raw_len,
                    codec,
                    range,
                }));
            }
            levels.push(level);
        }
        Ok(Self { levels })
    }
}

/// The serialized table-of-contents block: the volume's self-description
/// (domain, element type, bricking, ordering, codec) plus the catalog.
#[derive(Debug, Clone)]
pub struct TocBlock {
    pub layout: VolumeLayout,
    pub ordering: BrickOrdering,
    pub codec: CompressionMethod,
    pub level: CompressionLevel,
    pub catalog: Catalog,
}

impl TocBlock {
    pub(crate) fn encode(&self, big_endian: bool) -> Vec<u8> {
        let domain = self.layout.domain();
        let mut w = ByteWriter::new(big_endian);

        w.put_u8(domain.rank() as u8);
        for &s in domain.axis_sizes() {
            w.put_u64(s);
        }
        for &d in domain.decimation() {
            w.put_u32(d);
        }
        w.put_u8(domain.element().kind as u8);
        w.put_u8(domain.element().vector_len);
        for &b in self.layout.brick_size().dims() {
            w.put_u64(b);
        }
        w.put_u64(self.layout.overlap());
        w.put_u32(self.layout.lod_count() as u32);
        w.put_u8(self.ordering.id());
        w.put_u64(self.ordering.seed());
        w.put_u8(self.codec as u8);
        w.put_u8(self.level.value());

        // Per-LOD grids, recorded for self-description and cross-checked
        // against the derived values on read.
        for lod in 0..self.layout.lod_count() {
            for &g in &self.layout.brick_grid(lod) {
                w.put_u64(g);
            }
        }
        self.catalog.write_to(&mut w);
        w.into_inner()
    }

    pub(crate) fn decode(payload: &[u8], big_endian: bool) -> Result<Self> {
        let mut r = ByteReader::new(payload, big_endian);

        let rank = r.u8()? as usize;
        if rank == 0 {
            return Err(VolumeError::InvalidFormat("zero-rank domain".to_string()));
        }
        let mut axis_sizes = Vec::with_capacity(rank);
        for _ in 0..rank {
            axis_sizes.push(r.u64()?);
        }
        let mut decimation = Vec::with_capacity(rank);
        for _ in 0..rank {
            decimation.push(r.u32()?);
        }
        let kind = ElementKind::from_u8(r.u8()?).ok_or_else(|| {
            VolumeError::InvalidFormat("unknown element kind in TOC".to_string())
        })?;
        let vector_len = r.u8()?;
        let element = ElementType::vector(kind, vector_len)?;

        let mut brick_dims = Vec::with_capacity(rank);
        for _ in 0..rank {
            brick_dims.push(r.u64()?);
        }
        let overlap = r.u64()?;
        let lod_count = r.u32()? as usize;
        let ordering_id = r.u8()?;
        let seed = r.u64()?;
        let ordering = BrickOrdering::from_id(ordering_id, seed).ok_or_else(|| {
            VolumeError::InvalidFormat(format!("unknown brick ordering {}", ordering_id))
        })?;
        let codec = CompressionMethod::from_u8(r.u8()?).ok_or_else(|| {
            VolumeError::InvalidFormat("unknown codec id in TOC".to_string())
        })?;
        let level = CompressionLevel::new(r.u8()?);

        let domain = Domain::new(axis_sizes, element)?.with_decimation(decimation)?;
        let layout = VolumeLayout::new(domain, BrickSize::new(brick_dims)?, overlap)?;
        if layout.lod_count() != lod_count {
            return Err(VolumeError::InvalidFormat(format!(
                "TOC records {} LOD levels but the layout derives {}",
                lod_count,
                layout.lod_count()
            )));
        }

        let mut brick_counts = Vec::with_capacity(lod_count);
        for lod in 0..lod_count {
            let derived = layout.brick_grid(lod);
            let mut stored = Vec::with_capacity(derived.len());
            for _ in 0..derived.len() {
                stored.push(r.u64()?);
            }
            if stored != derived {
                return Err(VolumeError::InvalidFormat(format!(
                    "TOC brick grid {:?} does not match derived {:?} at lod {}",
                    stored, derived, lod
                )));
            }
            brick_counts.push(derived.iter().product());
        }

        let catalog = Catalog::read_from(&mut r, &brick_counts)?;
        Ok(Self {
            layout,
            ordering,
            codec,
            level,
            catalog,
        })
    }
}
