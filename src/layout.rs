//! Brick layout - how each LOD level's domain is divided into bricks.
//!
//! Grids come from integer ceiling division per axis; the last brick on
//! each axis is clipped to the remaining domain, never padded. Overlap
//! voxels are borrowed from neighbouring bricks' interiors where those
//! neighbours exist and are omitted at domain boundaries (no replication,
//! no wrap-around), so every stored voxel is a real domain voxel and edge
//! bricks simply carry a smaller apron.

use crate::error::{Result, VolumeError};
use crate::types::Domain;
use crate::utils::{ceil_div, strides};
use serde::{Deserialize, Serialize};

/// Maximum brick size per axis (core region, excluding overlap)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickSize {
    dims: Vec<u64>,
}

impl BrickSize {
    /// Per-axis brick size
    pub fn new(dims: Vec<u64>) -> Result<Self> {
        if dims.is_empty() || dims.iter().any(|&d| d == 0) {
            return Err(VolumeError::InvalidDimensions(
                "brick size must be at least 1 per axis".to_string(),
            ));
        }
        Ok(Self { dims })
    }

    /// Same size on every axis (the common case, default edge 64)
    pub fn uniform(rank: usize, size: u64) -> Result<Self> {
        Self::new(vec![size; rank])
    }

    pub fn get(&self, axis: usize) -> u64 {
        self.dims[axis]
    }

    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    /// Total voxels in a full-size brick core
    pub fn core_voxels(&self) -> u64 {
        self.dims.iter().product()
    }
}

/// One brick's extent within a LOD level, in level voxel coordinates.
///
/// `min..max` is the stored region including the apron; `core_min..core_max`
/// is the non-overlap region that tiles the level exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrickExtent {
    pub min: Vec<u64>,
    pub max: Vec<u64>,
    pub core_min: Vec<u64>,
    pub core_max: Vec<u64>,
}

impl BrickExtent {
    /// Stored size per axis (core + apron)
    pub fn size(&self) -> Vec<u64> {
        self.min
            .iter()
            .zip(self.max.iter())
            .map(|(lo, hi)| hi - lo)
            .collect()
    }

    /// Total stored voxels
    pub fn voxels(&self) -> u64 {
        self.size().iter().product()
    }
}

/// Full bricking description of a volume: domain, brick size, overlap,
/// and the derived LOD pyramid depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeLayout {
    domain: Domain,
    brick_size: BrickSize,
    overlap: u64,
    lod_count: usize,
}

impl VolumeLayout {
    pub fn new(domain: Domain, brick_size: BrickSize, overlap: u64) -> Result<Self> {
        if brick_size.dims().len() != domain.rank() {
            return Err(VolumeError::InvalidDimensions(
                "brick size rank must match domain rank".to_string(),
            ));
        }
        if brick_size.dims().iter().any(|&b| overlap >= b) {
            return Err(VolumeError::Configuration(format!(
                "overlap {} must be smaller than the brick size",
                overlap
            )));
        }
        let lod_count = Self::compute_lod_count(&domain, &brick_size);
        Ok(Self {
            domain,
            brick_size,
            overlap,
            lod_count,
        })
    }

    /// Levels are added until every axis fits into a single brick, so the
    /// coarsest level is always one brick. A domain no larger than one
    /// brick yields a single level.
    fn compute_lod_count(domain: &Domain, brick_size: &BrickSize) -> usize {
        let mut count = 1;
        loop {
            let size = domain.level_size(count - 1);
            let bricks: u64 = size
                .iter()
                .enumerate()
                .map(|(i, &s)| ceil_div(s, brick_size.get(i)))
                .product();
            if bricks <= 1 {
                return count;
            }
            let next = domain.level_size(count);
            if next == size {
                // Decimation factors of 1 cannot shrink this any further
                return count;
            }
            count += 1;
        }
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn brick_size(&self) -> &BrickSize {
        &self.brick_size
    }

    pub fn overlap(&self) -> u64 {
        self.overlap
    }

    pub fn lod_count(&self) -> usize {
        self.lod_count
    }

    /// Per-axis voxel size of a LOD level
    pub fn level_size(&self, lod: usize) -> Vec<u64> {
        self.domain.level_size(lod)
    }

    /// Per-axis brick counts of a LOD level
    pub fn brick_grid(&self, lod: usize) -> Vec<u64> {
        self.level_size(lod)
            .iter()
            .enumerate()
            .map(|(i, &s)| ceil_div(s, self.brick_size.get(i)))
            .collect()
    }

    /// Total bricks in one LOD level
    pub fn brick_count(&self, lod: usize) -> u64 {
        self.brick_grid(lod).iter().product()
    }

    /// Total bricks across every level
    pub fn total_bricks(&self) -> u64 {
        (0..self.lod_count).map(|lod| self.brick_count(lod)).sum()
    }

    /// Convert a flat brick index to grid coordinates (row-major)
    pub fn index_to_coords(&self, lod: usize, index: u64) -> Vec<u64> {
        let grid = self.brick_grid(lod);
        let strides = strides(&grid);
        let mut coords = vec![0u64; grid.len()];
        let mut remaining = index;
        for (c, s) in coords.iter_mut().zip(strides.iter()) {
            *c = remaining / s;
            remaining %= s;
        }
        coords
    }

    /// Convert grid coordinates to a flat brick index (row-major)
    pub fn coords_to_index(&self, lod: usize, coords: &[u64]) -> u64 {
        let grid = self.brick_grid(lod);
        coords
            .iter()
            .zip(strides(&grid).iter())
            .map(|(c, s)| c * s)
            .sum()
    }

    /// Extent of one brick, apron included. The apron extends `overlap`
    /// voxels past the core on every side that has a neighbouring brick
    /// and is clipped at the domain boundary.
    pub fn brick_extent(&self, lod: usize, index: u64) -> Result<BrickExtent> {
        if index >= self.brick_count(lod) || lod >= self.lod_count {
            return Err(VolumeError::OutOfBounds(format!(
                "brick {} at lod {} outside grid",
                index, lod
            )));
        }
        let size = self.level_size(lod);
        let coords = self.index_to_coords(lod, index);

        let mut extent = BrickExtent {
            min: Vec::with_capacity(size.len()),
            max: Vec::with_capacity(size.len()),
            core_min: Vec::with_capacity(size.len()),
            core_max: Vec::with_capacity(size.len()),
        };
        for (axis, &c) in coords.iter().enumerate() {
            let brick = self.brick_size.get(axis);
            let core_min = c * brick;
            let core_max = (core_min + brick).min(size[axis]);
            extent.min.push(core_min.saturating_sub(self.overlap));
            extent.max.push((core_max + self.overlap).min(size[axis]));
            extent.core_min.push(core_min);
            extent.core_max.push(core_max);
        }
        Ok(extent)
    }
}
