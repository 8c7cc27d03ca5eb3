//! Physical brick write order.
//!
//! An ordering is a total order over one level's brick indices; it only
//! decides the order in which bricks are compressed and appended to the
//! data region, never their content. The catalog stays addressable by
//! logical (lod, index) whatever the physical order, so all four policies
//! produce files with identical read semantics.

use crate::utils::{for_each_coord, strides};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Brick write-order policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrickOrdering {
    /// Row-major flat order (default)
    Scanline,
    /// Bit-interleaved Z-order
    Morton,
    /// Hilbert-curve order, locality-preserving for streaming access
    Hilbert,
    /// Seeded pseudo-random permutation; the seed is persisted so the
    /// same input and seed reproduce the file byte-for-byte
    Random { seed: u64 },
}

impl Default for BrickOrdering {
    fn default() -> Self {
        BrickOrdering::Scanline
    }
}

impl BrickOrdering {
    /// Persisted policy id
    pub fn id(&self) -> u8 {
        match self {
            BrickOrdering::Scanline => 0,
            BrickOrdering::Morton => 1,
            BrickOrdering::Hilbert => 2,
            BrickOrdering::Random { .. } => 3,
        }
    }

    /// Reconstruct from a persisted id and seed
    pub fn from_id(id: u8, seed: u64) -> Option<Self> {
        match id {
            0 => Some(BrickOrdering::Scanline),
            1 => Some(BrickOrdering::Morton),
            2 => Some(BrickOrdering::Hilbert),
            3 => Some(BrickOrdering::Random { seed }),
            _ => None,
        }
    }

    /// Seed to persist beside the id (0 for deterministic curves)
    pub fn seed(&self) -> u64 {
        match self {
            BrickOrdering::Random { seed } => *seed,
            _ => 0,
        }
    }
}

/// Produce the physical write order for a brick grid: a permutation of
/// `0..grid.product()` in flat row-major indices.
pub fn order_bricks(grid: &[u64], ordering: BrickOrdering) -> Vec<u64> {
    let count: u64 = grid.iter().product();
    match ordering {
        BrickOrdering::Scanline => (0..count).collect(),
        BrickOrdering::Morton => curve_order(grid, morton_key),
        BrickOrdering::Hilbert => curve_order(grid, hilbert_key),
        BrickOrdering::Random { seed } => {
            let mut indices: Vec<u64> = (0..count).collect();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            indices.shuffle(&mut rng);
            indices
        }
    }
}

/// Sort flat indices by a space-filling-curve key of their coordinates.
/// Non-power-of-two grids ride the curve of the bounding power-of-two
/// cube, filtered to in-grid cells.
fn curve_order(grid: &[u64], key: fn(&[u64], u32) -> u128) -> Vec<u64> {
    let bits = grid
        .iter()
        .map(|&g| 64 - g.saturating_sub(1).leading_zeros())
        .max()
        .unwrap_or(1)
        .max(1);
    let strides = strides(grid);

    let mut keyed: Vec<(u128, u64)> = Vec::with_capacity(grid.iter().product::<u64>() as usize);
    for_each_coord(grid, |coords| {
        let flat: u64 = coords.iter().zip(strides.iter()).map(|(c, s)| c * s).sum();
        keyed.push((key(coords, bits), flat));
    });
    keyed.sort();
    keyed.into_iter().map(|(_, flat)| flat).collect()
}

/// Morton (Z-order) key: interleave the coordinate bits, axis 0 most
/// significant within each bit group.
fn morton_key(coords: &[u64], bits: u32) -> u128 {
    let mut key: u128 = 0;
    for bit in (0..bits).rev() {
        for &c in coords {
            key = (key << 1) | (((c >> bit) & 1) as u128);
        }
    }
    key
}

/// Hilbert key via Skilling's transpose algorithm: convert axis
/// coordinates to the transposed Hilbert index, then interleave.
fn hilbert_key(coords: &[u64], bits: u32) -> u128 {
    let n = coords.len();
    let mut x = coords.to_vec();

    // Inverse undo excess work
    let m = 1u64 << (bits - 1);
    let mut q = m;
    while q > 1 {
        let p = q - 1;
        for i in 0..n {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q >>= 1;
    }

    // Gray encode
    for i in 1..n {
        x[i] ^= x[i - 1];
    }
    let mut t = 0u64;
    q = m;
    while q > 1 {
        if x[n - 1] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for xi in x.iter_mut() {
        *xi ^= t;
    }

    // Interleave the transposed form into a single key
    let mut key: u128 = 0;
    for bit in (0..bits).rev() {
        for &xi in &x {
            key = (key << 1) | (((xi >> bit) & 1) as u128);
        }
    }
    key
}
