//! Core data types: element descriptors, domains, value ranges

use crate::error::{Result, VolumeError};
use crate::utils::ceil_div;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar kinds a container can store.
///
/// This is the closed set of supported numeric kinds; anything else
/// (1-bit masks, 24-bit packed data, 64-bit integers) is rejected with
/// [`VolumeError::UnsupportedType`] before any data is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ElementKind {
    /// Unsigned 8-bit integer
    U8 = 0,
    /// Signed 8-bit integer
    I8 = 1,
    /// Unsigned 16-bit integer
    U16 = 2,
    /// Signed 16-bit integer
    I16 = 3,
    /// 32-bit floating point
    F32 = 4,
    /// 64-bit floating point
    F64 = 5,
}

impl ElementKind {
    /// Size in bytes of one scalar of this kind
    pub fn size_in_bytes(&self) -> usize {
        match self {
            ElementKind::U8 | ElementKind::I8 => 1,
            ElementKind::U16 | ElementKind::I16 => 2,
            ElementKind::F32 => 4,
            ElementKind::F64 => 8,
        }
    }

    /// Check if this is a floating point kind
    pub fn is_float(&self) -> bool {
        matches!(self, ElementKind::F32 | ElementKind::F64)
    }

    /// Check if this is a signed kind
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            ElementKind::I8 | ElementKind::I16 | ElementKind::F32 | ElementKind::F64
        )
    }

    /// Get the kind from its persisted byte value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ElementKind::U8),
            1 => Some(ElementKind::I8),
            2 => Some(ElementKind::U16),
            3 => Some(ElementKind::I16),
            4 => Some(ElementKind::F32),
            5 => Some(ElementKind::F64),
            _ => None,
        }
    }

    /// Resolve a kind from an external descriptor (bit width, signedness,
    /// float flag), as found in foreign volume headers.
    pub fn from_descriptor(bit_width: u32, signed: bool, float: bool) -> Result<Self> {
        match (bit_width, signed, float) {
            (8, false, false) => Ok(ElementKind::U8),
            (8, true, false) => Ok(ElementKind::I8),
            (16, false, false) => Ok(ElementKind::U16),
            (16, true, false) => Ok(ElementKind::I16),
            (32, true, true) => Ok(ElementKind::F32),
            (64, true, true) => Ok(ElementKind::F64),
            _ => Err(VolumeError::UnsupportedType(format!(
                "{} bit, signed={}, float={}",
                bit_width, signed, float
            ))),
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Element type: a scalar kind plus a fixed per-voxel vector length
/// (1 = scalar data, 3 = e.g. RGB or displacement vectors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementType {
    pub kind: ElementKind,
    pub vector_len: u8,
}

impl ElementType {
    /// Scalar element of the given kind
    pub fn scalar(kind: ElementKind) -> Self {
        Self {
            kind,
            vector_len: 1,
        }
    }

    /// Fixed-length vector element
    pub fn vector(kind: ElementKind, vector_len: u8) -> Result<Self> {
        if vector_len == 0 {
            return Err(VolumeError::UnsupportedType(
                "vector length must be at least 1".to_string(),
            ));
        }
        Ok(Self { kind, vector_len })
    }

    /// Size in bytes of one voxel (all components)
    pub fn size_in_bytes(&self) -> usize {
        self.kind.size_in_bytes() * self.vector_len as usize
    }

    /// Number of scalar components per voxel
    pub fn components(&self) -> usize {
        self.vector_len as usize
    }
}

/// Domain of a flat volume: per-axis sizes, per-axis decimation factors,
/// and the element type. Immutable once a conversion starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    axis_sizes: Vec<u64>,
    decimation: Vec<u32>,
    element: ElementType,
}

impl Domain {
    /// Create a domain with the default decimation factor of 2 per axis.
    pub fn new(axis_sizes: Vec<u64>, element: ElementType) -> Result<Self> {
        if axis_sizes.is_empty() {
            return Err(VolumeError::InvalidDimensions(
                "domain needs at least one axis".to_string(),
            ));
        }
        if axis_sizes.iter().any(|&s| s == 0) {
            return Err(VolumeError::InvalidDimensions(
                "axis sizes must be at least 1".to_string(),
            ));
        }
        let rank = axis_sizes.len();
        Ok(Self {
            axis_sizes,
            decimation: vec![2; rank],
            element,
        })
    }

    /// Set per-axis decimation factors. A factor of 1 disables decimation
    /// on that axis (useful for thin, anisotropic volumes).
    pub fn with_decimation(mut self, decimation: Vec<u32>) -> Result<Self> {
        if decimation.len() != self.axis_sizes.len() {
            return Err(VolumeError::InvalidDimensions(
                "decimation factors must match domain rank".to_string(),
            ));
        }
        if decimation.iter().any(|&d| d == 0) {
            return Err(VolumeError::InvalidDimensions(
                "decimation factors must be at least 1".to_string(),
            ));
        }
        self.decimation = decimation;
        Ok(self)
    }

    /// Number of axes
    pub fn rank(&self) -> usize {
        self.axis_sizes.len()
    }

    /// Per-axis sizes of the full-resolution level
    pub fn axis_sizes(&self) -> &[u64] {
        &self.axis_sizes
    }

    /// Per-axis decimation factors
    pub fn decimation(&self) -> &[u32] {
        &self.decimation
    }

    /// Element type of every voxel
    pub fn element(&self) -> ElementType {
        self.element
    }

    /// Per-axis sizes at LOD level `lod` (level 0 is full resolution).
    /// Each axis shrinks by its decimation factor per level, never below 1.
    pub fn level_size(&self, lod: usize) -> Vec<u64> {
        let mut size = self.axis_sizes.clone();
        for _ in 0..lod {
            for (s, &d) in size.iter_mut().zip(self.decimation.iter()) {
                *s = ceil_div(*s, d as u64).max(1);
            }
        }
        size
    }

    /// Total voxel count at a given level
    pub fn level_voxels(&self, lod: usize) -> u64 {
        self.level_size(lod).iter().product()
    }

    /// Total byte size of the flat full-resolution data
    pub fn flat_size_bytes(&self) -> u64 {
        self.level_voxels(0) * self.element.size_in_bytes() as u64
    }
}

/// Value range (min/max) of a brick, a level, or a whole volume
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// An empty range that any observed sample will replace
    pub fn empty() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }

    /// Fold one sample into the range. NaN samples are ignored.
    pub fn observe(&mut self, value: f64) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    /// Merge another range into this one
    pub fn merge(&mut self, other: &ValueRange) {
        if other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
    }
}

/// Typed view over raw little-endian sample bytes; the bridge between
/// byte-level IO and the numeric downsampling filters.
pub(crate) trait Sample: Copy + Send + Sync + ToPrimitive + 'static {
    const BYTES: usize;

    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut [u8]);

    fn as_f64(self) -> f64 {
        self.to_f64().unwrap_or(0.0)
    }

    /// Cast back from the f64 accumulator. Integer kinds truncate toward
    /// zero; this lossy step is part of the on-disk contract and must not
    /// be changed to round-to-nearest.
    fn from_f64_truncated(value: f64) -> Self;
}

macro_rules! impl_sample {
    ($($t:ty),*) => {
        $(
            impl Sample for $t {
                const BYTES: usize = std::mem::size_of::<$t>();

                fn read_le(bytes: &[u8]) -> Self {
                    <$t>::from_le_bytes(bytes[..Self::BYTES].try_into().unwrap())
                }

                fn write_le(self, out: &mut [u8]) {
                    out[..Self::BYTES].copy_from_slice(&self.to_le_bytes());
                }

                fn from_f64_truncated(value: f64) -> Self {
                    value as $t
                }
            }
        )*
    };
}

impl_sample!(u8, i8, u16, i16, f32, f64);

/// Dispatch a generic expression over the closed set of element kinds.
macro_rules! dispatch_element_kind {
    ($kind:expr, $t:ident => $body:expr) => {
        match $kind {
            $crate::types::ElementKind::U8 => {
                type $t = u8;
                $body
            }
            $crate::types::ElementKind::I8 => {
                type $t = i8;
                $body
            }
            $crate::types::ElementKind::U16 => {
                type $t = u16;
                $body
            }
            $crate::types::ElementKind::I16 => {
                type $t = i16;
                $body
            }
            $crate::types::ElementKind::F32 => {
                type $t = f32;
                $body
            }
            $crate::types::ElementKind::F64 => {
                type $t = f64;
                $body
            }
        }
    };
}

pub(crate) use dispatch_element_kind;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_kind_sizes() {
        assert_eq!(ElementKind::U8.size_in_bytes(), 1);
        assert_eq!(ElementKind::I16.size_in_bytes(), 2);
        assert_eq!(ElementKind::F32.size_in_bytes(), 4);
        assert_eq!(ElementKind::F64.size_in_bytes(), 8);
    }

    #[test]
    fn test_descriptor_resolution() {
        assert_eq!(
            ElementKind::from_descriptor(8, false, false).unwrap(),
            ElementKind::U8
        );
        assert_eq!(
            ElementKind::from_descriptor(32, true, true).unwrap(),
            ElementKind::F32
        );
        assert!(matches!(
            ElementKind::from_descriptor(64, false, false),
            Err(VolumeError::UnsupportedType(_))
        ));
        assert!(matches!(
            ElementKind::from_descriptor(1, false, false),
            Err(VolumeError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_element_type() {
        let scalar = ElementType::scalar(ElementKind::U16);
        assert_eq!(scalar.size_in_bytes(), 2);

        let vec3 = ElementType::vector(ElementKind::F32, 3).unwrap();
        assert_eq!(vec3.size_in_bytes(), 12);
        assert_eq!(vec3.components(), 3);

        assert!(ElementType::vector(ElementKind::U8, 0).is_err());
    }

    #[test]
    fn test_level_sizes() {
        let domain = Domain::new(vec![256, 256, 100], ElementType::scalar(ElementKind::U8)).unwrap();
        assert_eq!(domain.level_size(0), vec![256, 256, 100]);
        assert_eq!(domain.level_size(1), vec![128, 128, 50]);
        assert_eq!(domain.level_size(2), vec![64, 64, 25]);
        assert_eq!(domain.level_size(3), vec![32, 32, 13]);
        assert_eq!(domain.level_voxels(2), 64 * 64 * 25);
        assert_eq!(domain.flat_size_bytes(), 256 * 256 * 100);
    }

    #[test]
    fn test_anisotropic_decimation() {
        let domain = Domain::new(vec![128, 128, 4], ElementType::scalar(ElementKind::U8))
            .unwrap()
            .with_decimation(vec![2, 2, 1])
            .unwrap();
        assert_eq!(domain.level_size(2), vec![32, 32, 4]);
    }

    #[test]
    fn test_value_range() {
        let mut range = ValueRange::empty();
        assert!(!range.is_valid());
        range.observe(3.0);
        range.observe(-1.0);
        range.observe(f64::NAN);
        assert_eq!(range.min, -1.0);
        assert_eq!(range.max, 3.0);

        let mut other = ValueRange::new(-5.0, 1.0);
        other.merge(&range);
        assert_eq!(other.min, -5.0);
        assert_eq!(other.max, 3.0);
    }

    #[test]
    fn test_sample_truncation() {
        assert_eq!(<u8 as Sample>::from_f64_truncated(3.99), 3);
        assert_eq!(<i16 as Sample>::from_f64_truncated(-3.99), -3);
        assert_eq!(<f32 as Sample>::from_f64_truncated(3.99), 3.99f32);
    }
}
