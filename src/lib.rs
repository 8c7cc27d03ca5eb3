//! brickvol - bricked multi-resolution volume container
//!
//! Converts flat N-dimensional scalar/vector arrays too large to hold in
//! memory into a self-describing, checksummed, randomly-seekable,
//! multi-resolution on-disk format, and reads bricks back with O(1)
//! random access.
//!
//! # Features
//!
//! - LOD pyramid built by repeated windowed decimation, fully out of core
//! - Overlapping bricks bounded by a configurable maximum size
//! - Four physical brick orderings: scanline, Morton, Hilbert, seeded random
//! - Independent per-brick compression (none/zlib/lzma/lz4/bzip2)
//! - Whole-file checksum (CRC32/MD5) plus per-brick corruption detection
//! - Table of contents with per-brick offset, size, codec and min/max
//!
//! # Example
//!
//! ```rust,ignore
//! use brickvol::{ConvertConfig, Converter, Domain, ElementKind, ElementType,
//!                MemorySource, VolumeAccess};
//! use std::sync::Arc;
//!
//! # async fn example(voxels: Vec<u8>) -> brickvol::Result<()> {
//! let domain = Domain::new(vec![256, 256, 256], ElementType::scalar(ElementKind::U8))?;
//! let converter = Converter::new(ConvertConfig::default());
//! converter
//!     .convert(Arc::new(MemorySource::new(voxels)), domain, "volume.bvf".as_ref())
//!     .await?;
//!
//! let volume = VolumeAccess::open("volume.bvf").await?;
//! let brick = volume.brick(0, 0).await?;
//! # let _ = brick;
//! # Ok(())
//! # }
//! ```

pub mod access;
mod bricker;
pub mod catalog;
pub mod checksum;
pub mod compression;
pub mod convert;
pub mod error;
pub mod format;
pub mod io;
pub mod layout;
pub mod metadata;
pub mod pyramid;
pub mod sequence;
pub mod types;
mod utils;

// Re-exports
pub use access::VolumeAccess;
pub use catalog::{BrickEntry, Catalog};
pub use checksum::ChecksumKind;
pub use compression::{get_compressor, CompressionLevel, CompressionMethod, Compressor};
pub use convert::{ConversionSummary, ConvertConfig, Converter, Progress, ProgressCallback};
pub use error::{Result, VolumeError};
pub use format::FORMAT_VERSION;
pub use io::{FileSource, FlatSource, MemorySource};
pub use layout::{BrickExtent, BrickSize, VolumeLayout};
pub use pyramid::{
    AverageFilter, DownsampleFilter, MaximumFilter, MedianFilter, MinimumFilter,
};
pub use sequence::BrickOrdering;
pub use types::{Domain, ElementKind, ElementType, ValueRange};
pub use utils::format_bytes;

/// Version of the brickvol implementation
pub const BRICKVOL_VERSION: &str = env!("CARGO_PKG_VERSION");
