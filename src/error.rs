//! Error types for container operations

use thiserror::Error;

/// Main error type for volume container operations
#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid container format: {0}")]
    InvalidFormat(String),

    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u32),

    #[error("unsupported element type: {0}")]
    UnsupportedType(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("corrupt brick at lod {lod} index {index}: {reason}")]
    CorruptBrick {
        lod: usize,
        index: u64,
        reason: String,
    },

    #[error("checksum mismatch: file records {stored}, computed {computed}")]
    ChecksumMismatch { stored: String, computed: String },

    #[error("incomplete catalog: no entry for brick {index} at lod {lod}")]
    IncompleteCatalog { lod: usize, index: u64 },

    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("conversion cancelled")]
    Cancelled,
}

/// Specialized Result type for container operations
pub type Result<T> = std::result::Result<T, VolumeError>;

impl VolumeError {
    /// Whether the error leaves the file usable (recoverable warning)
    /// or poisons the whole operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VolumeError::ChecksumMismatch { .. } | VolumeError::CorruptBrick { .. }
        )
    }
}
