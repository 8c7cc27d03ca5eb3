//! Auxiliary metadata blocks: per-LOD min/max, the 1D value histogram,
//! and free-form key/value pairs.

use crate::error::{Result, VolumeError};
use crate::io::{ByteReader, ByteWriter};
use crate::types::ValueRange;
use chrono::Utc;

/// Per-LOD global min/max block payload
#[derive(Debug, Clone, PartialEq)]
pub struct MaxMinBlock {
    pub ranges: Vec<ValueRange>,
}

impl MaxMinBlock {
    pub(crate) fn encode(&self, big_endian: bool) -> Vec<u8> {
        let mut w = ByteWriter::new(big_endian);
        w.put_u32(self.ranges.len() as u32);
        for range in &self.ranges {
            w.put_f64(range.min);
            w.put_f64(range.max);
        }
        w.into_inner()
    }

    pub(crate) fn decode(payload: &[u8], big_endian: bool) -> Result<Self> {
        let mut r = ByteReader::new(payload, big_endian);
        let count = r.u32()? as usize;
        let mut ranges = Vec::with_capacity(count);
        for _ in 0..count {
            ranges.push(ValueRange::new(r.f64()?, r.f64()?));
        }
        Ok(Self { ranges })
    }
}

/// 1D value histogram block payload (bin counts over the finest level)
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramBlock {
    pub bins: Vec<u64>,
}

impl HistogramBlock {
    pub(crate) fn encode(&self, big_endian: bool) -> Vec<u8> {
        let mut w = ByteWriter::new(big_endian);
        w.put_u64(self.bins.len() as u64);
        for &bin in &self.bins {
            w.put_u64(bin);
        }
        w.into_inner()
    }

    pub(crate) fn decode(payload: &[u8], big_endian: bool) -> Result<Self> {
        let mut r = ByteReader::new(payload, big_endian);
        let count = r.u64()? as usize;
        if count > payload.len() / 8 {
            return Err(VolumeError::InvalidFormat(
                "histogram bin count exceeds payload".to_string(),
            ));
        }
        let mut bins = Vec::with_capacity(count);
        for _ in 0..count {
            bins.push(r.u64()?);
        }
        Ok(Self { bins })
    }

    /// Total samples counted
    pub fn total(&self) -> u64 {
        self.bins.iter().sum()
    }
}

/// Free-form key/value metadata pairs, insertion-ordered
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyValueBlock {
    pairs: Vec<(String, String)>,
}

impl KeyValueBlock {
    /// Standard pairs stamped by every conversion
    pub(crate) fn for_conversion(filter_name: &str, source_bytes: u64) -> Self {
        let mut block = Self::default();
        block.insert("created", Utc::now().to_rfc3339());
        block.insert("writer", format!("brickvol {}", env!("CARGO_PKG_VERSION")));
        block.insert("downsample-filter", filter_name);
        block.insert("source-bytes", source_bytes.to_string());
        block
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub(crate) fn encode(&self, big_endian: bool) -> Vec<u8> {
        let mut w = ByteWriter::new(big_endian);
        w.put_u32(self.pairs.len() as u32);
        for (key, value) in &self.pairs {
            w.put_str(key);
            w.put_str(value);
        }
        w.into_inner()
    }

    pub(crate) fn decode(payload: &[u8], big_endian: bool) -> Result<Self> {
        let mut r = ByteReader::new(payload, big_endian);
        let count = r.u32()? as usize;
        let mut pairs = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let key = r.str()?;
            let value = r.str()?;
            pairs.push((key, value));
        }
        Ok(Self { pairs })
    }
}
