//! Utility functions

/// Integer ceiling division
pub(crate) fn ceil_div(value: u64, divisor: u64) -> u64 {
    debug_assert!(divisor > 0);
    (value + divisor - 1) / divisor
}

/// Row-major strides for a shape (last axis fastest)
pub(crate) fn strides(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Flat row-major offset of a coordinate within a shape
pub(crate) fn flat_offset(coords: &[u64], shape: &[u64]) -> u64 {
    coords
        .iter()
        .zip(strides(shape).iter())
        .map(|(c, s)| c * s)
        .sum()
}

/// Format byte size in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Iterate every coordinate of an N-dimensional box `[0, shape)` in
/// row-major order, invoking the callback with each coordinate vector.
pub(crate) fn for_each_coord<F>(shape: &[u64], mut callback: F)
where
    F: FnMut(&[u64]),
{
    if shape.iter().any(|&s| s == 0) {
        return;
    }
    let mut coords = vec![0u64; shape.len()];
    loop {
        callback(&coords);

        // Odometer increment, last axis fastest
        let mut axis = shape.len();
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            coords[axis] += 1;
            if coords[axis] < shape[axis] {
                break;
            }
            coords[axis] = 0;
        }
    }
}
