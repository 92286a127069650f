//! Z-order (Morton) curve keys for bulk loading.
//!
//! The Z-order curve interleaves the bits of the grid coordinates of a point,
//! most significant bits first. Points that are close in space tend to get
//! close keys, so cutting a Z-sorted sequence into runs yields compact nodes.
//! Keys work for any dimensionality: they are bit strings packed into 64-bit
//! words and compared lexicographically.

use crate::bounding_box::Mbr;
use crate::vector::SpatialVector;

/// Maximum number of bits per dimension
const MAX_BITS: u32 = 32;

/// Maps objects inside a bounding region to Z-order keys.
///
/// # Example
/// ```rust
/// use spatial_index::zcurve::ZCurve;
/// use spatial_index::Mbr;
///
/// let region = Mbr::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
/// let curve = ZCurve::new(region, 8);
/// assert!(curve.key(&[0.1, 0.1]) < curve.key(&[0.9, 0.9]));
/// ```
#[derive(Debug, Clone)]
pub struct ZCurve {
    region: Mbr,
    bits: u32,
}

impl ZCurve {
    /// `bits` per dimension, clamped to `1..=32`.
    pub fn new(region: Mbr, bits: u32) -> Self {
        Self {
            region,
            bits: bits.clamp(1, MAX_BITS),
        }
    }

    /// Z-order key of the center of `v`.
    pub fn key<V: SpatialVector + ?Sized>(&self, v: &V) -> Vec<u64> {
        let cells: Vec<u64> = (0..self.region.dimensionality())
            .map(|d| self.cell(d, v.center(d)))
            .collect();
        interleave(&cells, self.bits)
    }

    /// Grid cell of a coordinate, normalizing by the region; flat axes map
    /// to the middle cell.
    fn cell(&self, dim: usize, value: f64) -> u64 {
        let n = 1u64 << self.bits;
        let extent = self.region.extent(dim);
        let normalized = if extent > 0.0 {
            ((value - self.region.lower()[dim]) / extent).clamp(0.0, 1.0)
        } else {
            0.5
        };
        ((normalized * (n as f64 - 0.5)) as u64).min(n - 1)
    }
}

/// Interleaves the low `bits` bits of every cell coordinate, most significant
/// bit level first.
pub fn interleave(cells: &[u64], bits: u32) -> Vec<u64> {
    let total_bits = cells.len() * bits as usize;
    let mut words = vec![0u64; total_bits.div_ceil(64)];
    let mut pos = 0usize;
    for level in (0..bits).rev() {
        for &cell in cells {
            if (cell >> level) & 1 == 1 {
                words[pos / 64] |= 1u64 << (63 - pos % 64);
            }
            pos += 1;
        }
    }
    words
}
