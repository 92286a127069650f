//! Minimum bounding rectangles in d-dimensional space.

use serde::{Deserialize, Serialize};

use crate::rstar::types::{SpatialError, SpatialResult};
use crate::vector::SpatialVector;

/// A d-dimensional axis-aligned bounding box given by its lower and upper
/// corners.
///
/// An *empty* box (lower > upper on every axis) is the identity of
/// [`Mbr::union`]; it has zero volume and intersects nothing.
///
/// # Examples
///
/// ```rust
/// use spatial_index::Mbr;
///
/// let a = Mbr::new(vec![0.0, 0.0], vec![2.0, 2.0]).unwrap();
/// let b = Mbr::new(vec![1.0, 1.0], vec![3.0, 3.0]).unwrap();
/// assert_eq!(a.overlap(&b), 1.0);
/// assert_eq!(a.union(&b).volume(), 9.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mbr {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Mbr {
    /// Creates a box from its corners, validating that both have the same
    /// length and that `lower[i] <= upper[i]`.
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> SpatialResult<Self> {
        if lower.len() != upper.len() {
            return Err(SpatialError::DimensionMismatch {
                expected: lower.len(),
                actual: upper.len(),
            });
        }
        if let Some(dim) = (0..lower.len()).find(|&d| !(lower[d] <= upper[d])) {
            return Err(SpatialError::InvalidArgument(format!(
                "lower bound {} exceeds upper bound {} in dimension {}",
                lower[dim], upper[dim], dim
            )));
        }
        Ok(Self { lower, upper })
    }

    /// Degenerate zero-volume box around a point.
    pub fn point(values: &[f64]) -> Self {
        Self {
            lower: values.to_vec(),
            upper: values.to_vec(),
        }
    }

    /// The empty box of the given dimensionality.
    pub fn empty(dimensionality: usize) -> Self {
        Self {
            lower: vec![f64::INFINITY; dimensionality],
            upper: vec![f64::NEG_INFINITY; dimensionality],
        }
    }

    pub fn from_vector<V: SpatialVector + ?Sized>(v: &V) -> Self {
        let d = v.dimensionality();
        Self {
            lower: (0..d).map(|i| v.min(i)).collect(),
            upper: (0..d).map(|i| v.max(i)).collect(),
        }
    }

    /// Union of all given objects, `None` when the iterator is empty.
    pub fn union_all<'a, V, I>(items: I) -> Option<Mbr>
    where
        V: SpatialVector + 'a,
        I: IntoIterator<Item = &'a V>,
    {
        let mut iter = items.into_iter();
        let mut mbr = Mbr::from_vector(iter.next()?);
        for item in iter {
            mbr.extend(item);
        }
        Some(mbr)
    }

    pub fn dimensionality(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn is_empty(&self) -> bool {
        self.lower.iter().zip(&self.upper).any(|(lo, hi)| lo > hi)
    }

    pub fn extent(&self, dim: usize) -> f64 {
        (self.upper[dim] - self.lower[dim]).max(0.0)
    }

    /// Grows this box to include `other`.
    pub fn extend<V: SpatialVector + ?Sized>(&mut self, other: &V) {
        for d in 0..self.lower.len() {
            self.lower[d] = self.lower[d].min(other.min(d));
            self.upper[d] = self.upper[d].max(other.max(d));
        }
    }

    pub fn union(&self, other: &Mbr) -> Mbr {
        let mut merged = self.clone();
        merged.extend(other);
        merged
    }

    /// Product of the extents.
    pub fn volume(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        (0..self.dimensionality()).map(|d| self.extent(d)).product()
    }

    /// Sum of the extents (the R*-tree "margin").
    pub fn perimeter(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        (0..self.dimensionality()).map(|d| self.extent(d)).sum()
    }

    /// Volume increase needed to include `other`.
    pub fn enlargement<V: SpatialVector + ?Sized>(&self, other: &V) -> f64 {
        let mut merged = self.clone();
        merged.extend(other);
        merged.volume() - self.volume()
    }

    /// Volume of the intersection with `other`.
    pub fn overlap(&self, other: &Mbr) -> f64 {
        let mut volume = 1.0;
        for d in 0..self.dimensionality() {
            let side = self.upper[d].min(other.upper[d]) - self.lower[d].max(other.lower[d]);
            if side <= 0.0 {
                return 0.0;
            }
            volume *= side;
        }
        volume
    }

    pub fn intersects<V: SpatialVector + ?Sized>(&self, other: &V) -> bool {
        (0..self.dimensionality()).all(|d| self.lower[d] <= other.max(d) && other.min(d) <= self.upper[d])
    }

    pub fn contains<V: SpatialVector + ?Sized>(&self, other: &V) -> bool {
        (0..self.dimensionality()).all(|d| self.lower[d] <= other.min(d) && other.max(d) <= self.upper[d])
    }

    pub fn center(&self) -> Vec<f64> {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| (lo + hi) / 2.0)
            .collect()
    }
}

impl SpatialVector for Mbr {
    fn dimensionality(&self) -> usize {
        self.lower.len()
    }

    fn min(&self, dim: usize) -> f64 {
        self.lower[dim]
    }

    fn max(&self, dim: usize) -> f64 {
        self.upper[dim]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn mbr(lower: &[f64], upper: &[f64]) -> Mbr {
        Mbr::new(lower.to_vec(), upper.to_vec()).unwrap()
    }

    #[test]
    fn test_new_rejects_inverted_bounds() {
        assert!(Mbr::new(vec![1.0, 0.0], vec![0.0, 1.0]).is_err());
        assert!(Mbr::new(vec![0.0], vec![0.0, 1.0]).is_err());
        assert!(Mbr::new(vec![f64::NAN], vec![1.0]).is_err());
    }

    #[test]
    fn test_volume_and_perimeter() {
        let b = mbr(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]);
        assert_relative_eq!(b.volume(), 6.0);
        assert_relative_eq!(b.perimeter(), 6.0);
        assert_eq!(Mbr::point(&[1.0, 1.0]).volume(), 0.0);
    }

    #[test]
    fn test_empty_box_is_union_identity() {
        let empty = Mbr::empty(2);
        assert!(empty.is_empty());
        assert_eq!(empty.volume(), 0.0);
        assert_eq!(empty.perimeter(), 0.0);

        let b = mbr(&[1.0, 2.0], &[3.0, 4.0]);
        assert_eq!(empty.union(&b), b);
        assert!(!empty.intersects(&b));
    }

    #[test]
    fn test_overlap() {
        let a = mbr(&[0.0, 0.0], &[2.0, 2.0]);
        let b = mbr(&[1.0, 1.0], &[3.0, 3.0]);
        let c = mbr(&[2.0, 0.0], &[4.0, 2.0]);
        assert_relative_eq!(a.overlap(&b), 1.0);
        // Touching boxes share no volume.
        assert_eq!(a.overlap(&c), 0.0);
        assert!(a.intersects(&c));
    }

    #[test]
    fn test_enlargement() {
        let a = mbr(&[0.0, 0.0], &[1.0, 1.0]);
        assert_relative_eq!(a.enlargement(&Mbr::point(&[2.0, 1.0])), 1.0);
        assert_eq!(a.enlargement(&Mbr::point(&[0.5, 0.5])), 0.0);
    }

    #[test]
    fn test_contains_and_center() {
        let a = mbr(&[0.0, 0.0], &[4.0, 2.0]);
        assert!(a.contains(&mbr(&[1.0, 1.0], &[2.0, 2.0])));
        assert!(!a.contains(&mbr(&[1.0, 1.0], &[5.0, 2.0])));
        assert!(a.contains(&vec![4.0, 0.0]));
        assert_eq!(a.center(), vec![2.0, 1.0]);
    }

    #[test]
    fn test_union_all() {
        let points = vec![vec![0.0, 5.0], vec![3.0, -1.0], vec![1.0, 1.0]];
        let b = Mbr::union_all(&points).unwrap();
        assert_eq!(b.lower(), &[0.0, -1.0]);
        assert_eq!(b.upper(), &[3.0, 5.0]);
        assert!(Mbr::union_all::<Vec<f64>, _>(&Vec::new()).is_none());
    }
}
