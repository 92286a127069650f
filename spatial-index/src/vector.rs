//! The capability the index needs from the objects it stores and queries.

use serde::{Deserialize, Serialize};

use crate::rstar::types::ObjectId;

/// An object with a fixed dimensionality and per-axis bounds.
///
/// Points report the same value for `min` and `max`; boxes report their
/// corners.
pub trait SpatialVector {
    fn dimensionality(&self) -> usize;

    fn min(&self, dim: usize) -> f64;

    fn max(&self, dim: usize) -> f64;

    fn center(&self, dim: usize) -> f64 {
        (self.min(dim) + self.max(dim)) / 2.0
    }

    /// Center coordinates, the point used for distance computations.
    fn coordinates(&self) -> Vec<f64> {
        (0..self.dimensionality()).map(|d| self.center(d)).collect()
    }
}

/// A spatial vector with a stable identifier, the unit of insertion.
pub trait IndexedVector: SpatialVector {
    fn object_id(&self) -> ObjectId;
}

impl SpatialVector for [f64] {
    fn dimensionality(&self) -> usize {
        self.len()
    }

    fn min(&self, dim: usize) -> f64 {
        self[dim]
    }

    fn max(&self, dim: usize) -> f64 {
        self[dim]
    }

    fn coordinates(&self) -> Vec<f64> {
        self.to_vec()
    }
}

impl SpatialVector for Vec<f64> {
    fn dimensionality(&self) -> usize {
        self.len()
    }

    fn min(&self, dim: usize) -> f64 {
        self[dim]
    }

    fn max(&self, dim: usize) -> f64 {
        self[dim]
    }

    fn coordinates(&self) -> Vec<f64> {
        self.clone()
    }
}

impl<const N: usize> SpatialVector for [f64; N] {
    fn dimensionality(&self) -> usize {
        N
    }

    fn min(&self, dim: usize) -> f64 {
        self[dim]
    }

    fn max(&self, dim: usize) -> f64 {
        self[dim]
    }
}

/// An identified point, the default object type of the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: ObjectId,
    pub values: Vec<f64>,
}

impl Point {
    pub fn new(id: ObjectId, values: Vec<f64>) -> Self {
        Self { id, values }
    }
}

impl SpatialVector for Point {
    fn dimensionality(&self) -> usize {
        self.values.len()
    }

    fn min(&self, dim: usize) -> f64 {
        self.values[dim]
    }

    fn max(&self, dim: usize) -> f64 {
        self.values[dim]
    }

    fn coordinates(&self) -> Vec<f64> {
        self.values.clone()
    }
}

impl IndexedVector for Point {
    fn object_id(&self) -> ObjectId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_capability() {
        let p = Point::new(9, vec![1.0, -2.0, 3.5]);
        assert_eq!(p.dimensionality(), 3);
        assert_eq!(p.object_id(), 9);
        assert_eq!(p.min(1), -2.0);
        assert_eq!(p.max(1), -2.0);
        assert_eq!(p.coordinates(), vec![1.0, -2.0, 3.5]);
    }

    #[test]
    fn test_slices_and_arrays() {
        let arr = [1.0, 2.0];
        assert_eq!(arr.dimensionality(), 2);
        assert_eq!(arr.center(1), 2.0);
        assert_eq!(arr.coordinates(), vec![1.0, 2.0]);

        let slice: &[f64] = &[4.0];
        assert_eq!(slice.dimensionality(), 1);
        assert_eq!(slice.coordinates(), vec![4.0]);
    }
}
