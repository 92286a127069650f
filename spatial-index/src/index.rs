//! SpatialIndex trait definition.

use crate::bounding_box::Mbr;
use crate::distance::{DistanceFunction, EuclideanDistance};
use crate::rstar::{ObjectId, QueryResult, RStarTree, SpatialResult};
use crate::vector::IndexedVector;

/// The query and mutation surface of a point index.
///
/// Object safe, so callers can hold a `Box<dyn SpatialIndex>`.
pub trait SpatialIndex: Send + Sync {
    /// Adds a point to the index.
    fn add(&mut self, object: &dyn IndexedVector) -> SpatialResult<()>;

    /// Removes a point, matched by id and exact coordinates.
    fn remove(&mut self, object: &dyn IndexedVector) -> SpatialResult<bool>;

    /// Finds the ids of all points inside a box.
    fn find_intersecting(&self, region: &Mbr) -> SpatialResult<Vec<ObjectId>>;

    /// Finds the `k` points nearest to `query`.
    fn find_nearest(
        &self,
        query: &[f64],
        k: usize,
        distance: &dyn DistanceFunction,
    ) -> SpatialResult<Vec<QueryResult>>;

    /// Finds all points within `radius` of `query`.
    fn find_in_range(
        &self,
        query: &[f64],
        radius: f64,
        distance: &dyn DistanceFunction,
    ) -> SpatialResult<Vec<QueryResult>>;

    /// Finds all points within a Euclidean distance of `query`.
    fn find_within_distance(&self, query: &[f64], radius: f64) -> SpatialResult<Vec<QueryResult>> {
        self.find_in_range(query, radius, &EuclideanDistance)
    }

    /// Gets the number of indexed points.
    fn size(&self) -> u64;

    /// Closes the index, flushing all pending changes.
    fn close(&mut self) -> SpatialResult<()>;
}

impl SpatialIndex for RStarTree {
    fn add(&mut self, object: &dyn IndexedVector) -> SpatialResult<()> {
        self.insert(object)
    }

    fn remove(&mut self, object: &dyn IndexedVector) -> SpatialResult<bool> {
        self.delete(object)
    }

    fn find_intersecting(&self, region: &Mbr) -> SpatialResult<Vec<ObjectId>> {
        self.intersecting(region)
    }

    fn find_nearest(
        &self,
        query: &[f64],
        k: usize,
        distance: &dyn DistanceFunction,
    ) -> SpatialResult<Vec<QueryResult>> {
        self.knn_query(query, k, distance)
    }

    fn find_in_range(
        &self,
        query: &[f64],
        radius: f64,
        distance: &dyn DistanceFunction,
    ) -> SpatialResult<Vec<QueryResult>> {
        self.range_query(query, radius, distance)
    }

    fn size(&self) -> u64 {
        self.len()
    }

    fn close(&mut self) -> SpatialResult<()> {
        RStarTree::close(self)
    }
}
