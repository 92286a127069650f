//! # Spatial Index - Disk-Resident R*-Tree
//!
//! This crate provides a paged R*-tree over points in low to medium
//! dimensional space, with range and k-nearest-neighbor search.
//!
//! ## Features
//!
//! - **Paged Storage**: Nodes live in pages of a page file, in memory or on disk
//! - **LRU Cache**: Frequently accessed pages kept in memory, I/O counted per page
//! - **R\* Heuristics**: Overlap-minimizing subtree choice, forced reinsertion
//!   and topological splits
//! - **Bulk Loading**: Bottom-up construction by maximum extension or Z-order
//! - **Best-First Queries**: Range and k-NN search with any distance function
//!   that can bound the distance to a box
//! - **Persistent**: Trees written to a file can be reopened later
//!
//! ## Quick Start
//!
//! ```rust
//! use spatial_index::{EuclideanDistance, Point, RStarTree};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // A memory-backed tree over 2-D points with 4 KiB pages
//! let mut tree = RStarTree::create(2, None, 4096, 256)?;
//!
//! tree.insert(&Point::new(1, vec![0.0, 0.0]))?;
//! tree.insert(&Point::new(2, vec![3.0, 0.0]))?;
//! tree.insert(&Point::new(3, vec![0.0, 4.0]))?;
//!
//! let within = tree.range_query(&[0.0, 0.0], 3.5, &EuclideanDistance)?;
//! assert_eq!(within.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
//!
//! let nearest = tree.knn_query(&[0.0, 3.0], 1, &EuclideanDistance)?;
//! assert_eq!(nearest[0].id, 3);
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistence
//!
//! ```rust,no_run
//! use spatial_index::{BulkSplitStrategy, EuclideanDistance, Point, RStarTree};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let points: Vec<Point> = (0..10_000)
//!     .map(|i| Point::new(i, vec![(i % 100) as f64, (i / 100) as f64]))
//!     .collect();
//!
//! let path = Path::new("points.rstar");
//! let mut tree = RStarTree::bulk_create(&points, Some(path), 4096, 256, BulkSplitStrategy::ZCurve)?;
//! tree.close()?;
//!
//! let tree = RStarTree::open(path, 256)?;
//! let nearest = tree.knn_query(&[50.0, 50.0], 10, &EuclideanDistance)?;
//! # Ok(())
//! # }
//! ```

pub mod bounding_box;
pub mod distance;
pub mod index;
pub mod rstar;
pub mod vector;
pub mod zcurve;

pub use bounding_box::Mbr;
pub use distance::{
    CosineDistance, DistanceFunction, EuclideanDistance, LpDistance, ManhattanDistance,
    MaximumDistance, SpatialDistanceFunction,
};
pub use index::SpatialIndex;
pub use rstar::{
    BulkSplitStrategy, Capacities, Entry, IntegrityReport, ObjectId, PageId, QueryResult,
    RStarTree, SpatialError, SpatialResult, TreeConfig, TreeShape, TreeStats,
};
pub use vector::{IndexedVector, Point, SpatialVector};
