//! Paged R*-tree.
//!
//! This module provides the tree engine and everything it stands on:
//! - Page-based node storage behind an id-keyed page file
//! - LRU page cache with dirty tracking and I/O accounting
//! - Forced reinsertion and topological splits on overflow
//! - Bottom-up bulk loading with pluggable partitioning
//! - Best-first range and k-nearest-neighbor queries
//!
//! Nodes never hold references to each other. Parents store child page ids
//! and children store the id of their parent and their slot in it, so the
//! page file is the only owner of the tree structure.

pub mod bulk;
pub mod cache;
pub mod config;
pub mod constants;
pub mod integrity;
pub mod page_file;
pub mod split;
pub mod storage;
pub mod types;
mod query;
mod tree_impl;

pub use config::{BulkSplitStrategy, TreeConfig, TreeShape};
pub use constants::{DEFAULT_CACHE_PAGES, DEFAULT_PAGE_SIZE};
pub use integrity::IntegrityReport;
pub use page_file::{CachedPageFile, MemoryPageFile, PageFile, PersistentPageFile};
pub use tree_impl::RStarTree;
pub use types::{
    Capacities, Entry, Node, NodeKind, ObjectId, PageFileStats, PageId, QueryResult,
    SpatialError, SpatialResult, TreeStats,
};
