//! Core types and data structures for the paged R*-tree.
//!
//! This module defines the fundamental types used throughout the tree:
//! - Error types and result types
//! - Entries (leaf points and directory references) and nodes
//! - Capacities and statistics structures
//! - File header and checksummed page wrapper used by the persistent store

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::TreeShape;
use super::constants::{MAGIC, VERSION};
use crate::bounding_box::Mbr;
use crate::vector::SpatialVector;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur in spatial indexing operations
#[derive(Debug, Error)]
pub enum SpatialError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid {kind} capacity {capacity}: {reason}")]
    InvalidCapacity {
        kind: &'static str,
        capacity: usize,
        reason: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Dimensionality mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Corrupted index: {0}")]
    Corrupted(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Tree is closed")]
    Closed,
}

/// Result type for spatial operations
pub type SpatialResult<T> = Result<T, SpatialError>;

/// Identifier of an indexed object
pub type ObjectId = u64;

/// Page ID - unique identifier for a node/page in the page store
pub type PageId = u64;

// ============================================================================
// Capacities
// ============================================================================

/// Node capacities of a tree, fixed for the tree's lifetime.
///
/// A node overflows once it holds `capacity` entries, so a node never stores
/// more than `capacity - 1` entries after an operation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacities {
    pub dir_capacity: usize,
    pub leaf_capacity: usize,
    pub dir_minimum: usize,
    pub leaf_minimum: usize,
}

impl Capacities {
    pub fn capacity(&self, kind: NodeKind) -> usize {
        match kind {
            NodeKind::Leaf => self.leaf_capacity,
            NodeKind::Directory => self.dir_capacity,
        }
    }

    pub fn minimum(&self, kind: NodeKind) -> usize {
        match kind {
            NodeKind::Leaf => self.leaf_minimum,
            NodeKind::Directory => self.dir_minimum,
        }
    }

    /// Largest number of entries a node may keep.
    pub fn maximum(&self, kind: NodeKind) -> usize {
        self.capacity(kind) - 1
    }
}

// ============================================================================
// Entries and Nodes
// ============================================================================

/// An entry stored in a node: an indexed point in a leaf, or a reference to
/// a child page together with the child's bounding box in a directory node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Entry {
    Leaf { id: ObjectId, values: Vec<f64> },
    Directory { child: PageId, mbr: Mbr },
}

impl Entry {
    pub fn leaf(id: ObjectId, values: Vec<f64>) -> Self {
        Entry::Leaf { id, values }
    }

    pub fn directory(child: PageId, mbr: Mbr) -> Self {
        Entry::Directory { child, mbr }
    }

    pub fn is_leaf_entry(&self) -> bool {
        matches!(self, Entry::Leaf { .. })
    }

    /// Child page of a directory entry.
    pub fn child(&self) -> Option<PageId> {
        match self {
            Entry::Directory { child, .. } => Some(*child),
            Entry::Leaf { .. } => None,
        }
    }

    /// Bounding box of the entry; a point yields a degenerate box.
    pub fn mbr(&self) -> Mbr {
        match self {
            Entry::Leaf { values, .. } => Mbr::point(values),
            Entry::Directory { mbr, .. } => mbr.clone(),
        }
    }
}

impl SpatialVector for Entry {
    fn dimensionality(&self) -> usize {
        match self {
            Entry::Leaf { values, .. } => values.len(),
            Entry::Directory { mbr, .. } => mbr.dimensionality(),
        }
    }

    fn min(&self, dim: usize) -> f64 {
        match self {
            Entry::Leaf { values, .. } => values[dim],
            Entry::Directory { mbr, .. } => mbr.lower()[dim],
        }
    }

    fn max(&self, dim: usize) -> f64 {
        match self {
            Entry::Leaf { values, .. } => values[dim],
            Entry::Directory { mbr, .. } => mbr.upper()[dim],
        }
    }
}

/// Whether a node stores points or child references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Leaf,
    Directory,
}

/// A page of the tree.
///
/// `parent` and `index` are back-references: the page id of the parent node
/// and the position of this node's entry inside the parent. The root has no
/// parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: PageId,
    pub kind: NodeKind,
    pub parent: Option<PageId>,
    pub index: usize,
    pub entries: Vec<Entry>,
}

impl Node {
    pub fn new(id: PageId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            parent: None,
            index: 0,
            entries: Vec::new(),
        }
    }

    pub fn with_entries(id: PageId, kind: NodeKind, entries: Vec<Entry>) -> Self {
        Self {
            entries,
            ..Self::new(id, kind)
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the bounding box enclosing all entries; empty nodes yield an
    /// empty box of the given dimensionality.
    pub fn compute_mbr(&self, dimensionality: usize) -> Mbr {
        let mut mbr = Mbr::empty(dimensionality);
        for entry in &self.entries {
            mbr.extend(entry);
        }
        mbr
    }

    /// The directory entry pointing at this node from its parent.
    pub fn to_directory_entry(&self, dimensionality: usize) -> Entry {
        Entry::directory(self.id, self.compute_mbr(dimensionality))
    }
}

// ============================================================================
// Query Results
// ============================================================================

/// An object found by a query together with its distance to the query object
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: ObjectId,
    pub distance: f64,
}

impl QueryResult {
    pub fn new(id: ObjectId, distance: f64) -> Self {
        Self { id, distance }
    }

    /// Total order by distance, ties broken by id.
    pub fn cmp_by_distance(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters of the page store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageFileStats {
    pub cached_pages: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub logical_reads: u64,
    pub logical_writes: u64,
    pub physical_reads: u64,
    pub physical_writes: u64,
}

impl PageFileStats {
    /// Physical page accesses (reads and writes against the backing storage).
    pub fn io_access(&self) -> u64 {
        self.physical_reads.saturating_add(self.physical_writes)
    }
}

/// Structural statistics about a tree
#[derive(Debug, Clone, Default)]
pub struct TreeStats {
    pub height: usize,
    pub dimensionality: usize,
    pub shape: TreeShape,
    pub capacities: Option<Capacities>,
    pub objects: u64,
    pub leaf_nodes: u64,
    pub dir_nodes: u64,
    /// Node count per level, index 0 holds the leaves
    pub nodes_per_level: Vec<u64>,
    pub splits: u64,
    pub reinsertions: u64,
    pub page_file: PageFileStats,
}

impl fmt::Display for TreeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "R*-tree ({:?}) with {} levels over {}-dimensional points",
            self.shape, self.height, self.dimensionality
        )?;
        if let Some(caps) = &self.capacities {
            writeln!(
                f,
                "  dir capacity {} (min {}), leaf capacity {} (min {})",
                caps.dir_capacity, caps.dir_minimum, caps.leaf_capacity, caps.leaf_minimum
            )?;
        }
        for (level, count) in self.nodes_per_level.iter().enumerate().rev() {
            writeln!(f, "  level {}: {} nodes", level + 1, count)?;
        }
        writeln!(
            f,
            "  {} directory nodes, {} leaf nodes, {} objects",
            self.dir_nodes, self.leaf_nodes, self.objects
        )?;
        write!(
            f,
            "  {} splits, {} forced reinsertions, {} physical page accesses",
            self.splits,
            self.reinsertions,
            self.page_file.io_access()
        )
    }
}

// ============================================================================
// Page with Checksum
// ============================================================================

/// A page wrapped with CRC32 checksum for corruption detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageWithChecksum {
    /// CRC32 checksum of the node data
    pub checksum: u32,
    /// The actual node data
    pub node: Node,
}

impl PageWithChecksum {
    pub fn new(node: Node) -> SpatialResult<Self> {
        let checksum = Self::calculate_checksum(&node)?;
        Ok(Self { checksum, node })
    }

    /// Calculate CRC32 checksum of node data
    pub fn calculate_checksum(node: &Node) -> SpatialResult<u32> {
        let serialized = bincode::serde::encode_to_vec(node, bincode::config::legacy())
            .map_err(|e| SpatialError::Serialization(e.to_string()))?;
        Ok(crc32fast::hash(&serialized))
    }

    /// Verify checksum and consume self to return node
    pub fn into_node(self) -> SpatialResult<Node> {
        let expected = Self::calculate_checksum(&self.node)?;
        if self.checksum != expected {
            return Err(SpatialError::Corrupted(format!(
                "page {} checksum mismatch (expected: {:x}, got: {:x})",
                self.node.id, expected, self.checksum
            )));
        }
        Ok(self.node)
    }
}

// ============================================================================
// Headers
// ============================================================================

/// Tree-level metadata persisted with the pages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeHeader {
    pub dimensionality: usize,
    pub page_size: usize,
    pub capacities: Capacities,
    pub shape: TreeShape,
    pub entry_count: u64,
}

/// Header record written by the persistent page store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub next_page_id: PageId,
    pub free_pages: Vec<PageId>,
    pub tree: TreeHeader,
}

impl FileHeader {
    pub fn new(tree: TreeHeader, next_page_id: PageId, free_pages: Vec<PageId>) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            next_page_id,
            free_pages,
            tree,
        }
    }

    pub fn validate(&self) -> SpatialResult<()> {
        if self.magic != MAGIC {
            return Err(SpatialError::Corrupted(
                "invalid file format (bad magic)".into(),
            ));
        }
        if self.version != VERSION {
            return Err(SpatialError::Corrupted(format!(
                "unsupported file format version {}",
                self.version
            )));
        }
        Ok(())
    }
}
