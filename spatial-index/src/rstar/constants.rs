//! Constants for the paged R*-tree.

use super::types::PageId;

/// Default page size in bytes
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default cache size in number of pages
pub const DEFAULT_CACHE_PAGES: usize = 1024;

/// The root always lives on this page
pub const ROOT_PAGE_ID: PageId = 0;

/// Level of the leaves; the root sits at level `height`
pub const LEAF_LEVEL: usize = 1;

/// Fixed per-node byte overhead of the capacity formula
pub const NODE_OVERHEAD: f64 = 16.125;

/// Bytes of a page reference / object id in an entry
pub const ENTRY_ID_BYTES: usize = 4;

/// Bytes per coordinate of a leaf entry (one value)
pub const LEAF_BYTES_PER_DIM: usize = 8;

/// Bytes per dimension of a directory entry (lower and upper bound)
pub const DIR_BYTES_PER_DIM: usize = 16;

/// Minimum fill relative to the maximum number of entries
pub const MIN_FILL_FACTOR: f64 = 0.5;

/// Absolute lower bound of the minimum number of entries
pub const MIN_ENTRIES_FLOOR: usize = 2;

/// Share of entries removed by a forced reinsertion
pub const DEFAULT_REINSERT_FRACTION: f64 = 0.3;

/// Capacities below this trigger a warning at construction
pub const SMALL_CAPACITY_WARNING: usize = 10;

/// Bits per dimension of the Z-order key
pub const Z_CURVE_BITS: u32 = 16;

/// Magic number for file format identification
pub const MAGIC: u32 = 0x5253_5452; // "RSTR"

/// File format version
pub const VERSION: u32 = 1;
