//! Tree configuration and capacity computation.

use serde::{Deserialize, Serialize};

use super::constants::{
    DEFAULT_CACHE_PAGES, DEFAULT_PAGE_SIZE, DEFAULT_REINSERT_FRACTION, DIR_BYTES_PER_DIM,
    ENTRY_ID_BYTES, LEAF_BYTES_PER_DIM, MIN_ENTRIES_FLOOR, MIN_FILL_FACTOR, NODE_OVERHEAD,
    SMALL_CAPACITY_WARNING,
};
use super::types::{Capacities, SpatialError, SpatialResult};

/// Shape of the directory above the leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TreeShape {
    /// Balanced multi-level directory that grows and shrinks at the root
    #[default]
    Hierarchical,
    /// A single root directory pointing straight at every leaf; the root
    /// never overflows and the height stays at 2
    Flat,
}

/// How bulk loading orders objects before cutting them into nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BulkSplitStrategy {
    /// Sort the remaining objects along the axis of largest extent before
    /// every cut
    #[default]
    MaxExtension,
    /// Sort once along a Z-order curve over the object centers
    ZCurve,
}

/// Options for creating a tree
///
/// # Example
/// ```rust
/// use spatial_index::{TreeConfig, TreeShape};
///
/// let config = TreeConfig::default()
///     .page_size(1024)
///     .cache_size(64)
///     .shape(TreeShape::Flat);
/// let caps = config.capacities(2).unwrap();
/// assert_eq!(caps.leaf_capacity, 51);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TreeConfig {
    pub page_size: usize,
    pub cache_size: usize,
    pub shape: TreeShape,
    pub bulk_strategy: BulkSplitStrategy,
    pub reinsert_fraction: f64,
    /// Overrides the leaf capacity derived from the page size
    pub leaf_capacity: Option<usize>,
    /// Overrides the directory capacity derived from the page size
    pub dir_capacity: Option<usize>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_size: DEFAULT_CACHE_PAGES,
            shape: TreeShape::default(),
            bulk_strategy: BulkSplitStrategy::default(),
            reinsert_fraction: DEFAULT_REINSERT_FRACTION,
            leaf_capacity: None,
            dir_capacity: None,
        }
    }
}

impl TreeConfig {
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn shape(mut self, shape: TreeShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn bulk_strategy(mut self, strategy: BulkSplitStrategy) -> Self {
        self.bulk_strategy = strategy;
        self
    }

    /// Share of entries removed on the first overflow of a level; 0 turns
    /// forced reinsertion off.
    pub fn reinsert_fraction(mut self, fraction: f64) -> Self {
        self.reinsert_fraction = fraction;
        self
    }

    pub fn leaf_capacity(mut self, capacity: usize) -> Self {
        self.leaf_capacity = Some(capacity);
        self
    }

    pub fn dir_capacity(mut self, capacity: usize) -> Self {
        self.dir_capacity = Some(capacity);
        self
    }

    pub(crate) fn validate(&self) -> SpatialResult<()> {
        if !(0.0..0.5).contains(&self.reinsert_fraction) {
            return Err(SpatialError::InvalidArgument(format!(
                "reinsert fraction {} outside [0, 0.5)",
                self.reinsert_fraction
            )));
        }
        Ok(())
    }

    /// Capacities for points of the given dimensionality.
    pub fn capacities(&self, dimensionality: usize) -> SpatialResult<Capacities> {
        if dimensionality == 0 {
            return Err(SpatialError::InvalidArgument(
                "dimensionality must be at least 1".into(),
            ));
        }

        let dir_capacity = self.dir_capacity.unwrap_or_else(|| {
            capacity_for(self.page_size, ENTRY_ID_BYTES + DIR_BYTES_PER_DIM * dimensionality)
        });
        let leaf_capacity = self.leaf_capacity.unwrap_or_else(|| {
            capacity_for(self.page_size, ENTRY_ID_BYTES + LEAF_BYTES_PER_DIM * dimensionality)
        });

        let dir_minimum = checked_minimum("directory", dir_capacity)?;
        let leaf_minimum = checked_minimum("leaf", leaf_capacity)?;

        if dir_capacity < SMALL_CAPACITY_WARNING {
            log::warn!(
                "page size {} is small: directory capacity is only {}",
                self.page_size,
                dir_capacity
            );
        }

        Ok(Capacities {
            dir_capacity,
            leaf_capacity,
            dir_minimum,
            leaf_minimum,
        })
    }
}

/// `floor((page_size - overhead) / entry_bytes) + 1`
fn capacity_for(page_size: usize, entry_bytes: usize) -> usize {
    let usable = page_size as f64 - NODE_OVERHEAD;
    if usable <= 0.0 {
        return 1;
    }
    (usable / entry_bytes as f64) as usize + 1
}

fn minimum_for(capacity: usize) -> usize {
    let minimum = ((capacity - 1) as f64 * MIN_FILL_FACTOR).round() as usize;
    minimum.max(MIN_ENTRIES_FLOOR)
}

fn checked_minimum(kind: &'static str, capacity: usize) -> SpatialResult<usize> {
    if capacity <= 1 {
        return Err(SpatialError::InvalidCapacity {
            kind,
            capacity,
            reason: "node must hold at least one entry, increase the page size".into(),
        });
    }
    let minimum = minimum_for(capacity);
    // An overflowing node holds `capacity` entries and must split into two
    // halves of at least `minimum`.
    if capacity < 2 * minimum {
        return Err(SpatialError::InvalidCapacity {
            kind,
            capacity,
            reason: format!("cannot split into two nodes of at least {} entries", minimum),
        });
    }
    Ok(minimum)
}
