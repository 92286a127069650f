//! Diagnostic traversals: structural self-check and tree statistics.
//!
//! Neither runs on the hot path. The self-check reports every violation it
//! finds instead of stopping at the first one.

use super::config::TreeShape;
use super::constants::{LEAF_LEVEL, ROOT_PAGE_ID};
use super::tree_impl::RStarTree;
use super::types::{Entry, Node, NodeKind, PageId, SpatialResult, TreeStats};
use crate::vector::SpatialVector;

// ============================================================================
// Integrity Checking
// ============================================================================

/// Result of integrity check operation
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    /// Total pages checked
    pub pages_checked: u64,
    /// Points found in the leaves
    pub objects_found: u64,
    /// Pages that could not be read
    pub unreadable_pages: Vec<PageId>,
    /// Summary of findings
    pub is_valid: bool,
    /// Detailed error messages
    pub errors: Vec<String>,
}

impl IntegrityReport {
    pub fn new() -> Self {
        Self {
            pages_checked: 0,
            objects_found: 0,
            unreadable_pages: Vec::new(),
            is_valid: true,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, message: String) {
        self.is_valid = false;
        self.errors.push(message);
    }
}

impl Default for IntegrityReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a page is expected to hang in the tree
struct Expected {
    page: PageId,
    level: usize,
    parent: Option<PageId>,
    index: usize,
}

impl RStarTree {
    /// Walk the whole tree and verify its invariants: entry counts within
    /// bounds, back-references, stored boxes equal to the recomputed ones,
    /// every leaf at the same depth, uniform dimensionality and the object
    /// count.
    pub fn check_integrity(&self) -> SpatialResult<IntegrityReport> {
        self.check_closed()?;
        let mut report = IntegrityReport::new();
        let mut stack = vec![Expected {
            page: ROOT_PAGE_ID,
            level: self.height,
            parent: None,
            index: 0,
        }];

        while let Some(expected) = stack.pop() {
            let node = match self.read_node(expected.page) {
                Ok(node) => node,
                Err(e) => {
                    report.unreadable_pages.push(expected.page);
                    report.fail(format!("page {}: {}", expected.page, e));
                    continue;
                }
            };
            report.pages_checked += 1;
            self.check_node(&node, &expected, &mut report);

            if node.is_leaf() {
                report.objects_found += node.len() as u64;
                continue;
            }
            for (index, entry) in node.entries.iter().enumerate() {
                let Entry::Directory { child, mbr } = entry else {
                    continue;
                };
                // An unreadable child is reported when it is visited
                if let Ok(child_node) = self.read_node(*child) {
                    let actual = child_node.compute_mbr(self.header.dimensionality);
                    if *mbr != actual {
                        report.fail(format!(
                            "page {} slot {}: stored box {:?} differs from child {} box {:?}",
                            node.id, index, mbr, child, actual
                        ));
                    }
                }
                stack.push(Expected {
                    page: *child,
                    level: expected.level.saturating_sub(1),
                    parent: Some(node.id),
                    index,
                });
            }
        }

        if report.objects_found != self.header.entry_count {
            report.fail(format!(
                "header counts {} objects, leaves hold {}",
                self.header.entry_count, report.objects_found
            ));
        }
        if !report.is_valid {
            log::warn!("integrity check found {} problems", report.errors.len());
        }
        Ok(report)
    }

    fn check_node(&self, node: &Node, expected: &Expected, report: &mut IntegrityReport) {
        let dimensionality = self.header.dimensionality;
        let caps = self.header.capacities;
        let is_root = expected.parent.is_none();

        if node.id != expected.page {
            report.fail(format!("page {} stores node id {}", expected.page, node.id));
        }
        if node.parent != expected.parent || (!is_root && node.index != expected.index) {
            report.fail(format!(
                "page {} points back to {:?} slot {}, expected {:?} slot {}",
                node.id, node.parent, node.index, expected.parent, expected.index
            ));
        }

        let should_be_leaf = expected.level == LEAF_LEVEL;
        if node.is_leaf() != should_be_leaf {
            report.fail(format!(
                "page {} is a {:?} node at level {} of a tree of height {}",
                node.id, node.kind, expected.level, self.height
            ));
        }
        if let Some(entry) = node
            .entries
            .iter()
            .find(|e| e.is_leaf_entry() != node.is_leaf())
        {
            report.fail(format!("page {} mixes entry kinds: {:?}", node.id, entry));
        }
        if let Some(entry) = node
            .entries
            .iter()
            .find(|e| e.dimensionality() != dimensionality)
        {
            report.fail(format!(
                "page {} holds an entry of dimensionality {}: {:?}",
                node.id,
                entry.dimensionality(),
                entry
            ));
        }

        let flat_root = is_root && self.header.shape == TreeShape::Flat;
        let maximum = caps.maximum(node.kind);
        if !flat_root && node.len() > maximum {
            report.fail(format!(
                "page {} holds {} entries, at most {} allowed",
                node.id,
                node.len(),
                maximum
            ));
        }

        let minimum = caps.minimum(node.kind);
        if !is_root && node.len() < minimum && !self.is_lone_flat_leaf(expected) {
            report.fail(format!(
                "page {} holds {} entries, at least {} required",
                node.id,
                node.len(),
                minimum
            ));
        }
    }

    /// The only leaf of a flat tree may run below the minimum fill.
    fn is_lone_flat_leaf(&self, expected: &Expected) -> bool {
        self.header.shape == TreeShape::Flat
            && expected.parent == Some(ROOT_PAGE_ID)
            && self
                .read_node(ROOT_PAGE_ID)
                .map(|root| root.len() == 1)
                .unwrap_or(false)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Node counts per level, object count, capacities and I/O counters.
    pub fn stats(&self) -> SpatialResult<TreeStats> {
        self.check_closed()?;
        let mut nodes_per_level = vec![0u64; self.height];
        let mut stats = TreeStats {
            height: self.height,
            dimensionality: self.header.dimensionality,
            shape: self.header.shape,
            capacities: Some(self.header.capacities),
            splits: self.counters.splits,
            reinsertions: self.counters.reinsertions,
            ..TreeStats::default()
        };

        let mut stack = vec![(ROOT_PAGE_ID, self.height)];
        while let Some((page, level)) = stack.pop() {
            let node = self.read_node(page)?;
            if let Some(count) = level.checked_sub(1).and_then(|i| nodes_per_level.get_mut(i)) {
                *count += 1;
            }
            match node.kind {
                NodeKind::Leaf => {
                    stats.leaf_nodes += 1;
                    stats.objects += node.len() as u64;
                }
                NodeKind::Directory => {
                    stats.dir_nodes += 1;
                    stack.extend(node.entries.iter().filter_map(Entry::child).map(|c| (c, level - 1)));
                }
            }
        }

        stats.nodes_per_level = nodes_per_level;
        stats.page_file = self.page_file_stats();
        Ok(stats)
    }
}
