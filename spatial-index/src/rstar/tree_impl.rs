//! RStarTree implementation: construction, insertion, deletion and bulk
//! loading.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::bulk::partition;
use super::config::{BulkSplitStrategy, TreeConfig, TreeShape};
use super::constants::{LEAF_LEVEL, ROOT_PAGE_ID};
use super::page_file::{MemoryPageFile, PageFile, PersistentPageFile};
use super::split::split_entries;
use super::types::{
    Capacities, Entry, Node, NodeKind, ObjectId, PageFileStats, PageId, SpatialError,
    SpatialResult, TreeHeader,
};
use crate::bounding_box::Mbr;
use crate::vector::{IndexedVector, SpatialVector};

/// A paged R*-tree over identified points.
///
/// Mutations take `&mut self`; queries take `&self` and may run from several
/// threads at once since the page file synchronizes its cache internally.
pub struct RStarTree {
    pub(crate) file: Box<dyn PageFile>,
    pub(crate) header: TreeHeader,
    pub(crate) height: usize,
    reinsert_fraction: f64,
    pub(crate) counters: OperationCounters,
    closed: bool,
}

/// Counters of structural changes since the tree was created or opened
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct OperationCounters {
    pub splits: u64,
    pub reinsertions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LevelState {
    Reinserted,
    Split,
}

/// Overflow treatment already applied per level during one top-level
/// insertion. A level absent from the map has not been treated yet.
#[derive(Debug, Default)]
pub(crate) struct ReinsertContext {
    levels: BTreeMap<usize, LevelState>,
}

impl ReinsertContext {
    fn may_reinsert(&self, level: usize) -> bool {
        !self.levels.contains_key(&level)
    }

    fn mark(&mut self, level: usize, state: LevelState) {
        self.levels.insert(level, state);
    }
}

impl RStarTree {
    /// Create an empty tree. Without a file the pages live in memory.
    pub fn create(
        dimensionality: usize,
        file: Option<&Path>,
        page_size: usize,
        cache_size: usize,
    ) -> SpatialResult<Self> {
        let config = TreeConfig::default()
            .page_size(page_size)
            .cache_size(cache_size);
        Self::create_with_config(dimensionality, file, &config)
    }

    /// Create an empty tree with full control over the configuration.
    ///
    /// A hierarchical tree starts as a single empty leaf (height 1); a flat
    /// tree starts as a root directory over one empty leaf (height 2).
    pub fn create_with_config(
        dimensionality: usize,
        file: Option<&Path>,
        config: &TreeConfig,
    ) -> SpatialResult<Self> {
        let mut tree = Self::allocate(dimensionality, file, config)?;
        match tree.header.shape {
            TreeShape::Hierarchical => {
                tree.write_node(&Node::new(ROOT_PAGE_ID, NodeKind::Leaf))?;
                tree.height = LEAF_LEVEL;
            }
            TreeShape::Flat => {
                let mut leaf = Node::new(tree.file.allocate_id(), NodeKind::Leaf);
                leaf.parent = Some(ROOT_PAGE_ID);
                let root = Node::with_entries(
                    ROOT_PAGE_ID,
                    NodeKind::Directory,
                    vec![leaf.to_directory_entry(dimensionality)],
                );
                tree.write_node(&leaf)?;
                tree.write_node(&root)?;
                tree.height = LEAF_LEVEL + 1;
            }
        }
        Ok(tree)
    }

    /// Create a tree and bulk load `points` bottom-up.
    pub fn bulk_create<V: IndexedVector>(
        points: &[V],
        file: Option<&Path>,
        page_size: usize,
        cache_size: usize,
        strategy: BulkSplitStrategy,
    ) -> SpatialResult<Self> {
        let config = TreeConfig::default()
            .page_size(page_size)
            .cache_size(cache_size)
            .bulk_strategy(strategy);
        Self::bulk_create_with_config(points, file, &config)
    }

    /// Bulk load with full control over the configuration. The
    /// dimensionality is taken from the first point.
    pub fn bulk_create_with_config<V: IndexedVector>(
        points: &[V],
        file: Option<&Path>,
        config: &TreeConfig,
    ) -> SpatialResult<Self> {
        let first = points.first().ok_or_else(|| {
            SpatialError::InvalidArgument("bulk loading needs at least one point".into())
        })?;
        let dimensionality = first.dimensionality();
        let entries = points
            .iter()
            .map(|p| {
                check_point(dimensionality, p)?;
                Ok(Entry::leaf(p.object_id(), p.coordinates()))
            })
            .collect::<SpatialResult<Vec<_>>>()?;

        let mut tree = Self::allocate(dimensionality, file, config)?;
        tree.bulk_load(entries, config.bulk_strategy)?;
        tree.header.entry_count = points.len() as u64;
        log::info!(
            "bulk loaded {} points with {:?}, height {}",
            points.len(),
            config.bulk_strategy,
            tree.height
        );
        Ok(tree)
    }

    /// Open a persisted tree. Only the pages on the path from the root to
    /// the first leaf are read, to recompute the height.
    pub fn open(path: impl AsRef<Path>, cache_size: usize) -> SpatialResult<Self> {
        let config = TreeConfig::default().cache_size(cache_size);
        Self::open_with_config(path, &config)
    }

    /// Open a persisted tree using the cache size and reinsertion settings of
    /// `config`; the stored page size, capacities and shape always win.
    pub fn open_with_config(path: impl AsRef<Path>, config: &TreeConfig) -> SpatialResult<Self> {
        config.validate()?;
        let (file, header) = PersistentPageFile::open(path.as_ref(), config.cache_size)?;
        let height = compute_height(&file)?;
        let tree = Self {
            file: Box::new(file),
            header,
            height,
            reinsert_fraction: config.reinsert_fraction,
            counters: OperationCounters::default(),
            closed: false,
        };
        log::debug!(
            "opened {} with {} entries, height {}",
            path.as_ref().display(),
            tree.header.entry_count,
            tree.height
        );
        Ok(tree)
    }

    fn allocate(
        dimensionality: usize,
        file: Option<&Path>,
        config: &TreeConfig,
    ) -> SpatialResult<Self> {
        config.validate()?;
        let capacities = config.capacities(dimensionality)?;
        let page_file: Box<dyn PageFile> = match file {
            Some(path) => Box::new(PersistentPageFile::create(path, config.cache_size)?),
            None => Box::new(MemoryPageFile::new(config.cache_size)),
        };
        let root = page_file.allocate_id();
        if root != ROOT_PAGE_ID {
            return Err(SpatialError::InvalidOperation(format!(
                "fresh page file handed out page {} for the root",
                root
            )));
        }
        log::debug!(
            "creating {:?} tree: dimensionality {}, page size {}, {:?}",
            config.shape,
            dimensionality,
            config.page_size,
            capacities
        );

        Ok(Self {
            file: page_file,
            header: TreeHeader {
                dimensionality,
                page_size: config.page_size,
                capacities,
                shape: config.shape,
                entry_count: 0,
            },
            height: LEAF_LEVEL,
            reinsert_fraction: config.reinsert_fraction,
            counters: OperationCounters::default(),
            closed: false,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Check if tree is closed
    pub(crate) fn check_closed(&self) -> SpatialResult<()> {
        if self.closed {
            Err(SpatialError::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn check_dimensionality(&self, actual: usize) -> SpatialResult<()> {
        if actual != self.header.dimensionality {
            return Err(SpatialError::DimensionMismatch {
                expected: self.header.dimensionality,
                actual,
            });
        }
        Ok(())
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of indexed points
    pub fn len(&self) -> u64 {
        self.header.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.header.entry_count == 0
    }

    pub fn dimensionality(&self) -> usize {
        self.header.dimensionality
    }

    pub fn capacities(&self) -> Capacities {
        self.header.capacities
    }

    pub fn shape(&self) -> TreeShape {
        self.header.shape
    }

    pub fn page_size(&self) -> usize {
        self.header.page_size
    }

    /// Physical page accesses since creation or the last reset
    pub fn io_access_count(&self) -> u64 {
        self.file.io_access()
    }

    pub fn reset_io_access_count(&self) {
        self.file.reset_io_access();
    }

    pub fn page_file_stats(&self) -> PageFileStats {
        self.file.stats()
    }

    /// Write all dirty pages and the header to the page file.
    pub fn flush(&self) -> SpatialResult<()> {
        self.check_closed()?;
        self.file.flush(&self.header)
    }

    /// Flush and close. Every later operation fails with
    /// [`SpatialError::Closed`]; closing twice is a no-op.
    pub fn close(&mut self) -> SpatialResult<()> {
        if self.closed {
            return Ok(());
        }
        self.file.close(&self.header)?;
        self.closed = true;
        log::debug!("closed tree with {} entries", self.header.entry_count);
        Ok(())
    }

    // ========================================================================
    // Page access
    // ========================================================================

    pub(crate) fn read_node(&self, page_id: PageId) -> SpatialResult<Node> {
        self.file.read_page(page_id)
    }

    fn write_node(&self, node: &Node) -> SpatialResult<()> {
        self.file.write_page(node)
    }

    /// Point a child page back at its parent slot.
    fn set_back_reference(&self, child: PageId, parent: PageId, index: usize) -> SpatialResult<()> {
        let mut node = self.read_node(child)?;
        if node.parent != Some(parent) || node.index != index {
            node.parent = Some(parent);
            node.index = index;
            self.write_node(&node)?;
        }
        Ok(())
    }

    /// Rewrite the back-references of all children of a directory node after
    /// its entry order changed.
    fn relink_children(&self, node: &Node) -> SpatialResult<()> {
        if node.is_leaf() {
            return Ok(());
        }
        for (index, entry) in node.entries.iter().enumerate() {
            if let Some(child) = entry.child() {
                self.set_back_reference(child, node.id, index)?;
            }
        }
        Ok(())
    }

    fn is_flat_root(&self, node: &Node) -> bool {
        self.header.shape == TreeShape::Flat && node.id == ROOT_PAGE_ID
    }

    fn has_overflow(&self, node: &Node) -> bool {
        !self.is_flat_root(node) && node.len() >= self.header.capacities.capacity(node.kind)
    }

    fn has_underflow(&self, node: &Node) -> bool {
        node.len() < self.header.capacities.minimum(node.kind)
    }

    fn reinsert_count(&self, len: usize) -> usize {
        (len as f64 * self.reinsert_fraction) as usize
    }

    // ========================================================================
    // Insertion
    // ========================================================================

    /// Insert a point.
    pub fn insert<V: IndexedVector + ?Sized>(&mut self, object: &V) -> SpatialResult<()> {
        self.check_closed()?;
        check_point(self.header.dimensionality, object)?;
        let entry = Entry::leaf(object.object_id(), object.coordinates());
        let mut context = ReinsertContext::default();
        self.insert_entry(entry, LEAF_LEVEL, &mut context)?;
        self.header.entry_count += 1;
        Ok(())
    }

    /// Insert an entry into a node at `level` and repair the path above it.
    pub(crate) fn insert_entry(
        &mut self,
        entry: Entry,
        level: usize,
        context: &mut ReinsertContext,
    ) -> SpatialResult<()> {
        let mut node = self.choose_subtree(&entry, level)?;
        if let Some(child) = entry.child() {
            self.set_back_reference(child, node.id, node.len())?;
        }
        node.entries.push(entry);
        self.write_node(&node)?;
        self.adjust_tree(node, level, context)
    }

    /// Descend from the root to the node at `target_level` best suited to
    /// take `entry`.
    fn choose_subtree(&self, entry: &Entry, target_level: usize) -> SpatialResult<Node> {
        let mut node = self.read_node(ROOT_PAGE_ID)?;
        let mut level = self.height;
        while level > target_level {
            let index = if level - 1 == target_level {
                least_overlap_enlargement(&node.entries, entry)
            } else {
                least_volume_enlargement(&node.entries, entry)
            }
            .ok_or_else(|| SpatialError::Corrupted(format!("directory page {} is empty", node.id)))?;
            let child = node.entries[index].child().ok_or_else(|| {
                SpatialError::Corrupted(format!("page {} at level {} holds points", node.id, level))
            })?;
            node = self.read_node(child)?;
            level -= 1;
        }
        if level != target_level {
            return Err(SpatialError::InvalidOperation(format!(
                "cannot insert at level {} of a tree of height {}",
                target_level, self.height
            )));
        }
        Ok(node)
    }

    /// Walk up from a node that just received an entry, treating overflows
    /// and refreshing bounding boxes.
    fn adjust_tree(
        &mut self,
        mut node: Node,
        mut level: usize,
        context: &mut ReinsertContext,
    ) -> SpatialResult<()> {
        let dimensionality = self.header.dimensionality;
        loop {
            if !self.has_overflow(&node) {
                return self.propagate_mbr(node);
            }

            if node.id != ROOT_PAGE_ID
                && context.may_reinsert(level)
                && self.reinsert_count(node.len()) > 0
            {
                context.mark(level, LevelState::Reinserted);
                return self.reinsert(node, level, context);
            }

            context.mark(level, LevelState::Split);
            let (kept, mut sibling) = self.split(node)?;
            let Some(parent_id) = kept.parent else {
                return self.grow_root(kept, sibling);
            };

            let mut parent = self.read_node(parent_id)?;
            let slot = parent
                .entries
                .get_mut(kept.index)
                .ok_or_else(|| broken_back_reference(&kept))?;
            *slot = kept.to_directory_entry(dimensionality);

            sibling.parent = Some(parent_id);
            sibling.index = parent.len();
            parent.entries.push(sibling.to_directory_entry(dimensionality));
            self.write_node(&sibling)?;
            self.write_node(&parent)?;

            node = parent;
            level += 1;
        }
    }

    /// Refresh the parent slots above `node` until one is already current.
    fn propagate_mbr(&self, mut node: Node) -> SpatialResult<()> {
        let dimensionality = self.header.dimensionality;
        while let Some(parent_id) = node.parent {
            let mut parent = self.read_node(parent_id)?;
            let fresh = node.to_directory_entry(dimensionality);
            let slot = parent
                .entries
                .get_mut(node.index)
                .ok_or_else(|| broken_back_reference(&node))?;
            if *slot == fresh {
                return Ok(());
            }
            *slot = fresh;
            self.write_node(&parent)?;
            node = parent;
        }
        Ok(())
    }

    /// Forced reinsertion: take the entries farthest from the node center
    /// out and insert them again from the top.
    fn reinsert(&mut self, mut node: Node, level: usize, context: &mut ReinsertContext) -> SpatialResult<()> {
        let count = self.reinsert_count(node.len());
        let center = node.compute_mbr(self.header.dimensionality).center();

        let mut ranked: Vec<(f64, Entry)> = std::mem::take(&mut node.entries)
            .into_iter()
            .map(|e| (center_distance(&e, &center), e))
            .collect();
        // Stable: equally distant entries keep their order
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        let kept = ranked.split_off(count);
        node.entries = kept.into_iter().map(|(_, e)| e).collect();

        log::trace!(
            "reinserting {} of {} entries of page {} at level {}",
            count,
            count + node.len(),
            node.id,
            level
        );
        self.counters.reinsertions += 1;

        self.write_node(&node)?;
        self.relink_children(&node)?;
        self.propagate_mbr(node)?;

        for (_, entry) in ranked {
            self.insert_entry(entry, level, context)?;
        }
        Ok(())
    }

    /// Topological split. The node keeps the first group; the second group
    /// goes to a new page, returned unwritten with no slot in the parent yet.
    fn split(&mut self, mut node: Node) -> SpatialResult<(Node, Node)> {
        let minimum = self.header.capacities.minimum(node.kind);
        let entries = std::mem::take(&mut node.entries);
        let total = entries.len();
        let (kept, moved) = split_entries(entries, minimum).ok_or_else(|| {
            SpatialError::InvalidOperation(format!(
                "page {} with {} entries cannot be split into halves of {}",
                node.id, total, minimum
            ))
        })?;
        node.entries = kept;

        let mut sibling = Node::with_entries(self.file.allocate_id(), node.kind, moved);
        sibling.parent = node.parent;

        log::trace!(
            "split page {} ({} entries) into {} + {} (new page {})",
            node.id,
            total,
            node.len(),
            sibling.len(),
            sibling.id
        );
        self.counters.splits += 1;

        self.write_node(&node)?;
        self.relink_children(&node)?;
        self.relink_children(&sibling)?;
        Ok((node, sibling))
    }

    /// The root split: move its first half to a fresh page and make the
    /// root a directory over both halves.
    fn grow_root(&mut self, mut old_root: Node, mut sibling: Node) -> SpatialResult<()> {
        let dimensionality = self.header.dimensionality;
        old_root.id = self.file.allocate_id();
        old_root.parent = Some(ROOT_PAGE_ID);
        old_root.index = 0;
        sibling.parent = Some(ROOT_PAGE_ID);
        sibling.index = 1;

        self.write_node(&old_root)?;
        self.relink_children(&old_root)?;
        self.write_node(&sibling)?;

        let root = Node::with_entries(
            ROOT_PAGE_ID,
            NodeKind::Directory,
            vec![
                old_root.to_directory_entry(dimensionality),
                sibling.to_directory_entry(dimensionality),
            ],
        );
        self.write_node(&root)?;
        self.height += 1;
        log::debug!("root split, height is now {}", self.height);
        Ok(())
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    /// Delete a point, matched by id and exact coordinates. Returns false if
    /// the point is not in the tree.
    pub fn delete<V: IndexedVector + ?Sized>(&mut self, object: &V) -> SpatialResult<bool> {
        self.check_closed()?;
        check_point(self.header.dimensionality, object)?;
        let values = object.coordinates();
        let Some((mut leaf, index)) = self.find_leaf(ROOT_PAGE_ID, &values, object.object_id())? else {
            return Ok(false);
        };

        leaf.entries.remove(index);
        self.write_node(&leaf)?;
        self.header.entry_count = self.header.entry_count.saturating_sub(1);
        self.condense_tree(leaf)?;
        Ok(true)
    }

    /// Depth-first search for the leaf holding the exact (point, id) pair.
    fn find_leaf(&self, page_id: PageId, values: &[f64], id: ObjectId) -> SpatialResult<Option<(Node, usize)>> {
        let node = self.read_node(page_id)?;
        if node.is_leaf() {
            let position = node.entries.iter().position(|e| match e {
                Entry::Leaf { id: eid, values: v } => *eid == id && v.as_slice() == values,
                Entry::Directory { .. } => false,
            });
            return Ok(position.map(|index| (node, index)));
        }

        for entry in &node.entries {
            if let Entry::Directory { child, mbr } = entry {
                if mbr.contains(values) {
                    if let Some(found) = self.find_leaf(*child, values, id)? {
                        return Ok(Some(found));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Detach underflowing nodes on the path from `node` to the root, shrink
    /// the root and reinsert the contents of the detached nodes.
    fn condense_tree(&mut self, mut node: Node) -> SpatialResult<()> {
        let dimensionality = self.header.dimensionality;
        let mut detached = Vec::new();

        while let Some(parent_id) = node.parent {
            let mut parent = self.read_node(parent_id)?;
            let last_flat_leaf = self.is_flat_root(&parent) && parent.len() == 1;

            if self.has_underflow(&node) && !last_flat_leaf {
                if node.index >= parent.len() {
                    return Err(broken_back_reference(&node));
                }
                parent.entries.remove(node.index);
                self.write_node(&parent)?;
                self.relink_children(&parent)?;
                log::trace!("detached underflowing page {} from {}", node.id, parent_id);
                detached.push(node);
            } else {
                let fresh = node.to_directory_entry(dimensionality);
                let slot = parent
                    .entries
                    .get_mut(node.index)
                    .ok_or_else(|| broken_back_reference(&node))?;
                if *slot != fresh {
                    *slot = fresh;
                    self.write_node(&parent)?;
                }
            }
            node = parent;
        }

        self.shrink_root(node)?;

        while let Some(node) = detached.pop() {
            self.file.delete_page(node.id)?;
            match node.kind {
                NodeKind::Directory => {
                    for entry in &node.entries {
                        if let Some(child) = entry.child() {
                            detached.push(self.read_node(child)?);
                        }
                    }
                }
                NodeKind::Leaf => {
                    for entry in node.entries {
                        let mut context = ReinsertContext::default();
                        self.insert_entry(entry, LEAF_LEVEL, &mut context)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Collapse a hierarchical root directory with a single child into that
    /// child, repeatedly. An emptied root directory becomes an empty leaf.
    fn shrink_root(&mut self, mut root: Node) -> SpatialResult<()> {
        if self.header.shape == TreeShape::Flat {
            return Ok(());
        }
        while !root.is_leaf() {
            match root.len() {
                0 => {
                    root = Node::new(ROOT_PAGE_ID, NodeKind::Leaf);
                    self.write_node(&root)?;
                    self.height = LEAF_LEVEL;
                    log::debug!("root emptied, height is now {}", self.height);
                }
                1 => {
                    let child_id = root.entries[0]
                        .child()
                        .ok_or_else(|| SpatialError::Corrupted("root directory holds a point".into()))?;
                    let mut child = self.read_node(child_id)?;
                    self.file.delete_page(child_id)?;
                    child.id = ROOT_PAGE_ID;
                    child.parent = None;
                    child.index = 0;
                    self.write_node(&child)?;
                    self.relink_children(&child)?;
                    self.height -= 1;
                    log::debug!("root collapsed into page {}, height is now {}", child_id, self.height);
                    root = child;
                }
                _ => break,
            }
        }
        Ok(())
    }

    // ========================================================================
    // Bulk loading
    // ========================================================================

    /// Build the tree bottom-up from `entries`; the root page must be free.
    fn bulk_load(&mut self, entries: Vec<Entry>, strategy: BulkSplitStrategy) -> SpatialResult<()> {
        let caps = self.header.capacities;
        let leaf_max = caps.maximum(NodeKind::Leaf);
        let flat = self.header.shape == TreeShape::Flat;

        if !flat && entries.len() <= leaf_max {
            self.write_node(&Node::with_entries(ROOT_PAGE_ID, NodeKind::Leaf, entries))?;
            self.height = LEAF_LEVEL;
            return Ok(());
        }

        let groups = if entries.len() <= leaf_max {
            vec![entries]
        } else {
            partition(entries, caps.leaf_minimum, leaf_max, strategy)?
        };
        let mut level_nodes: Vec<Node> = groups
            .into_iter()
            .map(|group| Node::with_entries(self.file.allocate_id(), NodeKind::Leaf, group))
            .collect();
        let mut height = LEAF_LEVEL;
        log::debug!("bulk load: {} leaves", level_nodes.len());

        let dir_max = caps.maximum(NodeKind::Directory);
        while !flat && level_nodes.len() > dir_max {
            let entries = self.directory_entries(&level_nodes);
            let mut children = index_by_id(level_nodes);
            let groups = partition(entries, caps.dir_minimum, dir_max, strategy)?;

            let mut parents = Vec::with_capacity(groups.len());
            for group in groups {
                let parent = Node::with_entries(self.file.allocate_id(), NodeKind::Directory, group);
                self.attach_children(&parent, &mut children)?;
                parents.push(parent);
            }
            level_nodes = parents;
            height += 1;
            log::debug!("bulk load: {} directory nodes at level {}", level_nodes.len(), height);
        }

        let root = Node::with_entries(
            ROOT_PAGE_ID,
            NodeKind::Directory,
            self.directory_entries(&level_nodes),
        );
        let mut children = index_by_id(level_nodes);
        self.attach_children(&root, &mut children)?;
        self.write_node(&root)?;
        self.height = height + 1;
        Ok(())
    }

    fn directory_entries(&self, nodes: &[Node]) -> Vec<Entry> {
        nodes
            .iter()
            .map(|n| n.to_directory_entry(self.header.dimensionality))
            .collect()
    }

    /// Set the back-references of freshly built children and write them.
    fn attach_children(&self, parent: &Node, children: &mut HashMap<PageId, Node>) -> SpatialResult<()> {
        for (index, entry) in parent.entries.iter().enumerate() {
            let child_id = entry
                .child()
                .ok_or_else(|| SpatialError::Corrupted("directory entry without child".into()))?;
            let mut child = children
                .remove(&child_id)
                .ok_or(SpatialError::PageNotFound(child_id))?;
            child.parent = Some(parent.id);
            child.index = index;
            self.write_node(&child)?;
        }
        Ok(())
    }
}

impl Drop for RStarTree {
    fn drop(&mut self) {
        // Best effort flush on drop
        if !self.closed {
            if let Err(e) = self.file.close(&self.header) {
                log::warn!("failed to flush tree on drop: {}", e);
            }
        }
    }
}

/// Height of a stored tree, found by walking from the root to the first leaf.
fn compute_height(file: &dyn PageFile) -> SpatialResult<usize> {
    let mut node = file.read_page(ROOT_PAGE_ID)?;
    let mut height = LEAF_LEVEL;
    while !node.is_leaf() {
        let child = node
            .entries
            .first()
            .and_then(Entry::child)
            .ok_or_else(|| SpatialError::Corrupted(format!("directory page {} is empty", node.id)))?;
        node = file.read_page(child)?;
        height += 1;
    }
    Ok(height)
}

fn index_by_id(nodes: Vec<Node>) -> HashMap<PageId, Node> {
    nodes.into_iter().map(|n| (n.id, n)).collect()
}

fn broken_back_reference(node: &Node) -> SpatialError {
    SpatialError::Corrupted(format!(
        "page {} claims slot {} of parent {:?}",
        node.id, node.index, node.parent
    ))
}

/// Validate the dimensionality and coordinates of a point.
fn check_point<V: SpatialVector + ?Sized>(dimensionality: usize, object: &V) -> SpatialResult<()> {
    if object.dimensionality() != dimensionality {
        return Err(SpatialError::DimensionMismatch {
            expected: dimensionality,
            actual: object.dimensionality(),
        });
    }
    if (0..dimensionality).any(|d| !object.min(d).is_finite() || !object.max(d).is_finite()) {
        return Err(SpatialError::InvalidArgument(
            "coordinates must be finite numbers".into(),
        ));
    }
    Ok(())
}

/// Euclidean distance between the center of an entry and a point.
fn center_distance(entry: &Entry, center: &[f64]) -> f64 {
    center
        .iter()
        .enumerate()
        .map(|(d, c)| {
            let diff = entry.center(d) - c;
            diff * diff
        })
        .sum::<f64>()
        .sqrt()
}

/// Child needing the least volume enlargement; ties by volume, then page id.
fn least_volume_enlargement(entries: &[Entry], new: &Entry) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let mbr = e.mbr();
            (i, mbr.enlargement(new), mbr.volume(), e.child())
        })
        .min_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then(a.2.total_cmp(&b.2))
                .then(a.3.cmp(&b.3))
        })
        .map(|(i, ..)| i)
}

/// Child whose enlargement adds the least overlap with its siblings; ties by
/// volume enlargement, volume, then page id.
fn least_overlap_enlargement(entries: &[Entry], new: &Entry) -> Option<usize> {
    let boxes: Vec<Mbr> = entries.iter().map(Entry::mbr).collect();
    (0..boxes.len())
        .map(|i| {
            let enlarged = {
                let mut b = boxes[i].clone();
                b.extend(new);
                b
            };
            let overlap_delta: f64 = boxes
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, other)| enlarged.overlap(other) - boxes[i].overlap(other))
                .sum();
            (
                i,
                overlap_delta,
                enlarged.volume() - boxes[i].volume(),
                boxes[i].volume(),
                entries[i].child(),
            )
        })
        .min_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then(a.2.total_cmp(&b.2))
                .then(a.3.total_cmp(&b.3))
                .then(a.4.cmp(&b.4))
        })
        .map(|(i, ..)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::Point;
    use tempfile::tempdir;

    fn small_config(leaf: usize, dir: usize) -> TreeConfig {
        TreeConfig::default().leaf_capacity(leaf).dir_capacity(dir)
    }

    fn memory_tree(leaf: usize, dir: usize) -> RStarTree {
        RStarTree::create_with_config(2, None, &small_config(leaf, dir)).unwrap()
    }

    fn unit_square() -> Vec<Point> {
        vec![
            Point::new(1, vec![0.0, 0.0]),
            Point::new(2, vec![1.0, 0.0]),
            Point::new(3, vec![0.0, 1.0]),
            Point::new(4, vec![1.0, 1.0]),
        ]
    }

    fn leaf_count(tree: &RStarTree) -> usize {
        tree.leaf_entries().unwrap().len()
    }

    #[test]
    fn test_create_empty_tree() {
        let tree = RStarTree::create(2, None, 4096, 16).unwrap();
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.len(), 0);
        assert!(tree.is_empty());
        assert_eq!(tree.dimensionality(), 2);
        assert_eq!(tree.capacities().leaf_capacity, 204);
    }

    #[test]
    fn test_create_rejects_tiny_pages() {
        assert!(matches!(
            RStarTree::create(2, None, 30, 16),
            Err(SpatialError::InvalidCapacity { .. })
        ));
    }

    #[test]
    fn test_insert_rejects_bad_points() {
        let mut tree = memory_tree(5, 5);
        assert!(matches!(
            tree.insert(&Point::new(1, vec![1.0])),
            Err(SpatialError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            tree.insert(&Point::new(1, vec![f64::NAN, 0.0])),
            Err(SpatialError::InvalidArgument(_))
        ));
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn test_root_split_on_overflow() {
        // Capacity 4: a leaf overflows when it reaches 4 entries
        let mut tree = memory_tree(4, 4);
        let points = unit_square();
        for p in &points[..3] {
            tree.insert(p).unwrap();
        }
        assert_eq!(tree.height(), 1);

        tree.insert(&points[3]).unwrap();
        assert_eq!(tree.height(), 2);
        assert_eq!(tree.counters.splits, 1);
        assert_eq!(leaf_count(&tree), 2);

        tree.insert(&Point::new(5, vec![0.5, 0.5])).unwrap();
        assert_eq!(tree.height(), 2);
        assert_eq!(tree.counters.splits, 1);
        assert!(tree.check_integrity().unwrap().is_valid);
    }

    #[test]
    fn test_fifth_insertion_splits_with_capacity_five() {
        let mut tree = memory_tree(5, 5);
        for p in unit_square() {
            tree.insert(&p).unwrap();
        }
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.counters.splits, 0);

        tree.insert(&Point::new(5, vec![0.5, 0.5])).unwrap();
        assert_eq!(tree.height(), 2);
        assert_eq!(tree.counters.splits, 1);
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn test_delete_collapses_root() {
        let mut tree = memory_tree(5, 5);
        let mut points = unit_square();
        points.push(Point::new(5, vec![0.5, 0.5]));
        for p in &points {
            tree.insert(p).unwrap();
        }
        assert_eq!(tree.height(), 2);

        // (0, 0) shares a two-point leaf with (0, 1); removing it underflows
        assert!(tree.delete(&points[0]).unwrap());
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.len(), 4);
        for p in &points[1..] {
            let found = tree.intersecting(&Mbr::point(&p.values)).unwrap();
            assert_eq!(found, vec![p.id]);
        }
        assert!(tree.check_integrity().unwrap().is_valid);
    }

    #[test]
    fn test_delete_missing_point() {
        let mut tree = memory_tree(5, 5);
        tree.insert(&Point::new(1, vec![1.0, 1.0])).unwrap();
        assert!(!tree.delete(&Point::new(2, vec![1.0, 1.0])).unwrap());
        assert!(!tree.delete(&Point::new(1, vec![1.0, 2.0])).unwrap());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_insert_then_delete_restores_empty_tree() {
        let mut tree = memory_tree(5, 5);
        let p = Point::new(42, vec![3.0, -7.5]);
        tree.insert(&p).unwrap();
        assert!(tree.delete(&p).unwrap());
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.read_node(ROOT_PAGE_ID).unwrap(), Node::new(ROOT_PAGE_ID, NodeKind::Leaf));
    }

    #[test]
    fn test_forced_reinsertion_happens_before_split() {
        let mut tree = memory_tree(8, 8);
        for i in 0..40u64 {
            tree.insert(&Point::new(i, vec![(i % 7) as f64, (i / 7) as f64])).unwrap();
        }
        assert!(tree.counters.reinsertions > 0);
        assert!(tree.counters.splits > 0);
        let report = tree.check_integrity().unwrap();
        assert!(report.is_valid, "{:?}", report.errors);
        assert_eq!(report.objects_found, 40);
    }

    #[test]
    fn test_without_reinsertion_only_splits() {
        let config = small_config(8, 8).reinsert_fraction(0.0);
        let mut tree = RStarTree::create_with_config(2, None, &config).unwrap();
        for i in 0..40u64 {
            tree.insert(&Point::new(i, vec![i as f64, (i * 3 % 11) as f64])).unwrap();
        }
        assert_eq!(tree.counters.reinsertions, 0);
        assert!(tree.check_integrity().unwrap().is_valid);
    }

    #[test]
    fn test_many_inserts_and_deletes_keep_invariants() {
        let mut tree = memory_tree(6, 5);
        let points: Vec<Point> = (0..300u64)
            .map(|i| Point::new(i, vec![((i * 37) % 101) as f64, ((i * 59) % 97) as f64]))
            .collect();
        for p in &points {
            tree.insert(p).unwrap();
        }
        assert!(tree.height() >= 3);
        assert!(tree.check_integrity().unwrap().is_valid);

        for p in points.iter().filter(|p| p.id % 3 != 0) {
            assert!(tree.delete(p).unwrap(), "point {} not found", p.id);
        }
        assert_eq!(tree.len(), 100);
        let report = tree.check_integrity().unwrap();
        assert!(report.is_valid, "{:?}", report.errors);
        assert_eq!(report.objects_found, 100);

        for p in points.iter().filter(|p| p.id % 3 == 0) {
            assert!(tree.delete(p).unwrap());
        }
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 1);
    }

    #[test]
    fn test_duplicate_points_are_kept_apart() {
        let mut tree = memory_tree(4, 4);
        for id in 0..10u64 {
            tree.insert(&Point::new(id, vec![2.0, 2.0])).unwrap();
        }
        assert_eq!(tree.len(), 10);
        assert!(tree.check_integrity().unwrap().is_valid);
        assert!(tree.delete(&Point::new(7, vec![2.0, 2.0])).unwrap());
        let mut found = tree.intersecting(&Mbr::point(&[2.0, 2.0])).unwrap();
        found.sort_unstable();
        assert_eq!(found, vec![0, 1, 2, 3, 4, 5, 6, 8, 9]);
    }

    #[test]
    fn test_flat_tree_keeps_height_two() {
        let config = small_config(5, 5).shape(TreeShape::Flat);
        let mut tree = RStarTree::create_with_config(2, None, &config).unwrap();
        assert_eq!(tree.height(), 2);

        let points: Vec<Point> = (0..60u64)
            .map(|i| Point::new(i, vec![(i % 8) as f64, (i / 8) as f64]))
            .collect();
        for p in &points {
            tree.insert(p).unwrap();
        }
        assert_eq!(tree.height(), 2);
        assert!(leaf_count(&tree) > 4);
        let report = tree.check_integrity().unwrap();
        assert!(report.is_valid, "{:?}", report.errors);

        for p in &points {
            assert!(tree.delete(p).unwrap());
        }
        assert_eq!(tree.height(), 2);
        assert_eq!(leaf_count(&tree), 1);
        assert!(tree.check_integrity().unwrap().is_valid);
    }

    #[test]
    fn test_bulk_create_small_input_is_single_leaf() {
        let tree = RStarTree::bulk_create(&unit_square(), None, 4096, 16, BulkSplitStrategy::ZCurve).unwrap();
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_bulk_create_requires_points() {
        let points: Vec<Point> = Vec::new();
        assert!(matches!(
            RStarTree::bulk_create(&points, None, 4096, 16, BulkSplitStrategy::MaxExtension),
            Err(SpatialError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_bulk_create_rejects_mixed_dimensionality() {
        let points = vec![Point::new(1, vec![0.0, 0.0]), Point::new(2, vec![1.0])];
        assert!(matches!(
            RStarTree::bulk_create(&points, None, 4096, 16, BulkSplitStrategy::MaxExtension),
            Err(SpatialError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_bulk_tree_accepts_updates() {
        let points: Vec<Point> = (0..200u64)
            .map(|i| Point::new(i, vec![(i % 20) as f64, (i / 20) as f64]))
            .collect();
        let mut tree =
            RStarTree::bulk_create_with_config(&points, None, &small_config(10, 10)).unwrap();
        assert!(tree.check_integrity().unwrap().is_valid);

        tree.insert(&Point::new(1000, vec![5.5, 5.5])).unwrap();
        assert!(tree.delete(&points[17]).unwrap());
        assert_eq!(tree.len(), 200);
        let report = tree.check_integrity().unwrap();
        assert!(report.is_valid, "{:?}", report.errors);
    }

    #[test]
    fn test_persistence_across_close_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.rstar");
        let points: Vec<Point> = (0..120u64)
            .map(|i| Point::new(i, vec![(i % 11) as f64, (i / 11) as f64]))
            .collect();
        let height = {
            let mut tree = RStarTree::create_with_config(2, Some(path.as_path()), &small_config(6, 6)).unwrap();
            for p in &points {
                tree.insert(p).unwrap();
            }
            tree.close().unwrap();
            tree.height()
        };

        let mut tree = RStarTree::open(&path, 8).unwrap();
        assert_eq!(tree.height(), height);
        assert_eq!(tree.len(), 120);
        assert_eq!(tree.capacities().leaf_capacity, 6);
        assert!(tree.check_integrity().unwrap().is_valid);
        assert!(tree.delete(&points[3]).unwrap());
        assert_eq!(tree.len(), 119);
    }

    #[test]
    fn test_drop_flushes_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.rstar");
        {
            let mut tree = RStarTree::create(3, Some(path.as_path()), 512, 4).unwrap();
            for i in 0..50u64 {
                tree.insert(&Point::new(i, vec![i as f64, 0.0, -(i as f64)])).unwrap();
            }
        }
        let tree = RStarTree::open(&path, 4).unwrap();
        assert_eq!(tree.len(), 50);
        assert_eq!(tree.dimensionality(), 3);
    }

    #[test]
    fn test_closed_tree_errors() {
        let mut tree = memory_tree(5, 5);
        tree.close().unwrap();
        assert!(matches!(
            tree.insert(&Point::new(1, vec![0.0, 0.0])),
            Err(SpatialError::Closed)
        ));
        assert!(matches!(tree.flush(), Err(SpatialError::Closed)));
        assert!(tree.close().is_ok());
    }

    #[test]
    fn test_least_volume_enlargement_ties() {
        let a = Entry::directory(7, Mbr::new(vec![0.0, 0.0], vec![2.0, 2.0]).unwrap());
        let b = Entry::directory(3, Mbr::new(vec![0.0, 0.0], vec![2.0, 2.0]).unwrap());
        let c = Entry::directory(1, Mbr::new(vec![5.0, 5.0], vec![9.0, 9.0]).unwrap());
        let new = Entry::leaf(0, vec![1.0, 1.0]);
        // a and b contain the point with equal volume; lower page id wins
        assert_eq!(least_volume_enlargement(&[a, b, c], &new), Some(1));
    }

    #[test]
    fn test_least_overlap_enlargement_avoids_overlap() {
        let left = Entry::directory(1, Mbr::new(vec![0.0, 0.0], vec![2.0, 2.0]).unwrap());
        let right = Entry::directory(2, Mbr::new(vec![3.0, 0.0], vec![5.0, 2.0]).unwrap());
        let top = Entry::directory(3, Mbr::new(vec![0.0, 4.0], vec![5.0, 5.0]).unwrap());
        // Stretching `top` down to the point would cover both lower boxes
        let new = Entry::leaf(0, vec![2.5, 1.0]);
        let chosen = least_overlap_enlargement(&[left, right, top], &new).unwrap();
        assert!(chosen == 0 || chosen == 1);
    }
}
