//! Query processing: best-first range and k-nearest-neighbor search.
//!
//! Both searches pop pages from a priority queue ordered by the smallest
//! possible distance between the query point and the page's bounding box.
//! The range search stops once that distance exceeds the radius, the k-NN
//! search once it exceeds the k-th best distance found so far.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::constants::{LEAF_LEVEL, ROOT_PAGE_ID};
use super::tree_impl::RStarTree;
use super::types::{Entry, ObjectId, PageId, QueryResult, SpatialError, SpatialResult};
use crate::bounding_box::Mbr;
use crate::distance::{DistanceFunction, SpatialDistanceFunction};
use crate::vector::SpatialVector;

/// A page waiting in the queue, keyed by its minimum distance.
///
/// Ordered so that `BinaryHeap` pops the closest page first; equal distances
/// pop the lower page id first.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f64,
    page: PageId,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then(other.page.cmp(&self.page))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Max-heap entry of the k-NN list: the worst neighbor sits on top
#[derive(Debug, Clone, Copy)]
struct Neighbor(QueryResult);

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp_by_distance(&other.0)
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

/// The k best (distance, id) pairs seen so far.
///
/// A candidate replaces the current worst one only if it is strictly better
/// in (distance, id) order, so among equally distant points the smaller ids
/// are kept.
struct KnnList {
    k: usize,
    infinity: f64,
    heap: BinaryHeap<Neighbor>,
}

impl KnnList {
    fn new(k: usize, infinity: f64) -> Self {
        Self {
            k,
            infinity,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    /// Pruning distance: the k-th best distance, infinite until k are known.
    fn threshold(&self) -> f64 {
        if self.heap.len() < self.k {
            return self.infinity;
        }
        self.heap.peek().map_or(self.infinity, |worst| worst.0.distance)
    }

    fn offer(&mut self, distance: f64, id: ObjectId) {
        let candidate = Neighbor(QueryResult::new(id, distance));
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(mut worst) = self.heap.peek_mut() {
            if candidate < *worst {
                *worst = candidate;
            }
        }
    }

    fn into_results(self) -> Vec<QueryResult> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|n| n.0)
            .collect()
    }
}

/// The point-to-box capability of a distance function, or an argument error.
fn spatial_distance(distance: &dyn DistanceFunction) -> SpatialResult<&dyn SpatialDistanceFunction> {
    distance.as_spatial().ok_or_else(|| {
        SpatialError::InvalidArgument(format!(
            "distance function {} cannot bound distances to bounding boxes",
            distance.name()
        ))
    })
}

fn check_k(k: usize) -> SpatialResult<()> {
    if k < 1 {
        return Err(SpatialError::InvalidArgument(format!(
            "k must be at least 1, got {}",
            k
        )));
    }
    Ok(())
}

impl RStarTree {
    /// All points within `radius` of `query`, sorted by distance and then id.
    pub fn range_query<V: SpatialVector + ?Sized>(
        &self,
        query: &V,
        radius: f64,
        distance: &dyn DistanceFunction,
    ) -> SpatialResult<Vec<QueryResult>> {
        self.check_closed()?;
        let spatial = spatial_distance(distance)?;
        self.check_dimensionality(query.dimensionality())?;
        let point = query.coordinates();

        let mut results = Vec::new();
        let mut queue = BinaryHeap::new();
        queue.push(Candidate {
            distance: spatial.null_distance(),
            page: ROOT_PAGE_ID,
        });

        while let Some(Candidate { distance: key, page }) = queue.pop() {
            if key > radius {
                break;
            }
            let node = self.read_node(page)?;
            for entry in &node.entries {
                match entry {
                    Entry::Leaf { id, values } => {
                        let d = spatial.distance(&point, values);
                        if d <= radius {
                            results.push(QueryResult::new(*id, d));
                        }
                    }
                    Entry::Directory { child, mbr } => {
                        let d = spatial.min_dist(mbr, &point);
                        if d <= radius {
                            queue.push(Candidate {
                                distance: d,
                                page: *child,
                            });
                        }
                    }
                }
            }
        }

        results.sort_by(QueryResult::cmp_by_distance);
        log::trace!("range query (radius {}) found {} points", radius, results.len());
        Ok(results)
    }

    /// The `k` points closest to `query`, sorted by distance and then id.
    ///
    /// Fewer than `k` results are returned only when the tree holds fewer
    /// than `k` points. Among equally distant points the smaller ids win.
    ///
    /// # Example
    /// ```rust
    /// use spatial_index::{EuclideanDistance, Point, RStarTree};
    ///
    /// let mut tree = RStarTree::create(2, None, 4096, 64).unwrap();
    /// tree.insert(&Point::new(1, vec![0.0, 0.0])).unwrap();
    /// tree.insert(&Point::new(2, vec![3.0, 0.0])).unwrap();
    /// tree.insert(&Point::new(3, vec![0.0, 4.0])).unwrap();
    ///
    /// let nearest = tree.knn_query(&[0.0, 0.0], 2, &EuclideanDistance).unwrap();
    /// assert_eq!(nearest.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
    /// ```
    pub fn knn_query<V: SpatialVector + ?Sized>(
        &self,
        query: &V,
        k: usize,
        distance: &dyn DistanceFunction,
    ) -> SpatialResult<Vec<QueryResult>> {
        self.check_closed()?;
        check_k(k)?;
        let spatial = spatial_distance(distance)?;
        self.check_dimensionality(query.dimensionality())?;
        let point = query.coordinates();

        let mut knn = KnnList::new(k, spatial.infinite_distance());
        let mut queue = BinaryHeap::new();
        queue.push(Candidate {
            distance: spatial.null_distance(),
            page: ROOT_PAGE_ID,
        });

        while let Some(Candidate { distance: key, page }) = queue.pop() {
            if key > knn.threshold() {
                break;
            }
            let node = self.read_node(page)?;
            for entry in &node.entries {
                match entry {
                    Entry::Leaf { id, values } => {
                        knn.offer(spatial.distance(&point, values), *id);
                    }
                    Entry::Directory { child, mbr } => {
                        let d = spatial.min_dist(mbr, &point);
                        if d <= knn.threshold() {
                            queue.push(Candidate {
                                distance: d,
                                page: *child,
                            });
                        }
                    }
                }
            }
        }

        Ok(knn.into_results())
    }

    /// k-NN for several query points in one depth-first pass over the tree.
    ///
    /// Results are in query order and identical to running
    /// [`knn_query`](Self::knn_query) for each point.
    pub fn bulk_knn_query<V: SpatialVector>(
        &self,
        queries: &[V],
        k: usize,
        distance: &dyn DistanceFunction,
    ) -> SpatialResult<Vec<Vec<QueryResult>>> {
        self.check_closed()?;
        check_k(k)?;
        let spatial = spatial_distance(distance)?;
        for query in queries {
            self.check_dimensionality(query.dimensionality())?;
        }
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let points: Vec<Vec<f64>> = queries.iter().map(SpatialVector::coordinates).collect();
        let mut lists: Vec<KnnList> = queries
            .iter()
            .map(|_| KnnList::new(k, spatial.infinite_distance()))
            .collect();
        self.batch_knn_visit(ROOT_PAGE_ID, &points, &mut lists, spatial)?;
        Ok(lists.into_iter().map(KnnList::into_results).collect())
    }

    fn batch_knn_visit(
        &self,
        page: PageId,
        points: &[Vec<f64>],
        lists: &mut [KnnList],
        spatial: &dyn SpatialDistanceFunction,
    ) -> SpatialResult<()> {
        let node = self.read_node(page)?;
        let mut children = Vec::new();
        for entry in &node.entries {
            match entry {
                Entry::Leaf { id, values } => {
                    for (point, list) in points.iter().zip(lists.iter_mut()) {
                        list.offer(spatial.distance(point, values), *id);
                    }
                }
                Entry::Directory { child, mbr } => {
                    let dists: Vec<f64> = points.iter().map(|p| spatial.min_dist(mbr, p)).collect();
                    let closest = dists.iter().copied().fold(f64::INFINITY, f64::min);
                    children.push((closest, *child, dists));
                }
            }
        }

        // Closest subtrees first, so the thresholds shrink early
        children.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        for (_, child, dists) in children {
            let needed = dists
                .iter()
                .zip(lists.iter())
                .any(|(d, list)| *d <= list.threshold());
            if needed {
                self.batch_knn_visit(child, points, lists, spatial)?;
            }
        }
        Ok(())
    }

    /// Ids of all points inside `region` (boundary included), ascending.
    pub fn intersecting(&self, region: &Mbr) -> SpatialResult<Vec<ObjectId>> {
        self.check_closed()?;
        self.check_dimensionality(region.dimensionality())?;

        let mut found = Vec::new();
        let mut stack = vec![ROOT_PAGE_ID];
        while let Some(page) = stack.pop() {
            let node = self.read_node(page)?;
            for entry in &node.entries {
                match entry {
                    Entry::Leaf { id, values } => {
                        if region.contains(values) {
                            found.push(*id);
                        }
                    }
                    Entry::Directory { child, mbr } => {
                        if mbr.intersects(region) {
                            stack.push(*child);
                        }
                    }
                }
            }
        }
        found.sort_unstable();
        Ok(found)
    }

    /// One directory entry (page id and bounding box) per leaf page, in
    /// depth-first order. A leaf root yields a single entry, with an empty
    /// box when the tree is empty.
    pub fn leaf_entries(&self) -> SpatialResult<Vec<Entry>> {
        self.check_closed()?;
        let root = self.read_node(ROOT_PAGE_ID)?;
        if root.is_leaf() {
            return Ok(vec![root.to_directory_entry(self.header.dimensionality)]);
        }

        let mut leaves = Vec::new();
        let mut stack = vec![(root, self.height)];
        while let Some((node, level)) = stack.pop() {
            if level == LEAF_LEVEL + 1 {
                leaves.extend(node.entries);
                continue;
            }
            for entry in node.entries.iter().rev() {
                if let Some(child) = entry.child() {
                    stack.push((self.read_node(child)?, level - 1));
                }
            }
        }
        Ok(leaves)
    }
}
