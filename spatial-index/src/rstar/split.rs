//! Topological node split of the R*-tree.
//!
//! The split axis is the one whose candidate distributions have the smallest
//! summed perimeter. On that axis the distribution with the least overlap
//! between the two halves wins, ties going to the smaller combined volume.
//! Candidates come from sorting entries by their lower and, separately, by
//! their upper bound; a distribution puts the first `k` sorted entries in one
//! node and the rest in the other, for `k` in `min..=len - min`.

use std::cmp::Ordering;

use crate::bounding_box::Mbr;
use crate::vector::SpatialVector;

/// Which bound the entries were sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBound {
    Lower,
    Upper,
}

/// The chosen distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPlan {
    pub axis: usize,
    pub bound: SortBound,
    /// Number of sorted entries that stay in the first node
    pub split_point: usize,
}

/// Sorted position of every entry along `axis`, ties by the other bound and
/// then by the original position.
fn sorted_order<T: SpatialVector>(entries: &[T], axis: usize, bound: SortBound) -> Vec<usize> {
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by(|&a, &b| {
        let (ea, eb) = (&entries[a], &entries[b]);
        let by_bound = match bound {
            SortBound::Lower => ea
                .min(axis)
                .total_cmp(&eb.min(axis))
                .then(ea.max(axis).total_cmp(&eb.max(axis))),
            SortBound::Upper => ea
                .max(axis)
                .total_cmp(&eb.max(axis))
                .then(ea.min(axis).total_cmp(&eb.min(axis))),
        };
        by_bound.then(a.cmp(&b))
    });
    order
}

/// Bounding boxes of every prefix and suffix of `order`.
///
/// `prefix[k]` covers the first `k + 1` entries, `suffix[k]` covers the
/// entries from position `k` on.
fn running_boxes<T: SpatialVector>(entries: &[T], order: &[usize]) -> (Vec<Mbr>, Vec<Mbr>) {
    let mut prefix = Vec::with_capacity(order.len());
    let mut acc = Mbr::from_vector(&entries[order[0]]);
    for &i in order {
        acc.extend(&entries[i]);
        prefix.push(acc.clone());
    }

    let mut suffix = vec![Mbr::empty(acc.dimensionality()); order.len()];
    let mut acc = Mbr::from_vector(&entries[order[order.len() - 1]]);
    for (pos, &i) in order.iter().enumerate().rev() {
        acc.extend(&entries[i]);
        suffix[pos] = acc.clone();
    }
    (prefix, suffix)
}

/// Choose how to split `entries` into two groups of at least `min_entries`.
///
/// Returns `None` when no valid distribution exists.
pub fn choose_split<T: SpatialVector>(entries: &[T], min_entries: usize) -> Option<SplitPlan> {
    let len = entries.len();
    if len < 2 * min_entries || min_entries == 0 {
        return None;
    }
    let dimensionality = entries[0].dimensionality();

    // Split axis: smallest perimeter sum over all candidate distributions
    let mut best_axis = 0;
    let mut best_margin = f64::INFINITY;
    for axis in 0..dimensionality {
        let mut margin = 0.0;
        for bound in [SortBound::Lower, SortBound::Upper] {
            let order = sorted_order(entries, axis, bound);
            let (prefix, suffix) = running_boxes(entries, &order);
            for k in min_entries..=len - min_entries {
                margin += prefix[k - 1].perimeter() + suffix[k].perimeter();
            }
        }
        if margin < best_margin {
            best_margin = margin;
            best_axis = axis;
        }
    }

    // Split point: least overlap, then least combined volume
    let mut best: Option<(f64, f64, SplitPlan)> = None;
    for bound in [SortBound::Lower, SortBound::Upper] {
        let order = sorted_order(entries, best_axis, bound);
        let (prefix, suffix) = running_boxes(entries, &order);
        for k in min_entries..=len - min_entries {
            let (first, second) = (&prefix[k - 1], &suffix[k]);
            let overlap = first.overlap(second);
            let volume = first.volume() + second.volume();
            let better = match &best {
                None => true,
                Some((best_overlap, best_volume, _)) => {
                    match overlap.total_cmp(best_overlap) {
                        Ordering::Less => true,
                        Ordering::Equal => volume < *best_volume,
                        Ordering::Greater => false,
                    }
                }
            };
            if better {
                best = Some((
                    overlap,
                    volume,
                    SplitPlan {
                        axis: best_axis,
                        bound,
                        split_point: k,
                    },
                ));
            }
        }
    }
    best.map(|(_, _, plan)| plan)
}

/// Split `entries` according to the best distribution, returning the group
/// that stays and the group that moves to a new node.
pub fn split_entries<T: SpatialVector>(entries: Vec<T>, min_entries: usize) -> Option<(Vec<T>, Vec<T>)> {
    let plan = choose_split(&entries, min_entries)?;
    let order = sorted_order(&entries, plan.axis, plan.bound);

    let mut slots: Vec<Option<T>> = entries.into_iter().map(Some).collect();
    let mut sorted = Vec::with_capacity(slots.len());
    for i in order {
        if let Some(entry) = slots[i].take() {
            sorted.push(entry);
        }
    }
    let second = sorted.split_off(plan.split_point);
    Some((sorted, second))
}
