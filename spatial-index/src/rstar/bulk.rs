//! Partitioning of objects into nodes for bottom-up bulk loading.

use std::cmp::Ordering;

use super::config::BulkSplitStrategy;
use super::constants::Z_CURVE_BITS;
use super::types::{SpatialError, SpatialResult};
use crate::bounding_box::Mbr;
use crate::vector::SpatialVector;
use crate::zcurve::ZCurve;

/// Size of the next chunk cut from `remaining` objects.
///
/// Everything fits in one node when `remaining <= max`. Just above that the
/// cut leaves exactly `min` objects so the last node is not underfull;
/// otherwise a full node of `max` objects is cut.
pub fn bulk_split_point(remaining: usize, min: usize, max: usize) -> SpatialResult<usize> {
    if remaining < min {
        return Err(SpatialError::InvalidArgument(format!(
            "cannot build a node from {} objects, at least {} are required",
            remaining, min
        )));
    }
    if remaining <= max {
        Ok(remaining)
    } else if remaining < max + min {
        Ok(remaining - min)
    } else {
        Ok(max)
    }
}

/// Cut `objects` into runs of between `min` and `max` objects each.
pub fn partition<T: SpatialVector>(
    objects: Vec<T>,
    min: usize,
    max: usize,
    strategy: BulkSplitStrategy,
) -> SpatialResult<Vec<Vec<T>>> {
    match strategy {
        BulkSplitStrategy::MaxExtension => partition_max_extension(objects, min, max),
        BulkSplitStrategy::ZCurve => partition_z_curve(objects, min, max),
    }
}

/// Axis along which the objects spread the most; lowest axis on ties.
fn max_extension_axis<T: SpatialVector>(objects: &[T]) -> usize {
    let Some(mbr) = Mbr::union_all(objects) else {
        return 0;
    };
    let mut best = 0;
    for d in 1..mbr.dimensionality() {
        if mbr.extent(d) > mbr.extent(best) {
            best = d;
        }
    }
    best
}

fn by_lower_bound<T: SpatialVector>(axis: usize) -> impl Fn(&T, &T) -> Ordering {
    move |a, b| {
        a.min(axis)
            .total_cmp(&b.min(axis))
            .then(a.max(axis).total_cmp(&b.max(axis)))
    }
}

fn partition_max_extension<T: SpatialVector>(
    mut remaining: Vec<T>,
    min: usize,
    max: usize,
) -> SpatialResult<Vec<Vec<T>>> {
    let mut chunks = Vec::new();
    while !remaining.is_empty() {
        let split_point = bulk_split_point(remaining.len(), min, max)?;
        let axis = max_extension_axis(&remaining);
        remaining.sort_by(by_lower_bound::<T>(axis));
        let rest = remaining.split_off(split_point);
        chunks.push(remaining);
        remaining = rest;
    }
    Ok(chunks)
}

fn partition_z_curve<T: SpatialVector>(
    objects: Vec<T>,
    min: usize,
    max: usize,
) -> SpatialResult<Vec<Vec<T>>> {
    let Some(region) = Mbr::union_all(&objects) else {
        return Ok(Vec::new());
    };
    let curve = ZCurve::new(region, Z_CURVE_BITS);

    let mut keyed: Vec<(Vec<u64>, T)> = objects.into_iter().map(|o| (curve.key(&o), o)).collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    let mut chunks = Vec::new();
    let mut remaining = keyed.len();
    let mut iter = keyed.into_iter().map(|(_, o)| o);
    while remaining > 0 {
        let split_point = bulk_split_point(remaining, min, max)?;
        chunks.push(iter.by_ref().take(split_point).collect());
        remaining -= split_point;
    }
    Ok(chunks)
}
