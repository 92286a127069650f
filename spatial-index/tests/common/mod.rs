//! Shared helpers for the integration tests.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spatial_index::{DistanceFunction, ObjectId, Point, QueryResult, RStarTree, TreeConfig};

/// Route `log` output through the test harness; repeated calls are fine.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `n` uniformly distributed points in `[0, scale)^dimensionality`, ids
/// `0..n`, reproducible for a given seed.
pub fn random_points(seed: u64, n: usize, dimensionality: usize, scale: f64) -> Vec<Point> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let values = (0..dimensionality).map(|_| rng.gen::<f64>() * scale).collect();
            Point::new(i as ObjectId, values)
        })
        .collect()
}

/// Points on an integer grid, so that many distances tie.
pub fn grid_points(width: u64, n: u64) -> Vec<Point> {
    (0..n)
        .map(|i| Point::new(i, vec![(i % width) as f64, (i / width) as f64]))
        .collect()
}

pub fn small_config(leaf: usize, dir: usize) -> TreeConfig {
    TreeConfig::default().leaf_capacity(leaf).dir_capacity(dir)
}

pub fn tree_with(points: &[Point], config: &TreeConfig) -> RStarTree {
    let dimensionality = points.first().map_or(2, |p| p.values.len());
    let mut tree = RStarTree::create_with_config(dimensionality, None, config).unwrap();
    for p in points {
        tree.insert(p).unwrap();
    }
    tree
}

/// Every point with its distance to `query`, ordered by distance then id.
pub fn brute_force(points: &[Point], query: &[f64], distance: &dyn DistanceFunction) -> Vec<QueryResult> {
    let mut all: Vec<QueryResult> = points
        .iter()
        .map(|p| QueryResult::new(p.id, distance.distance(query, &p.values)))
        .collect();
    all.sort_by(QueryResult::cmp_by_distance);
    all
}

pub fn ids(results: &[QueryResult]) -> Vec<ObjectId> {
    results.iter().map(|r| r.id).collect()
}

pub fn assert_valid(tree: &RStarTree) {
    let report = tree.check_integrity().unwrap();
    assert!(report.is_valid, "integrity errors: {:#?}", report.errors);
}
