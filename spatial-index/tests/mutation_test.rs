mod common;

use common::{assert_valid, grid_points, init_logger, random_points, small_config, tree_with};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use spatial_index::{
    BulkSplitStrategy, EuclideanDistance, Mbr, Point, RStarTree, TreeConfig, TreeShape,
};

#[test]
fn test_insert_delete_round_trip_restores_empty_state() {
    for shape in [TreeShape::Hierarchical, TreeShape::Flat] {
        let config = small_config(6, 6).shape(shape);
        let mut tree = RStarTree::create_with_config(2, None, &config).unwrap();
        let empty_height = tree.height();
        let empty_leaves = tree.leaf_entries().unwrap();

        let p = Point::new(1, vec![0.25, -4.0]);
        tree.insert(&p).unwrap();
        assert!(tree.delete(&p).unwrap());

        assert_eq!(tree.height(), empty_height);
        assert_eq!(tree.leaf_entries().unwrap().len(), empty_leaves.len());
        assert!(tree.is_empty());
        assert_valid(&tree);
    }
}

#[test]
fn test_invariants_hold_after_every_insert() {
    init_logger();
    let points = random_points(5, 250, 2, 100.0);
    let mut tree = RStarTree::create_with_config(2, None, &small_config(5, 5)).unwrap();
    for p in &points {
        tree.insert(p).unwrap();
        assert_valid(&tree);
    }
    assert_eq!(tree.len(), 250);
    let stats = tree.stats().unwrap();
    assert!(stats.reinsertions > 0);
    assert!(stats.splits > 0);
}

#[test]
fn test_random_deletes_keep_invariants() {
    let points = random_points(9, 400, 3, 10.0);
    let mut tree = tree_with(&points, &small_config(8, 6));
    let mut order = points.clone();
    order.shuffle(&mut StdRng::seed_from_u64(10));

    for (deleted, p) in order.iter().enumerate() {
        assert!(tree.delete(p).unwrap(), "point {} missing", p.id);
        if deleted % 25 == 0 {
            assert_valid(&tree);
            let remaining: Vec<Point> = order[deleted + 1..].to_vec();
            let query = [5.0, 5.0, 5.0];
            let expected: Vec<_> = common::brute_force(&remaining, &query, &EuclideanDistance)
                .into_iter()
                .take(5)
                .collect();
            let actual = tree.knn_query(&query, 5, &EuclideanDistance).unwrap();
            assert_eq!(common::ids(&actual), common::ids(&expected));
        }
    }
    assert!(tree.is_empty());
    assert_eq!(tree.height(), 1);
    assert_valid(&tree);
}

#[test]
fn test_interleaved_inserts_and_deletes() {
    let points = grid_points(30, 900);
    let mut tree = RStarTree::create_with_config(2, None, &small_config(7, 7)).unwrap();
    for chunk in points.chunks(100) {
        for p in chunk {
            tree.insert(p).unwrap();
        }
        for p in chunk.iter().step_by(3) {
            assert!(tree.delete(p).unwrap());
        }
    }
    assert_eq!(tree.len(), 594);
    assert_valid(&tree);

    let region = Mbr::new(vec![0.0, 0.0], vec![29.0, 29.0]).unwrap();
    let expected: Vec<u64> = points.iter().filter(|p| p.id % 100 % 3 != 0).map(|p| p.id).collect();
    assert_eq!(tree.intersecting(&region).unwrap(), expected);
}

#[test]
fn test_flat_tree_mutations() {
    let points = random_points(13, 300, 2, 1.0);
    let config = small_config(9, 9).shape(TreeShape::Flat);
    let mut tree = tree_with(&points, &config);
    assert_eq!(tree.height(), 2);
    assert_eq!(tree.stats().unwrap().dir_nodes, 1);
    assert_valid(&tree);

    for p in &points[..250] {
        assert!(tree.delete(p).unwrap());
    }
    assert_eq!(tree.height(), 2);
    assert_eq!(tree.len(), 50);
    assert_valid(&tree);
}

#[test]
fn test_flat_bulk_load() {
    let points = random_points(17, 1000, 2, 1.0);
    let config = small_config(20, 20)
        .shape(TreeShape::Flat)
        .bulk_strategy(BulkSplitStrategy::ZCurve);
    let mut tree = RStarTree::bulk_create_with_config(&points, None, &config).unwrap();
    assert_eq!(tree.height(), 2);
    let stats = tree.stats().unwrap();
    assert_eq!(stats.dir_nodes, 1);
    assert!(stats.leaf_nodes > 19);
    assert_valid(&tree);

    tree.insert(&Point::new(5000, vec![0.5, 0.5])).unwrap();
    assert!(tree.delete(&points[0]).unwrap());
    assert_valid(&tree);
}

#[test]
fn test_reinsertion_can_be_disabled() {
    let points = random_points(19, 300, 2, 1.0);
    let config = TreeConfig::default()
        .leaf_capacity(8)
        .dir_capacity(8)
        .reinsert_fraction(0.0);
    let tree = tree_with(&points, &config);
    let stats = tree.stats().unwrap();
    assert_eq!(stats.reinsertions, 0);
    assert!(stats.splits > 0);
    assert_valid(&tree);
}

#[test]
fn test_invalid_reinsert_fraction() {
    let config = TreeConfig::default().reinsert_fraction(0.5);
    assert!(RStarTree::create_with_config(2, None, &config).is_err());
}
