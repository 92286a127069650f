//! R*-tree benchmarks

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use spatial_index::{BulkSplitStrategy, EuclideanDistance, Mbr, Point, RStarTree};
use std::hint::black_box;
use tempfile::tempdir;

fn grid(size: u64) -> Vec<Point> {
    (0..size)
        .map(|i| Point::new(i, vec![(i % 100) as f64, (i / 100) as f64]))
        .collect()
}

fn bench_rstar_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("RStarTree Insert");

    for size in [100u64, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter_with_setup(
                || {
                    let dir = tempdir().unwrap();
                    let path = dir.path().join("bench.rstar");
                    (RStarTree::create(2, Some(path.as_path()), 4096, 256).unwrap(), dir)
                },
                |(mut tree, _dir)| {
                    for p in grid(size) {
                        tree.insert(&p).unwrap();
                    }
                    black_box(tree.len())
                },
            );
        });
    }

    group.finish();
}

fn bench_rstar_bulk_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("RStarTree Bulk Load");
    let points = grid(10000);

    for strategy in [BulkSplitStrategy::MaxExtension, BulkSplitStrategy::ZCurve] {
        group.bench_function(format!("{:?}", strategy), |b| {
            b.iter(|| {
                let tree = RStarTree::bulk_create(&points, None, 4096, 256, strategy).unwrap();
                black_box(tree.height())
            });
        });
    }

    group.finish();
}

fn bench_rstar_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("RStarTree Search");

    let dir = tempdir().unwrap();
    let path = dir.path().join("bench.rstar");
    let mut tree = RStarTree::create(2, Some(path.as_path()), 4096, 64).unwrap();
    for p in grid(10000) {
        tree.insert(&p).unwrap();
    }

    group.bench_function("knn_10_of_10k", |b| {
        b.iter(|| black_box(tree.knn_query(&[50.5, 50.5], 10, &EuclideanDistance).unwrap()));
    });

    group.bench_function("range_5_of_10k", |b| {
        b.iter(|| black_box(tree.range_query(&[25.0, 75.0], 5.0, &EuclideanDistance).unwrap()));
    });

    group.bench_function("window_10k", |b| {
        let region = Mbr::new(vec![25.0, 25.0], vec![75.0, 75.0]).unwrap();
        b.iter(|| black_box(tree.intersecting(&region).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_rstar_insert, bench_rstar_bulk_load, bench_rstar_search);
criterion_main!(benches);
