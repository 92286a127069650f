//! Distance functions used by the query engine.
//!
//! Queries need a lower bound on the distance from the query point to any
//! point inside a bounding box. Functions that can provide one expose it
//! through [`DistanceFunction::as_spatial`]; the others are rejected before
//! any page is read.

use crate::bounding_box::Mbr;

/// A distance on points with a total order, a zero and an infinity.
pub trait DistanceFunction: Send + Sync {
    fn name(&self) -> &'static str;

    fn distance(&self, a: &[f64], b: &[f64]) -> f64;

    fn null_distance(&self) -> f64 {
        0.0
    }

    fn infinite_distance(&self) -> f64 {
        f64::INFINITY
    }

    /// The point-to-box capability, if this distance supports it.
    fn as_spatial(&self) -> Option<&dyn SpatialDistanceFunction> {
        None
    }
}

/// A distance that can bound the distance from a point to a box.
pub trait SpatialDistanceFunction: DistanceFunction {
    /// Smallest distance between `point` and any point inside `mbr`.
    fn min_dist(&self, mbr: &Mbr, point: &[f64]) -> f64;
}

/// Per-axis gap between a coordinate and an interval, zero inside.
fn axis_gap(value: f64, lower: f64, upper: f64) -> f64 {
    if value < lower {
        lower - value
    } else if value > upper {
        value - upper
    } else {
        0.0
    }
}

fn box_gaps<'a>(mbr: &'a Mbr, point: &'a [f64]) -> impl Iterator<Item = f64> + 'a {
    point
        .iter()
        .zip(mbr.lower().iter().zip(mbr.upper()))
        .map(|(&v, (&lo, &hi))| axis_gap(v, lo, hi))
}

fn point_gaps<'a>(a: &'a [f64], b: &'a [f64]) -> impl Iterator<Item = f64> + 'a {
    a.iter().zip(b).map(|(x, y)| (x - y).abs())
}

/// Euclidean (L2) distance
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanDistance;

impl DistanceFunction for EuclideanDistance {
    fn name(&self) -> &'static str {
        "euclidean"
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        point_gaps(a, b).map(|g| g * g).sum::<f64>().sqrt()
    }

    fn as_spatial(&self) -> Option<&dyn SpatialDistanceFunction> {
        Some(self)
    }
}

impl SpatialDistanceFunction for EuclideanDistance {
    fn min_dist(&self, mbr: &Mbr, point: &[f64]) -> f64 {
        if mbr.is_empty() {
            return self.infinite_distance();
        }
        box_gaps(mbr, point).map(|g| g * g).sum::<f64>().sqrt()
    }
}

/// Manhattan (L1) distance
#[derive(Debug, Clone, Copy, Default)]
pub struct ManhattanDistance;

impl DistanceFunction for ManhattanDistance {
    fn name(&self) -> &'static str {
        "manhattan"
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        point_gaps(a, b).sum()
    }

    fn as_spatial(&self) -> Option<&dyn SpatialDistanceFunction> {
        Some(self)
    }
}

impl SpatialDistanceFunction for ManhattanDistance {
    fn min_dist(&self, mbr: &Mbr, point: &[f64]) -> f64 {
        if mbr.is_empty() {
            return self.infinite_distance();
        }
        box_gaps(mbr, point).sum()
    }
}

/// Maximum (Chebyshev, L-infinity) distance
#[derive(Debug, Clone, Copy, Default)]
pub struct MaximumDistance;

impl DistanceFunction for MaximumDistance {
    fn name(&self) -> &'static str {
        "maximum"
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        point_gaps(a, b).fold(0.0, f64::max)
    }

    fn as_spatial(&self) -> Option<&dyn SpatialDistanceFunction> {
        Some(self)
    }
}

impl SpatialDistanceFunction for MaximumDistance {
    fn min_dist(&self, mbr: &Mbr, point: &[f64]) -> f64 {
        if mbr.is_empty() {
            return self.infinite_distance();
        }
        box_gaps(mbr, point).fold(0.0, f64::max)
    }
}

/// Minkowski distance of order `p` (p >= 1)
#[derive(Debug, Clone, Copy)]
pub struct LpDistance {
    p: f64,
}

impl LpDistance {
    pub fn new(p: f64) -> Option<Self> {
        (p >= 1.0 && p.is_finite()).then_some(Self { p })
    }

    pub fn p(&self) -> f64 {
        self.p
    }

    fn combine(&self, gaps: impl Iterator<Item = f64>) -> f64 {
        gaps.map(|g| g.powf(self.p)).sum::<f64>().powf(1.0 / self.p)
    }
}

impl DistanceFunction for LpDistance {
    fn name(&self) -> &'static str {
        "lp"
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        self.combine(point_gaps(a, b))
    }

    fn as_spatial(&self) -> Option<&dyn SpatialDistanceFunction> {
        Some(self)
    }
}

impl SpatialDistanceFunction for LpDistance {
    fn min_dist(&self, mbr: &Mbr, point: &[f64]) -> f64 {
        if mbr.is_empty() {
            return self.infinite_distance();
        }
        self.combine(box_gaps(mbr, point))
    }
}

/// Cosine distance, `1 - cos(a, b)`.
///
/// There is no useful bound from a point to a box under this distance, so
/// the tree queries refuse it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineDistance;

impl DistanceFunction for CosineDistance {
    fn name(&self) -> &'static str {
        "cosine"
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
        let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return if norm_a == norm_b { 0.0 } else { 1.0 };
        }
        (1.0 - dot / (norm_a * norm_b)).max(0.0)
    }

    fn infinite_distance(&self) -> f64 {
        2.0
    }
}
