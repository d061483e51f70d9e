//! Average-linkage agglomerative clustering

use super::similarity::SimilarityMatrix;
use tracing::trace;

/// When to stop merging
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClusterTarget {
    /// Merge until exactly this many groups remain (clamped to `1..=n`)
    Count(usize),
    /// Merge while the closest pair is at distance `<= 1 - threshold`
    SimilarityThreshold(f64),
}

/// Groups matrix rows by average-linkage agglomerative clustering
///
/// Every row ends up in exactly one group. Groups are sorted internally and
/// ordered by their smallest member. Ties between equally close pairs are
/// broken towards the lowest pair of group positions, so results are
/// deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterEngine;

impl ClusterEngine {
    /// Create an engine
    pub fn new() -> Self {
        Self
    }

    /// Partition rows `0..matrix.size()` into groups
    pub fn cluster(&self, matrix: &SimilarityMatrix, target: ClusterTarget) -> Vec<Vec<usize>> {
        let n = matrix.size();
        if n <= 2 {
            return vec![(0..n).collect()];
        }

        let mut groups: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
        let mut dist: Vec<Vec<f64>> = (0..n)
            .map(|i| (0..n).map(|j| matrix.distance(i, j)).collect())
            .collect();

        loop {
            if let ClusterTarget::Count(k) = target {
                if groups.len() <= k.clamp(1, n) {
                    break;
                }
            }
            if groups.len() == 1 {
                break;
            }

            let (a, b, d) = closest_pair(&dist);
            if let ClusterTarget::SimilarityThreshold(t) = target {
                if d > 1.0 - t {
                    break;
                }
            }

            trace!("Merging groups {:?} and {:?} at distance {:.4}", groups[a], groups[b], d);
            merge(&mut groups, &mut dist, a, b);
        }

        for group in &mut groups {
            group.sort_unstable();
        }
        groups.sort_by_key(|g| g[0]);
        groups
    }
}

/// Closest pair `(a, b, distance)` with `a < b`, lowest pair on ties
fn closest_pair(dist: &[Vec<f64>]) -> (usize, usize, f64) {
    let mut best = (0, 1, f64::INFINITY);
    for a in 0..dist.len() {
        for b in (a + 1)..dist.len() {
            if dist[a][b] < best.2 {
                best = (a, b, dist[a][b]);
            }
        }
    }
    best
}

/// Fold group `b` into group `a` and update distances with the
/// Lance-Williams rule for average linkage
fn merge(groups: &mut Vec<Vec<usize>>, dist: &mut Vec<Vec<f64>>, a: usize, b: usize) {
    let size_a = groups[a].len() as f64;
    let size_b = groups[b].len() as f64;

    for k in 0..groups.len() {
        if k == a || k == b {
            continue;
        }
        let d = (size_a * dist[a][k] + size_b * dist[b][k]) / (size_a + size_b);
        dist[a][k] = d;
        dist[k][a] = d;
    }

    let absorbed = groups.remove(b);
    groups[a].extend(absorbed);
    dist.remove(b);
    for row in dist.iter_mut() {
        row.remove(b);
    }
}
