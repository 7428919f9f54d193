//! Deterministic weighted k-means in a planar metric space.
//!
//! Weighted k-means++ seeding on a `ChaCha8` stream, then Lloyd
//! iterations where each center is the weight-averaged position of its
//! members. Identical input, `k`, and [`KMeansParams`] always produce
//! the identical fit.

use city_insights_zones_models::KMeansParams;
use rand::SeedableRng;
use rand::distributions::{Distribution, WeightedIndex};
use rand_chacha::ChaCha8Rng;

use crate::AnalysisError;

/// Result of a k-means fit.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    /// Cluster centers, indexed by cluster.
    pub centers: Vec<[f64; 2]>,
    /// Cluster index of each input point, in input order.
    pub labels: Vec<usize>,
    /// Weighted sum of squared distances to the assigned center.
    pub inertia: f64,
    /// Lloyd iterations performed by the winning run.
    pub iterations: usize,
}

impl KMeansFit {
    /// Number of points per cluster.
    #[must_use]
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centers.len()];
        for &label in &self.labels {
            sizes[label] += 1;
        }
        sizes
    }

    /// Number of clusters with at least one member.
    #[must_use]
    pub fn non_empty_clusters(&self) -> usize {
        self.cluster_sizes().iter().filter(|&&n| n > 0).count()
    }
}

/// Squared Euclidean distance.
#[must_use]
pub fn dist2(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx.mul_add(dx, dy * dy)
}

/// Fits `k` clusters to `points` with per-point `weights`.
///
/// # Errors
///
/// * [`AnalysisError::EmptyInput`] if `points` is empty.
/// * [`AnalysisError::InvalidParameter`] if `k` is 0 or exceeds the
///   number of points, if `weights` does not match `points`, or if the
///   weights cannot be sampled from (all zero, negative, or non-finite).
pub fn fit(
    points: &[[f64; 2]],
    weights: &[f64],
    k: usize,
    params: &KMeansParams,
) -> Result<KMeansFit, AnalysisError> {
    if points.is_empty() {
        return Err(AnalysisError::EmptyInput {
            message: "no points to cluster".to_string(),
        });
    }
    if weights.len() != points.len() {
        return Err(AnalysisError::invalid(format!(
            "{} weights for {} points",
            weights.len(),
            points.len()
        )));
    }
    if k == 0 || k > points.len() {
        return Err(AnalysisError::invalid(format!(
            "k must be in 1..={}, got {k}",
            points.len()
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let mut best: Option<KMeansFit> = None;

    for run in 0..params.n_init.max(1) {
        let centers = seed_centers(points, weights, k, &mut rng)?;
        let candidate = lloyd(points, weights, centers, params);
        log::trace!(
            "k-means run {run} (k={k}): inertia {:.3} after {} iterations",
            candidate.inertia,
            candidate.iterations
        );
        if best
            .as_ref()
            .is_none_or(|b| candidate.inertia < b.inertia)
        {
            best = Some(candidate);
        }
    }

    best.ok_or_else(|| AnalysisError::invalid("n_init produced no run"))
}

/// Weighted k-means++ seeding.
fn seed_centers(
    points: &[[f64; 2]],
    weights: &[f64],
    k: usize,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<[f64; 2]>, AnalysisError> {
    let first = WeightedIndex::new(weights)
        .map_err(|e| AnalysisError::invalid(format!("cannot sample initial center: {e}")))?;

    let mut centers = Vec::with_capacity(k);
    centers.push(points[first.sample(rng)]);

    let mut nearest: Vec<f64> = points.iter().map(|p| dist2(*p, centers[0])).collect();

    while centers.len() < k {
        let scores: Vec<f64> = weights.iter().zip(&nearest).map(|(w, d)| w * d).collect();

        let next = if scores.iter().any(|s| *s > 0.0) {
            let index = WeightedIndex::new(&scores)
                .map_err(|e| AnalysisError::invalid(format!("cannot sample center: {e}")))?;
            points[index.sample(rng)]
        } else {
            // Every point already sits on a center.
            points[0]
        };

        for (d, p) in nearest.iter_mut().zip(points) {
            *d = d.min(dist2(*p, next));
        }
        centers.push(next);
    }

    Ok(centers)
}

fn lloyd(
    points: &[[f64; 2]],
    weights: &[f64],
    mut centers: Vec<[f64; 2]>,
    params: &KMeansParams,
) -> KMeansFit {
    let mut labels = assign(points, &centers);
    let mut iterations = 0;

    while iterations < params.max_iterations {
        iterations += 1;

        let updated = recompute_centers(points, weights, &labels, &centers);
        let shift: f64 = centers
            .iter()
            .zip(&updated)
            .map(|(a, b)| dist2(*a, *b))
            .sum();
        centers = updated;

        let next = assign(points, &centers);
        let stable = next == labels;
        labels = next;

        if stable || shift <= params.tolerance {
            break;
        }
    }

    let inertia = points
        .iter()
        .zip(weights)
        .zip(&labels)
        .map(|((p, w), &label)| w * dist2(*p, centers[label]))
        .sum();

    KMeansFit {
        centers,
        labels,
        inertia,
        iterations,
    }
}

/// Index of the nearest center for each point. Ties go to the lowest index.
#[must_use]
pub fn assign(points: &[[f64; 2]], centers: &[[f64; 2]]) -> Vec<usize> {
    points.iter().map(|p| nearest_center(*p, centers)).collect()
}

fn nearest_center(point: [f64; 2], centers: &[[f64; 2]]) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (i, c) in centers.iter().enumerate() {
        let d = dist2(point, *c);
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

/// Weighted means of each cluster. Empty clusters are moved onto the
/// points farthest from their own center (farthest first, lowest index
/// on ties).
fn recompute_centers(
    points: &[[f64; 2]],
    weights: &[f64],
    labels: &[usize],
    previous: &[[f64; 2]],
) -> Vec<[f64; 2]> {
    let k = previous.len();
    let mut sums = vec![[0.0_f64; 2]; k];
    let mut mass = vec![0.0_f64; k];

    for ((p, w), &label) in points.iter().zip(weights).zip(labels) {
        sums[label][0] += w * p[0];
        sums[label][1] += w * p[1];
        mass[label] += w;
    }

    let mut centers: Vec<[f64; 2]> = (0..k)
        .map(|c| {
            if mass[c] > 0.0 {
                [sums[c][0] / mass[c], sums[c][1] / mass[c]]
            } else {
                previous[c]
            }
        })
        .collect();

    let empty: Vec<usize> = (0..k).filter(|&c| mass[c] <= 0.0).collect();
    if empty.is_empty() {
        return centers;
    }

    let mut farthest: Vec<(usize, f64)> = points
        .iter()
        .zip(labels)
        .enumerate()
        .map(|(i, (p, &label))| (i, dist2(*p, centers[label])))
        .filter(|(_, d)| *d > 0.0)
        .collect();
    farthest.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    for (cluster, (index, _)) in empty.into_iter().zip(farthest) {
        log::trace!("Re-seeding empty cluster {cluster} at point {index}");
        centers[cluster] = points[index];
    }

    centers
}
