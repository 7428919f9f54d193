//! Clustering quality over a range of zone counts.
//!
//! For each `k` the weighted k-means is fitted and scored with inertia,
//! silhouette, and Davies-Bouldin. The metrics are advisory; picking a
//! `k` from them is [`crate::selection`]'s job.

use std::ops::RangeInclusive;

use city_insights_grid_models::WeightedPoint;
use city_insights_zones_models::{ClusterCandidate, KMeansParams};

use crate::kmeans::{self, KMeansFit};
use crate::progress::{NullProgress, ProgressCallback};
use crate::{AnalysisError, distinct_count, fit_weights, project_points};

/// Candidates produced by an evaluation, and whether every `k` in range
/// was evaluated before the stop condition fired.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// One candidate per evaluated `k`, ascending.
    pub candidates: Vec<ClusterCandidate>,
    /// `false` when evaluation stopped early.
    pub completed: bool,
}

/// Fits and scores clusterings for each `k` in a range.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterQualityEvaluator {
    params: KMeansParams,
}

impl ClusterQualityEvaluator {
    /// Creates an evaluator fitting with `params`.
    #[must_use]
    pub const fn new(params: KMeansParams) -> Self {
        Self { params }
    }

    /// Evaluates every admissible `k` in `k_range`.
    ///
    /// Values of `k` below 2 or not below the number of distinct points
    /// are skipped. Fewer than two distinct points yield no candidates.
    ///
    /// # Errors
    ///
    /// * [`AnalysisError::InvalidParameter`] if `k_range` is empty or a
    ///   point weight is not positive.
    /// * [`AnalysisError::NumericInstability`] if a fit leaves fewer
    ///   than two non-empty clusters.
    pub fn evaluate(
        &self,
        points: &[WeightedPoint],
        k_range: RangeInclusive<usize>,
        weighted: bool,
    ) -> Result<Vec<ClusterCandidate>, AnalysisError> {
        self.evaluate_with(points, k_range, weighted, &NullProgress, &|| false)
            .map(|evaluation| evaluation.candidates)
    }

    /// Like [`Self::evaluate`], reporting one progress unit per `k` and
    /// checking `should_stop` before each one. Candidates computed before
    /// a stop are kept.
    ///
    /// # Errors
    ///
    /// Same as [`Self::evaluate`].
    pub fn evaluate_with(
        &self,
        points: &[WeightedPoint],
        k_range: RangeInclusive<usize>,
        weighted: bool,
        progress: &dyn ProgressCallback,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<Evaluation, AnalysisError> {
        if k_range.is_empty() {
            return Err(AnalysisError::invalid(format!(
                "k range {}..={} is empty",
                k_range.start(),
                k_range.end()
            )));
        }

        let distinct = distinct_count(points);
        if distinct < 2 {
            log::debug!("{distinct} distinct points, nothing to evaluate");
            return Ok(Evaluation {
                candidates: Vec::new(),
                completed: true,
            });
        }

        let weights = fit_weights(points, weighted)?;
        let (_, projected) = project_points(points);

        let ks: Vec<usize> = k_range
            .clone()
            .filter(|&k| {
                let admissible = k >= 2 && k < distinct;
                if !admissible {
                    log::debug!("Skipping k={k}: needs 2 <= k < {distinct}");
                }
                admissible
            })
            .collect();

        progress.set_total(ks.len() as u64);
        let mut candidates = Vec::with_capacity(ks.len());

        for k in ks {
            if should_stop() {
                log::info!(
                    "Quality evaluation stopped before k={k} with {} candidates",
                    candidates.len()
                );
                return Ok(Evaluation {
                    candidates,
                    completed: false,
                });
            }

            progress.set_message(format!("Evaluating k={k}"));
            let fit = kmeans::fit(&projected, &weights, k, &self.params)?;
            let candidate = score_fit(&projected, &fit, k)?;
            log::debug!(
                "k={k}: inertia {:.1} silhouette {:.4} davies-bouldin {:.4}",
                candidate.inertia,
                candidate.silhouette_score,
                candidate.davies_bouldin_score
            );
            candidates.push(candidate);
            progress.inc(1);
        }

        Ok(Evaluation {
            candidates,
            completed: true,
        })
    }
}

fn score_fit(
    points: &[[f64; 2]],
    fit: &KMeansFit,
    k: usize,
) -> Result<ClusterCandidate, AnalysisError> {
    let populated = fit.non_empty_clusters();
    if populated < 2 {
        return Err(AnalysisError::NumericInstability {
            k,
            message: format!("only {populated} of {k} clusters have members"),
        });
    }

    Ok(ClusterCandidate {
        k,
        inertia: fit.inertia,
        silhouette_score: silhouette(points, &fit.labels, k),
        davies_bouldin_score: davies_bouldin(points, &fit.labels, &fit.centers),
    })
}

/// Mean silhouette coefficient. Members of singleton clusters score 0.
#[allow(clippy::cast_precision_loss)]
fn silhouette(points: &[[f64; 2]], labels: &[usize], k: usize) -> f64 {
    let mut sizes = vec![0_usize; k];
    for &label in labels {
        sizes[label] += 1;
    }

    let mut total = 0.0;
    let mut sums = vec![0.0_f64; k];

    for (i, p) in points.iter().enumerate() {
        let own = labels[i];
        if sizes[own] < 2 {
            continue;
        }

        sums.iter_mut().for_each(|s| *s = 0.0);
        for (j, q) in points.iter().enumerate() {
            if i != j {
                sums[labels[j]] += kmeans::dist2(*p, *q).sqrt();
            }
        }

        let a = sums[own] / (sizes[own] - 1) as f64;
        let b = (0..k)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| sums[c] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);

        let denom = a.max(b);
        if denom > 0.0 && denom.is_finite() {
            total += (b - a) / denom;
        }
    }

    total / points.len() as f64
}

/// Davies-Bouldin index over the non-empty clusters. Pairs of coincident
/// centers contribute 0.
#[allow(clippy::cast_precision_loss)]
fn davies_bouldin(points: &[[f64; 2]], labels: &[usize], centers: &[[f64; 2]]) -> f64 {
    let k = centers.len();
    let mut scatter = vec![0.0_f64; k];
    let mut sizes = vec![0_usize; k];

    for (p, &label) in points.iter().zip(labels) {
        scatter[label] += kmeans::dist2(*p, centers[label]).sqrt();
        sizes[label] += 1;
    }

    let populated: Vec<usize> = (0..k).filter(|&c| sizes[c] > 0).collect();
    for &c in &populated {
        scatter[c] /= sizes[c] as f64;
    }

    let worst_sum: f64 = populated
        .iter()
        .map(|&i| {
            populated
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| {
                    let separation = kmeans::dist2(centers[i], centers[j]).sqrt();
                    if separation > 0.0 {
                        (scatter[i] + scatter[j]) / separation
                    } else {
                        0.0
                    }
                })
                .fold(0.0, f64::max)
        })
        .sum();

    worst_sum / populated.len() as f64
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::ErrorKind;

    /// Three compact groups ~3 km apart around Lyon.
    fn three_groups() -> Vec<WeightedPoint> {
        let centers = [(45.75, 4.85), (45.78, 4.85), (45.75, 4.89)];
        let mut points = Vec::new();
        for (lat, lon) in centers {
            for i in 0..6 {
                let d = f64::from(i) * 0.0004;
                points.push(WeightedPoint::new(lat + d, lon - d / 2.0, 10.0 + f64::from(i)));
            }
        }
        points
    }

    #[test]
    fn empty_range_is_invalid() {
        #[allow(clippy::reversed_empty_ranges)]
        let err = ClusterQualityEvaluator::default()
            .evaluate(&three_groups(), 5..=3, true)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn fewer_than_two_distinct_points_yield_nothing() {
        let evaluator = ClusterQualityEvaluator::default();
        assert!(evaluator.evaluate(&[], 2..=4, true).unwrap().is_empty());

        let same = vec![WeightedPoint::new(45.0, 4.0, 1.0); 5];
        assert!(evaluator.evaluate(&same, 2..=4, true).unwrap().is_empty());
    }

    #[test]
    fn inadmissible_k_are_skipped() {
        let points = vec![
            WeightedPoint::new(45.0, 4.0, 1.0),
            WeightedPoint::new(45.01, 4.0, 1.0),
            WeightedPoint::new(45.0, 4.01, 1.0),
            WeightedPoint::new(45.0, 4.01, 2.0),
        ];
        let candidates = ClusterQualityEvaluator::default()
            .evaluate(&points, 1..=5, true)
            .unwrap();
        let ks: Vec<usize> = candidates.iter().map(|c| c.k).collect();
        assert_eq!(ks, vec![2]);
    }

    #[test]
    fn true_cluster_count_scores_best() {
        let candidates = ClusterQualityEvaluator::default()
            .evaluate(&three_groups(), 2..=6, true)
            .unwrap();
        assert_eq!(candidates.len(), 5);

        let best_silhouette = candidates
            .iter()
            .max_by(|a, b| a.silhouette_score.total_cmp(&b.silhouette_score))
            .unwrap();
        assert_eq!(best_silhouette.k, 3);
        assert!(best_silhouette.silhouette_score > 0.7);

        let best_db = candidates
            .iter()
            .min_by(|a, b| a.davies_bouldin_score.total_cmp(&b.davies_bouldin_score))
            .unwrap();
        assert_eq!(best_db.k, 3);
        assert!(candidates[1].inertia < candidates[0].inertia);
    }

    #[test]
    fn metrics_are_reproducible() {
        let evaluator = ClusterQualityEvaluator::default();
        let first = evaluator.evaluate(&three_groups(), 2..=5, true).unwrap();
        let second = evaluator.evaluate(&three_groups(), 2..=5, true).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn stop_keeps_partial_candidates() {
        let evaluated = Cell::new(0);
        let stop_after_two = || {
            let n = evaluated.get();
            evaluated.set(n + 1);
            n >= 2
        };

        let evaluation = ClusterQualityEvaluator::default()
            .evaluate_with(&three_groups(), 2..=6, true, &NullProgress, &stop_after_two)
            .unwrap();

        assert!(!evaluation.completed);
        let ks: Vec<usize> = evaluation.candidates.iter().map(|c| c.k).collect();
        assert_eq!(ks, vec![2, 3]);
    }

    #[test]
    fn single_populated_cluster_is_unstable() {
        let points = vec![[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]];
        let fit = KMeansFit {
            centers: vec![[1.0, 0.0], [50.0, 0.0]],
            labels: vec![0, 0, 0],
            inertia: 2.0,
            iterations: 1,
        };

        let err = score_fit(&points, &fit, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NumericInstability);
        assert!(matches!(err, AnalysisError::NumericInstability { k: 2, .. }));
        assert!(err.to_string().contains("only 1 of 2"));
    }

    #[test]
    fn silhouette_of_separated_pairs() {
        let points = vec![[0.0, 0.0], [1.0, 0.0], [100.0, 0.0], [101.0, 0.0]];
        let labels = vec![0, 0, 1, 1];
        let s = silhouette(&points, &labels, 2);
        // a = 1, b ~ 100 for every point.
        assert!(s > 0.98 && s < 1.0);
    }

    #[test]
    fn singleton_members_score_zero() {
        let points = vec![[0.0, 0.0], [10.0, 0.0]];
        assert!(silhouette(&points, &[0, 1], 2).abs() < f64::EPSILON);
    }

    #[test]
    fn davies_bouldin_of_known_layout() {
        let points = vec![[0.0, 0.0], [2.0, 0.0], [10.0, 0.0], [12.0, 0.0]];
        let labels = vec![0, 0, 1, 1];
        let centers = vec![[1.0, 0.0], [11.0, 0.0]];
        // Scatter 1 each, separation 10.
        assert!((davies_bouldin(&points, &labels, &centers) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn coincident_centers_contribute_zero() {
        let points = vec![[0.0, 0.0], [2.0, 0.0]];
        let labels = vec![0, 1];
        let centers = vec![[1.0, 0.0], [1.0, 0.0]];
        assert!(davies_bouldin(&points, &labels, &centers).abs() < f64::EPSILON);
    }
}
