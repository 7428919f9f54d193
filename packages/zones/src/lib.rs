#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Zone analysis over weighted population points.
//!
//! Partitions sampled population points into spatially coherent zones
//! with a deterministic weighted k-means, measures clustering quality
//! over a range of `k`, picks a `k` from those measurements, and ranks
//! zones by commercial opportunity (high demand, low competition).
//!
//! All distances are computed in meters in a local equirectangular
//! projection centered on the analyzed points, so east-west and
//! north-south separations weigh the same.

pub mod cluster;
pub mod kmeans;
pub mod progress;
pub mod quality;
pub mod scoring;
pub mod selection;

use std::collections::BTreeSet;

use city_insights_grid_models::{Coordinate, LocalProjection, WeightedPoint};
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

pub use cluster::ZoneClusterer;
pub use quality::{ClusterQualityEvaluator, Evaluation};
pub use scoring::score;
pub use selection::choose_k;

/// Category of an [`AnalysisError`], surfaced unchanged through the
/// pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Nothing to analyze.
    EmptyInput,
    /// A caller-supplied parameter is out of range.
    InvalidParameter,
    /// A quality metric is undefined for the fit.
    NumericInstability,
}

/// Errors raised by zone analysis.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// No points (or no distinct points) to work with.
    #[error("Empty input: {message}")]
    EmptyInput {
        /// What was empty.
        message: String,
    },

    /// Parameter out of range (k, k range, weights).
    #[error("Invalid parameter: {message}")]
    InvalidParameter {
        /// Which parameter and why.
        message: String,
    },

    /// Fewer than two clusters have members, so silhouette and
    /// Davies-Bouldin are undefined.
    #[error("Numeric instability at k={k}: {message}")]
    NumericInstability {
        /// The `k` being evaluated.
        k: usize,
        /// Details.
        message: String,
    },
}

impl AnalysisError {
    /// Returns the category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyInput { .. } => ErrorKind::EmptyInput,
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::NumericInstability { .. } => ErrorKind::NumericInstability,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }
}

/// Number of distinct coordinates among `points`.
#[must_use]
pub fn distinct_count(points: &[WeightedPoint]) -> usize {
    points
        .iter()
        .map(coordinate_key)
        .collect::<BTreeSet<_>>()
        .len()
}

/// Bitwise identity of a point's coordinate, with `-0.0` folded into `0.0`.
pub(crate) fn coordinate_key(point: &WeightedPoint) -> (u64, u64) {
    (
        (point.latitude + 0.0).to_bits(),
        (point.longitude + 0.0).to_bits(),
    )
}

/// Projects `points` into meters around their mean coordinate.
pub(crate) fn project_points(points: &[WeightedPoint]) -> (LocalProjection, Vec<[f64; 2]>) {
    let projection = LocalProjection::centered_on(points.iter().map(WeightedPoint::coordinate));
    let projected = points
        .iter()
        .map(|p| projection.project(p.coordinate()))
        .collect();
    (projection, projected)
}

/// Point weights used for fitting: the population weights, or all ones
/// when `weighted` is off.
///
/// Fails when a population weight is not a positive finite number.
pub(crate) fn fit_weights(
    points: &[WeightedPoint],
    weighted: bool,
) -> Result<Vec<f64>, AnalysisError> {
    if let Some(bad) = points
        .iter()
        .find(|p| !(p.weight.is_finite() && p.weight > 0.0))
    {
        return Err(AnalysisError::invalid(format!(
            "point weights must be positive and finite, got {} at ({}, {})",
            bad.weight, bad.latitude, bad.longitude
        )));
    }

    Ok(points
        .iter()
        .map(|p| if weighted { p.weight } else { 1.0 })
        .collect())
}

/// Population-weighted centroid of `points`, which must be non-empty.
pub(crate) fn weighted_centroid(points: &[WeightedPoint]) -> Coordinate {
    let mass: f64 = points.iter().map(|p| p.weight).sum();
    let lat = points.iter().map(|p| p.latitude * p.weight).sum::<f64>() / mass;
    let lon = points.iter().map(|p| p.longitude * p.weight).sum::<f64>() / mass;
    Coordinate::new(lat, lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        let err = AnalysisError::EmptyInput {
            message: "no points".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::EmptyInput);
        assert_eq!(err.kind().to_string(), "empty_input");

        let err = AnalysisError::NumericInstability {
            k: 3,
            message: "one cluster".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::NumericInstability);
        assert!(err.to_string().contains("k=3"));
    }

    #[test]
    fn distinct_points() {
        let points = vec![
            WeightedPoint::new(48.0, 2.0, 1.0),
            WeightedPoint::new(48.0, 2.0, 4.0),
            WeightedPoint::new(-0.0, 2.0, 1.0),
            WeightedPoint::new(0.0, 2.0, 1.0),
        ];
        assert_eq!(distinct_count(&points), 2);
        assert_eq!(distinct_count(&[]), 0);
    }

    #[test]
    fn rejects_non_positive_weights() {
        let points = vec![WeightedPoint::new(48.0, 2.0, 0.0)];
        let err = fit_weights(&points, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn unweighted_fit_uses_unit_weights() {
        let points = vec![
            WeightedPoint::new(48.0, 2.0, 7.0),
            WeightedPoint::new(48.1, 2.0, 3.0),
        ];
        assert_eq!(fit_weights(&points, false).unwrap(), vec![1.0, 1.0]);
        assert_eq!(fit_weights(&points, true).unwrap(), vec![7.0, 3.0]);
    }

    #[test]
    fn centroid_is_weighted() {
        let points = vec![
            WeightedPoint::new(48.0, 2.0, 1.0),
            WeightedPoint::new(48.4, 2.4, 3.0),
        ];
        let c = weighted_centroid(&points);
        assert!((c.latitude - 48.3).abs() < 1e-12);
        assert!((c.longitude - 2.3).abs() < 1e-12);
    }
}
