#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Zone analysis result types.
//!
//! Defines the clustering quality candidates, the zones produced by
//! partitioning the weighted population points, their ranked priority
//! view, and the tuning parameters shared by the clustering and scoring
//! steps.

use city_insights_grid_models::{Coordinate, WeightedPoint};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

/// Quality metrics of one clustering fit for a given `k`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCandidate {
    /// Number of clusters (always >= 2).
    pub k: usize,
    /// Weighted sum of squared distances to the assigned centroid (m²).
    pub inertia: f64,
    /// Mean silhouette coefficient in [-1, 1]. Higher is better.
    pub silhouette_score: f64,
    /// Davies-Bouldin index (>= 0). Lower is better.
    pub davies_bouldin_score: f64,
}

/// Geometry covering the members of a zone.
///
/// Hulls of fewer than three non-collinear points are kept as what they
/// are rather than forced into a polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ZoneBoundary {
    /// All members share one coordinate.
    Point {
        /// The shared coordinate.
        coordinate: Coordinate,
    },
    /// Members are collinear.
    Segment {
        /// One end of the segment.
        start: Coordinate,
        /// The other end.
        end: Coordinate,
    },
    /// Convex hull ring, counter-clockwise, closed (first == last).
    Polygon {
        /// Ring vertices.
        ring: Vec<Coordinate>,
    },
}

impl ZoneBoundary {
    /// Vertices of the boundary in order (a polygon ring includes the
    /// closing vertex).
    #[must_use]
    pub fn coordinates(&self) -> Vec<Coordinate> {
        match self {
            Self::Point { coordinate } => vec![*coordinate],
            Self::Segment { start, end } => vec![*start, *end],
            Self::Polygon { ring } => ring.clone(),
        }
    }
}

/// Axis-aligned extent of a zone's members. Unlike a search box, min may
/// equal max.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneBounds {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl ZoneBounds {
    /// Extent of `points`, or `None` when there are none.
    #[must_use]
    pub fn of(points: &[WeightedPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut bounds = Self {
            min_lat: first.latitude,
            max_lat: first.latitude,
            min_lon: first.longitude,
            max_lon: first.longitude,
        };
        for p in &points[1..] {
            bounds.min_lat = bounds.min_lat.min(p.latitude);
            bounds.max_lat = bounds.max_lat.max(p.latitude);
            bounds.min_lon = bounds.min_lon.min(p.longitude);
            bounds.max_lon = bounds.max_lon.max(p.longitude);
        }
        Some(bounds)
    }
}

/// A spatially coherent group of weighted population points, with the
/// commerce points nearest to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    /// Zone label, 0-based. Label 0 carries the largest population.
    pub label: usize,
    /// Member points, in input order.
    pub member_points: Vec<WeightedPoint>,
    /// Population-weighted centroid of the members.
    pub centroid: Coordinate,
    /// Sum of member weights.
    pub population_mass: f64,
    /// Number of assigned commerce points matching the analyzed category.
    pub commerce_count: usize,
    /// Identifiers of every commerce point assigned to this zone.
    pub commerce_ids: Vec<String>,
    /// Convex boundary of the members.
    pub boundary: ZoneBoundary,
    /// Axis-aligned extent of the members.
    pub bounds: ZoneBounds,
}

/// A zone with its opportunity score and rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityZone {
    /// The scored zone.
    pub zone: Zone,
    /// Demand minus competition, both min-max normalized.
    pub score: f64,
    /// 1-based rank. Rank 1 is the best opportunity.
    pub rank: usize,
}

/// Relative weights of demand and competition in zone scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Weight of normalized population mass.
    pub alpha: f64,
    /// Weight of normalized competing commerce count.
    pub beta: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

/// Tuning parameters for the weighted k-means fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansParams {
    /// RNG seed for k-means++ initialization.
    pub seed: u64,
    /// Maximum Lloyd iterations per run.
    pub max_iterations: usize,
    /// Convergence threshold on the total squared center shift (m²).
    pub tolerance: f64,
    /// Number of independently initialized runs; the lowest inertia wins.
    pub n_init: usize,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            seed: 42,
            max_iterations: 300,
            tolerance: 1e-4,
            n_init: 1,
        }
    }
}

/// How the number of zones is chosen from evaluated candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, AsRefStr)]
#[serde(tag = "policy", rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum KSelection {
    /// Highest silhouette score.
    #[default]
    BestSilhouette,
    /// Lowest Davies-Bouldin index.
    LowestDaviesBouldin,
    /// Knee of the inertia curve.
    Elbow,
    /// Always use the given `k`.
    Fixed {
        /// Number of zones.
        k: usize,
    },
}
