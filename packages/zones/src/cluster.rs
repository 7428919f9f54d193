//! Partitioning of weighted population points into zones.

use std::collections::BTreeMap;

use city_insights_grid_models::{CommercePoint, Coordinate, WeightedPoint};
use city_insights_zones_models::{KMeansParams, Zone, ZoneBoundary, ZoneBounds};
use geo::{Area, ConvexHull, MultiPoint, Point};
use rstar::RTree;
use rstar::primitives::GeomWithData;

use crate::{
    AnalysisError, coordinate_key, distinct_count, fit_weights, kmeans, project_points,
    weighted_centroid,
};

/// Splits population points into `k` zones and attaches commerce points
/// to the nearest one.
#[derive(Debug, Clone, Copy)]
pub struct ZoneClusterer {
    params: KMeansParams,
    weighted: bool,
    strict_partition: bool,
}

impl Default for ZoneClusterer {
    fn default() -> Self {
        Self::new(KMeansParams::default())
    }
}

/// Zone members before labels are assigned.
struct Draft {
    members: Vec<WeightedPoint>,
    centroid: Coordinate,
    mass: f64,
    bounds: ZoneBounds,
}

impl Draft {
    fn new(members: Vec<WeightedPoint>) -> Option<Self> {
        let bounds = ZoneBounds::of(&members)?;
        Some(Self {
            centroid: weighted_centroid(&members),
            mass: members.iter().map(|p| p.weight).sum(),
            members,
            bounds,
        })
    }
}

impl ZoneClusterer {
    /// Creates a clusterer fitting population-weighted k-means with `params`.
    #[must_use]
    pub const fn new(params: KMeansParams) -> Self {
        Self {
            params,
            weighted: true,
            strict_partition: false,
        }
    }

    /// Whether point weights drive the fit (default) or every point
    /// counts once.
    #[must_use]
    pub const fn with_weighted(mut self, weighted: bool) -> Self {
        self.weighted = weighted;
        self
    }

    /// When set, asking for at least as many zones as there are distinct
    /// points is an error instead of yielding one zone per point.
    #[must_use]
    pub const fn with_strict_partition(mut self, strict: bool) -> Self {
        self.strict_partition = strict;
        self
    }

    /// Partitions `points` into `k` zones.
    ///
    /// Every point lands in exactly one zone and every commerce point is
    /// listed by exactly one zone (the one with the nearest centroid).
    /// Commerce points never influence the partition. Zones are labeled
    /// by descending population mass.
    ///
    /// When `k` is at least the number of distinct coordinates, each
    /// distinct coordinate becomes its own zone.
    ///
    /// # Errors
    ///
    /// * [`AnalysisError::InvalidParameter`] if `k` is 0, a weight is not
    ///   positive, or `k` reaches the distinct point count under strict
    ///   partitioning.
    /// * [`AnalysisError::EmptyInput`] if `points` is empty.
    pub fn cluster(
        &self,
        points: &[WeightedPoint],
        commerces: &[CommercePoint],
        category: &str,
        k: usize,
    ) -> Result<Vec<Zone>, AnalysisError> {
        if k == 0 {
            return Err(AnalysisError::invalid("k must be at least 1"));
        }
        if points.is_empty() {
            return Err(AnalysisError::EmptyInput {
                message: "no population points to cluster".to_string(),
            });
        }

        let weights = fit_weights(points, self.weighted)?;
        let distinct = distinct_count(points);
        let (projection, projected) = project_points(points);

        let labels = if k >= distinct {
            if self.strict_partition {
                return Err(AnalysisError::invalid(format!(
                    "k={k} needs more than {distinct} distinct points"
                )));
            }
            log::info!("k={k} covers all {distinct} distinct points, one zone per point");
            labels_by_coordinate(points)
        } else {
            kmeans::fit(&projected, &weights, k, &self.params)?.labels
        };

        let mut drafts = group(points, &labels);
        if drafts.len() < k.min(distinct) {
            log::warn!(
                "Requested {k} zones but only {} ended up with members",
                drafts.len()
            );
        }

        drafts.sort_by(|a, b| {
            b.mass
                .total_cmp(&a.mass)
                .then(a.centroid.latitude.total_cmp(&b.centroid.latitude))
                .then(a.centroid.longitude.total_cmp(&b.centroid.longitude))
        });

        let tree = RTree::bulk_load(
            drafts
                .iter()
                .enumerate()
                .map(|(label, d)| GeomWithData::new(projection.project(d.centroid), label))
                .collect(),
        );

        let mut commerce_ids = vec![Vec::new(); drafts.len()];
        let mut commerce_counts = vec![0_usize; drafts.len()];
        for commerce in commerces {
            let Some(nearest) = tree.nearest_neighbor(&projection.project(commerce.coordinate()))
            else {
                continue;
            };
            commerce_ids[nearest.data].push(commerce.id.clone());
            if commerce.matches_category(category) {
                commerce_counts[nearest.data] += 1;
            }
        }

        let zones: Vec<Zone> = drafts
            .into_iter()
            .zip(commerce_ids.into_iter().zip(commerce_counts))
            .enumerate()
            .map(|(label, (draft, (ids, count)))| Zone {
                label,
                boundary: boundary(&draft.members),
                centroid: draft.centroid,
                population_mass: draft.mass,
                commerce_count: count,
                commerce_ids: ids,
                bounds: draft.bounds,
                member_points: draft.members,
            })
            .collect();

        log::debug!(
            "Built {} zones from {} points and {} commerce points",
            zones.len(),
            points.len(),
            commerces.len()
        );

        Ok(zones)
    }
}

/// One label per distinct coordinate, numbered by first appearance.
fn labels_by_coordinate(points: &[WeightedPoint]) -> Vec<usize> {
    let mut seen = BTreeMap::new();
    points
        .iter()
        .map(|p| {
            let next = seen.len();
            *seen.entry(coordinate_key(p)).or_insert(next)
        })
        .collect()
}

/// Non-empty groups of points by label, members in input order.
fn group(points: &[WeightedPoint], labels: &[usize]) -> Vec<Draft> {
    let count = labels.iter().max().map_or(0, |m| m + 1);
    let mut members = vec![Vec::new(); count];
    for (point, &label) in points.iter().zip(labels) {
        members[label].push(*point);
    }
    members.into_iter().filter_map(Draft::new).collect()
}

/// Convex boundary of `members`, degenerate hulls kept as a point or a
/// segment.
fn boundary(members: &[WeightedPoint]) -> ZoneBoundary {
    let multi: MultiPoint<f64> = members
        .iter()
        .map(|p| Point::new(p.longitude, p.latitude))
        .collect();
    let hull = multi.convex_hull();

    if hull.unsigned_area() > 0.0 {
        return ZoneBoundary::Polygon {
            ring: hull
                .exterior()
                .coords()
                .map(|c| Coordinate::new(c.y, c.x))
                .collect(),
        };
    }

    let by_lon_lat = |a: &&WeightedPoint, b: &&WeightedPoint| {
        a.longitude
            .total_cmp(&b.longitude)
            .then(a.latitude.total_cmp(&b.latitude))
    };
    let (Some(start), Some(end)) = (
        members.iter().min_by(by_lon_lat),
        members.iter().max_by(by_lon_lat),
    ) else {
        return ZoneBoundary::Polygon { ring: Vec::new() };
    };

    if coordinate_key(start) == coordinate_key(end) {
        ZoneBoundary::Point {
            coordinate: start.coordinate(),
        }
    } else {
        ZoneBoundary::Segment {
            start: start.coordinate(),
            end: end.coordinate(),
        }
    }
}
