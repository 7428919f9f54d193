#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Population grid and point-of-interest types.
//!
//! These types describe the raw inputs of a zoning analysis: population
//! grid cells from the national statistics carroyage, the bounding box of
//! the studied city, the existing commerces of the analyzed category, and
//! the weighted sample points the clustering runs on.

pub mod category;
pub mod projection;

use serde::{Deserialize, Serialize};

pub use category::normalize_category;
pub use projection::LocalProjection;

/// Minimum span (degrees) given to a bounding box axis that would
/// otherwise have zero extent. Roughly 100 m of latitude.
const MIN_SPAN_DEG: f64 = 0.001;

/// A latitude/longitude pair in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinate {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether the coordinate lies within WGS84 ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_valid_wgs84(self.latitude, self.longitude)
    }
}

/// Returns `true` when `lat`/`lon` are finite and within WGS84 ranges.
#[must_use]
pub fn is_valid_wgs84(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
}

/// A single population grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridCell {
    /// Latitude of the cell center.
    pub latitude: f64,
    /// Longitude of the cell center.
    pub longitude: f64,
    /// Number of inhabitants in the cell.
    pub population: u64,
}

impl GridCell {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64, population: u64) -> Self {
        Self {
            latitude,
            longitude,
            population,
        }
    }

    /// Whether the cell center lies within WGS84 ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_valid_wgs84(self.latitude, self.longitude)
    }
}

/// Error returned when a [`BoundingBox`] would have `min >= max` on an
/// axis or non-finite bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidBoundingBox {
    /// Southern bound that was provided.
    pub min_lat: f64,
    /// Northern bound that was provided.
    pub max_lat: f64,
    /// Western bound that was provided.
    pub min_lon: f64,
    /// Eastern bound that was provided.
    pub max_lon: f64,
}

impl std::fmt::Display for InvalidBoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid bounding box lat [{}, {}] lon [{}, {}]: expected min < max on each axis",
            self.min_lat, self.max_lat, self.min_lon, self.max_lon
        )
    }
}

impl std::error::Error for InvalidBoundingBox {}

/// An axis-aligned latitude/longitude box.
///
/// Always satisfies `min_lat < max_lat` and `min_lon < max_lon` when built
/// through [`BoundingBox::new`] or [`BoundingBox::from_points`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    /// Southern bound.
    pub min_lat: f64,
    /// Northern bound.
    pub max_lat: f64,
    /// Western bound.
    pub min_lon: f64,
    /// Eastern bound.
    pub max_lon: f64,
}

impl BoundingBox {
    /// Creates a bounding box from its bounds.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidBoundingBox`] if a bound is not finite or
    /// `min >= max` on either axis.
    pub fn new(
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
    ) -> Result<Self, InvalidBoundingBox> {
        let finite = [min_lat, max_lat, min_lon, max_lon]
            .iter()
            .all(|v| v.is_finite());

        if !finite || min_lat >= max_lat || min_lon >= max_lon {
            return Err(InvalidBoundingBox {
                min_lat,
                max_lat,
                min_lon,
                max_lon,
            });
        }

        Ok(Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        })
    }

    /// Derives the box enclosing `points`, padded by `margin_ratio` of its
    /// height and width on every side.
    ///
    /// An axis with zero extent (a single point, or points on a line) is
    /// padded by a small fixed span so the result stays a valid box.
    /// Returns `None` when `points` holds no valid coordinate.
    #[must_use]
    pub fn from_points<I>(points: I, margin_ratio: f64) -> Option<Self>
    where
        I: IntoIterator<Item = Coordinate>,
    {
        let mut bounds: Option<(f64, f64, f64, f64)> = None;

        for point in points.into_iter().filter(Coordinate::is_valid) {
            let (lat, lon) = (point.latitude, point.longitude);
            bounds = Some(match bounds {
                None => (lat, lat, lon, lon),
                Some((s, n, w, e)) => (s.min(lat), n.max(lat), w.min(lon), e.max(lon)),
            });
        }

        let (mut south, mut north, mut west, mut east) = bounds?;

        if north - south <= 0.0 {
            south -= MIN_SPAN_DEG / 2.0;
            north += MIN_SPAN_DEG / 2.0;
        }
        if east - west <= 0.0 {
            west -= MIN_SPAN_DEG / 2.0;
            east += MIN_SPAN_DEG / 2.0;
        }

        Some(
            Self {
                min_lat: south,
                max_lat: north,
                min_lon: west,
                max_lon: east,
            }
            .expand(margin_ratio),
        )
    }

    /// Grows the box by `ratio` of its height and width on every side.
    ///
    /// `ratio` is clamped to `[0, 1]` and the result is clamped to WGS84
    /// limits, so `expand(0.35)` turns a city box into "city and
    /// surroundings".
    #[must_use]
    pub fn expand(&self, ratio: f64) -> Self {
        let ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let pad_lat = (self.max_lat - self.min_lat) * ratio;
        let pad_lon = (self.max_lon - self.min_lon) * ratio;

        Self {
            min_lat: (self.min_lat - pad_lat).max(-90.0),
            max_lat: (self.max_lat + pad_lat).min(90.0),
            min_lon: (self.min_lon - pad_lon).max(-180.0),
            max_lon: (self.max_lon + pad_lon).min(180.0),
        }
    }

    /// Inclusive containment test.
    #[must_use]
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.min_lat
            && latitude <= self.max_lat
            && longitude >= self.min_lon
            && longitude <= self.max_lon
    }

    /// Midpoint of the box.
    #[must_use]
    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }
}

/// A sample point standing in for an aggregated population mass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedPoint {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Number of people this point represents. Always positive.
    pub weight: f64,
}

impl WeightedPoint {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64, weight: f64) -> Self {
        Self {
            latitude,
            longitude,
            weight,
        }
    }

    #[must_use]
    pub const fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// An existing commerce fetched from the point-of-interest source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommercePoint {
    /// Source identifier (e.g. an OSM element ID).
    pub id: String,
    /// Display name, empty when the source has none.
    #[serde(default)]
    pub name: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Commerce category key (e.g. `"bakery"`).
    pub category: String,
}

impl CommercePoint {
    #[must_use]
    pub const fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Whether this commerce belongs to `category` after normalization.
    #[must_use]
    pub fn matches_category(&self, category: &str) -> bool {
        normalize_category(&self.category) == normalize_category(category)
    }
}
