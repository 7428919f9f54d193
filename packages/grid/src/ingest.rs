//! Loading of population grid and commerce inputs from disk.
//!
//! The national carroyage CSV is large (millions of rows), so it is
//! streamed row by row through `csv` + `serde` and optionally pre-filtered
//! to a bounding box before anything is kept in memory. Two layouts are
//! supported:
//!
//! - [`GridCsvFormat::LatLon`]: `lat`, `lon`, `population` columns in WGS84.
//! - [`GridCsvFormat::InseeLaea`]: the INSEE layout with `X`, `Y` cell
//!   coordinates in ETRS89-LAEA (EPSG:3035) divided by a scale factor,
//!   and the population in `ind_c`.
//!
//! Commerce inputs come from the point-of-interest collaborator as a JSON
//! document (see [`CommerceDocument`]).

use std::io::Read;
use std::path::Path;

use city_insights_grid_models::{BoundingBox, CommercePoint, Coordinate, GridCell, normalize_category};
use serde::Deserialize;

use crate::GridError;

// ── ETRS89-LAEA (EPSG:3035) parameters ───────────────────────────────────

/// GRS80 semi-major axis.
const GRS80_A: f64 = 6_378_137.0;
/// GRS80 inverse flattening.
const GRS80_INV_F: f64 = 298.257_222_101;
/// Latitude of natural origin (degrees).
const LAEA_LAT0: f64 = 52.0;
/// Longitude of natural origin (degrees).
const LAEA_LON0: f64 = 10.0;
/// False easting (meters).
const LAEA_FALSE_EASTING: f64 = 4_321_000.0;
/// False northing (meters).
const LAEA_FALSE_NORTHING: f64 = 3_210_000.0;

/// Default divisor applied to INSEE `X`/`Y` columns.
pub const DEFAULT_INSEE_SCALE: f64 = 100.0;

/// Column layout of a grid CSV file.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum GridCsvFormat {
    /// WGS84 `lat`/`lon` columns with a `population` column.
    #[default]
    LatLon,
    /// INSEE carroyage: `X`/`Y` in EPSG:3035 meters divided by `scale`,
    /// population in `ind_c`.
    InseeLaea {
        /// Multiplier turning the `X`/`Y` columns back into meters.
        scale: f64,
    },
}

#[derive(Debug, Deserialize)]
struct LatLonRow {
    #[serde(alias = "latitude")]
    lat: f64,
    #[serde(alias = "longitude", alias = "lng")]
    lon: f64,
    #[serde(default, alias = "pop")]
    population: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct InseeRow {
    #[serde(rename = "X")]
    x: f64,
    #[serde(rename = "Y")]
    y: f64,
    #[serde(default)]
    ind_c: Option<f64>,
}

/// Converts a possibly fractional, possibly missing population value to
/// a whole head count. Missing, negative, or non-finite values count as 0.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn head_count(value: Option<f64>) -> u64 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v.round() as u64,
        _ => 0,
    }
}

/// Loads grid cells from a CSV file.
///
/// Cells with invalid coordinates are skipped with a warning. When
/// `within` is given, only cells inside it are kept.
///
/// # Errors
///
/// Returns [`GridError`] if the file cannot be opened or read.
pub fn load_grid_csv(
    path: &Path,
    format: GridCsvFormat,
    within: Option<&BoundingBox>,
) -> Result<Vec<GridCell>, GridError> {
    log::info!("Loading population grid from {}", path.display());
    let file = std::fs::File::open(path)?;
    let cells = read_grid_csv(file, format, within)?;
    log::info!("Loaded {} grid cells from {}", cells.len(), path.display());
    Ok(cells)
}

/// Reads grid cells from any CSV source. See [`load_grid_csv`].
///
/// # Errors
///
/// Returns [`GridError`] on I/O failure or when the header lacks the
/// columns required by `format`.
pub fn read_grid_csv<R: Read>(
    reader: R,
    format: GridCsvFormat,
    within: Option<&BoundingBox>,
) -> Result<Vec<GridCell>, GridError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut cells = Vec::new();
    let mut malformed = 0_u64;
    let mut invalid = 0_u64;

    let mut keep = |cell: GridCell, cells: &mut Vec<GridCell>| {
        if !cell.is_valid() {
            invalid += 1;
            return;
        }
        if within.is_none_or(|bbox| bbox.contains(cell.latitude, cell.longitude)) {
            cells.push(cell);
        }
    };

    match format {
        GridCsvFormat::LatLon => {
            require_columns(
                &mut csv_reader,
                &[&["lat", "latitude"], &["lon", "longitude", "lng"]],
            )?;
            for row in csv_reader.deserialize::<LatLonRow>() {
                match row {
                    Ok(row) => keep(
                        GridCell::new(row.lat, row.lon, head_count(row.population)),
                        &mut cells,
                    ),
                    Err(e) if e.is_io_error() => return Err(e.into()),
                    Err(e) => {
                        malformed += 1;
                        log::trace!("Skipping malformed grid row: {e}");
                    }
                }
            }
        }
        GridCsvFormat::InseeLaea { scale } => {
            require_columns(&mut csv_reader, &[&["X"], &["Y"]])?;
            for row in csv_reader.deserialize::<InseeRow>() {
                match row {
                    Ok(row) => {
                        let coord = laea_to_wgs84(row.x * scale, row.y * scale);
                        keep(
                            GridCell::new(coord.latitude, coord.longitude, head_count(row.ind_c)),
                            &mut cells,
                        );
                    }
                    Err(e) if e.is_io_error() => return Err(e.into()),
                    Err(e) => {
                        malformed += 1;
                        log::trace!("Skipping malformed grid row: {e}");
                    }
                }
            }
        }
    }

    if malformed > 0 {
        log::warn!("Skipped {malformed} malformed grid rows");
    }
    if invalid > 0 {
        log::warn!("Skipped {invalid} grid cells with coordinates outside WGS84 ranges");
    }

    Ok(cells)
}

/// Fails early with a readable message when the header misses a column,
/// instead of silently skipping every row as malformed.
fn require_columns<R: Read>(
    reader: &mut csv::Reader<R>,
    required: &[&[&str]],
) -> Result<(), GridError> {
    let headers = reader.headers()?;
    for names in required {
        if !headers.iter().any(|h| names.contains(&h)) {
            return Err(GridError::Conversion {
                message: format!("grid CSV is missing required column '{}'", names[0]),
            });
        }
    }
    Ok(())
}

/// Inverse ellipsoidal Lambert azimuthal equal-area projection for
/// ETRS89-LAEA (EPSG:3035), after EPSG Guidance Note 7-2 §3.3.4.
#[must_use]
pub fn laea_to_wgs84(easting: f64, northing: f64) -> Coordinate {
    let f = 1.0 / GRS80_INV_F;
    let e2 = 2.0f64.mul_add(f, -(f * f));
    let e = e2.sqrt();
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    let q = |phi: f64| {
        let s = phi.sin();
        (1.0 - e2)
            * ((s / (1.0 - e2 * s * s)) - (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln())
    };

    let phi0 = LAEA_LAT0.to_radians();
    let q_p = q(std::f64::consts::FRAC_PI_2);
    let q_0 = q(phi0);
    let beta0 = (q_0 / q_p).asin();
    let r_q = GRS80_A * (q_p / 2.0).sqrt();
    let d = GRS80_A * (phi0.cos() / (1.0 - e2 * phi0.sin().powi(2)).sqrt()) / (r_q * beta0.cos());

    let dx = easting - LAEA_FALSE_EASTING;
    let dy = northing - LAEA_FALSE_NORTHING;
    let rho = ((dx / d).powi(2) + (d * dy).powi(2)).sqrt();

    if rho < 1e-9 {
        return Coordinate::new(LAEA_LAT0, LAEA_LON0);
    }

    let c = 2.0 * (rho / (2.0 * r_q)).asin();
    let beta = (c.cos() * beta0.sin() + (d * dy * c.sin() * beta0.cos()) / rho).asin();

    let phi = beta
        + (e2 / 3.0 + 31.0 * e4 / 180.0 + 517.0 * e6 / 5040.0) * (2.0 * beta).sin()
        + (23.0 * e4 / 360.0 + 251.0 * e6 / 3780.0) * (4.0 * beta).sin()
        + (761.0 * e6 / 45360.0) * (6.0 * beta).sin();

    let lambda = LAEA_LON0.to_radians()
        + (dx * c.sin()).atan2(
            d * rho * beta0.cos() * c.cos() - d * d * dy * beta0.sin() * c.sin(),
        );

    Coordinate::new(phi.to_degrees(), lambda.to_degrees())
}

// ── Commerce documents ───────────────────────────────────────────────────

/// Category block of a commerce document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryInfo {
    /// Machine key (e.g. `"bakery"`).
    #[serde(default)]
    pub key: Option<String>,
    /// Human label (e.g. `"boulangerie"`).
    #[serde(default)]
    pub label: Option<String>,
}

/// Bounding box as written by the point-of-interest collaborator.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawBoundingBox {
    /// Southern bound.
    pub south: f64,
    /// Western bound.
    pub west: f64,
    /// Northern bound.
    pub north: f64,
    /// Eastern bound.
    pub east: f64,
}

/// A single place entry. Identifiers may be strings or numbers.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPlace {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
}

/// Point-of-interest result document: the city, the category, the box
/// that was searched, and the places found (under `items` or `places`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommerceDocument {
    /// City name as resolved by the geocoder.
    #[serde(default)]
    pub city: Option<String>,
    /// Category searched for.
    #[serde(default)]
    pub category: Option<CategoryInfo>,
    /// Box that was searched.
    #[serde(default)]
    pub bbox: Option<RawBoundingBox>,
    #[serde(default)]
    items: Vec<RawPlace>,
    #[serde(default)]
    places: Vec<RawPlace>,
}

/// Commerce inputs resolved from a [`CommerceDocument`].
#[derive(Debug, Clone)]
pub struct CommerceInput {
    /// City name, if the document carried one.
    pub city: Option<String>,
    /// Normalized category key.
    pub category: Option<String>,
    /// Searched box, if present and valid.
    pub bbox: Option<BoundingBox>,
    /// Commerce points with valid coordinates.
    pub points: Vec<CommercePoint>,
}

impl CommerceDocument {
    /// Normalized category key, preferring `key` over `label`.
    #[must_use]
    pub fn category_key(&self) -> Option<String> {
        let info = self.category.as_ref()?;
        info.key
            .as_deref()
            .or(info.label.as_deref())
            .filter(|s| !s.trim().is_empty())
            .map(normalize_category)
    }

    /// Resolves the document into typed commerce points.
    ///
    /// Places without valid coordinates are skipped. `fallback_category`
    /// is used when the document carries no category.
    #[must_use]
    pub fn into_input(self, fallback_category: Option<&str>) -> CommerceInput {
        let category = self
            .category_key()
            .or_else(|| fallback_category.map(normalize_category));
        let point_category = category.clone().unwrap_or_default();

        let bbox = self.bbox.and_then(|b| {
            BoundingBox::new(b.south, b.north, b.west, b.east)
                .inspect_err(|e| log::warn!("Ignoring commerce document bbox: {e}"))
                .ok()
        });

        let places = if self.items.is_empty() {
            self.places
        } else {
            self.items
        };
        let total = places.len();

        let points: Vec<CommercePoint> = places
            .into_iter()
            .enumerate()
            .filter_map(|(idx, place)| {
                let (Some(lat), Some(lon)) = (place.lat, place.lon) else {
                    return None;
                };
                if !Coordinate::new(lat, lon).is_valid() {
                    return None;
                }
                let id = match place.id {
                    Some(serde_json::Value::String(s)) => s,
                    Some(serde_json::Value::Number(n)) => n.to_string(),
                    _ => format!("place-{idx}"),
                };
                Some(CommercePoint {
                    id,
                    name: place.name.unwrap_or_default(),
                    latitude: lat,
                    longitude: lon,
                    category: point_category.clone(),
                })
            })
            .collect();

        if points.len() < total {
            log::warn!(
                "Skipped {} of {total} places without valid coordinates",
                total - points.len()
            );
        }

        CommerceInput {
            city: self.city,
            category,
            bbox,
            points,
        }
    }
}

/// Loads and resolves a commerce document from a JSON file.
///
/// # Errors
///
/// Returns [`GridError`] if the file cannot be read or is not valid JSON.
pub fn load_commerce_json(
    path: &Path,
    fallback_category: Option<&str>,
) -> Result<CommerceInput, GridError> {
    let content = std::fs::read_to_string(path)?;
    let document: CommerceDocument = serde_json::from_str(&content)?;
    let input = document.into_input(fallback_category);
    log::info!(
        "Loaded {} commerce points from {}",
        input.points.len(),
        path.display()
    );
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn laea_origin_maps_to_natural_origin() {
        let coord = laea_to_wgs84(LAEA_FALSE_EASTING, LAEA_FALSE_NORTHING);
        assert!((coord.latitude - 52.0).abs() < 1e-12);
        assert!((coord.longitude - 10.0).abs() < 1e-12);
    }

    #[test]
    fn laea_matches_epsg_worked_example() {
        // EPSG Guidance Note 7-2 example: 50°N 5°E.
        let coord = laea_to_wgs84(3_962_799.45, 2_999_718.85);
        assert!((coord.latitude - 50.0).abs() < 1e-5, "lat {}", coord.latitude);
        assert!((coord.longitude - 5.0).abs() < 1e-5, "lon {}", coord.longitude);
    }

    #[test]
    fn reads_lat_lon_layout() {
        let data = "lat,lon,population\n48.85,2.35,120\n48.86,2.36,\n48.87,2.37,-4\n";
        let cells = read_grid_csv(data.as_bytes(), GridCsvFormat::LatLon, None).unwrap();
        assert_eq!(
            cells,
            vec![
                GridCell::new(48.85, 2.35, 120),
                GridCell::new(48.86, 2.36, 0),
                GridCell::new(48.87, 2.37, 0),
            ]
        );
    }

    #[test]
    fn default_format_is_lat_lon() {
        let data = "lat,lon,population\n48.85,2.35,3\n";
        assert_eq!(GridCsvFormat::default(), GridCsvFormat::LatLon);
        let cells = read_grid_csv(data.as_bytes(), GridCsvFormat::default(), None).unwrap();
        assert_eq!(cells, vec![GridCell::new(48.85, 2.35, 3)]);
    }

    #[test]
    fn lat_lon_layout_accepts_aliases() {
        let data = "latitude,longitude,pop\n48.85,2.35,12.6\n";
        let cells = read_grid_csv(data.as_bytes(), GridCsvFormat::LatLon, None).unwrap();
        assert_eq!(cells, vec![GridCell::new(48.85, 2.35, 13)]);
    }

    #[test]
    fn skips_invalid_and_malformed_rows() {
        let data = "lat,lon,population\n95.0,2.35,10\nabc,2.0,1\n48.85,2.35,7\n";
        let cells = read_grid_csv(data.as_bytes(), GridCsvFormat::LatLon, None).unwrap();
        assert_eq!(cells, vec![GridCell::new(48.85, 2.35, 7)]);
    }

    #[test]
    fn prefilters_to_bbox() {
        let data = "lat,lon,population\n48.85,2.35,10\n45.75,4.85,20\n";
        let paris = BoundingBox::new(48.8, 48.9, 2.2, 2.5).unwrap();
        let cells = read_grid_csv(data.as_bytes(), GridCsvFormat::LatLon, Some(&paris)).unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].population, 10);
    }

    #[test]
    fn missing_column_is_an_error() {
        let data = "x,y,population\n1,2,3\n";
        let err = read_grid_csv(data.as_bytes(), GridCsvFormat::LatLon, None).unwrap_err();
        assert!(matches!(err, GridError::Conversion { .. }));
    }

    #[test]
    fn reads_insee_layout() {
        let data = "X,Y,ind_c\n39627.9945,29997.1885,42.4\n";
        let cells = read_grid_csv(
            data.as_bytes(),
            GridCsvFormat::InseeLaea {
                scale: DEFAULT_INSEE_SCALE,
            },
            None,
        )
        .unwrap();
        assert_eq!(cells.len(), 1);
        assert!((cells[0].latitude - 50.0).abs() < 1e-4);
        assert!((cells[0].longitude - 5.0).abs() < 1e-4);
        assert_eq!(cells[0].population, 42);
    }

    #[test]
    fn commerce_document_with_items() {
        let json = r#"{
            "city": "Lyon",
            "category": {"key": "bakery", "label": "boulangerie"},
            "bbox": {"south": 45.70, "west": 4.77, "north": 45.81, "east": 4.90},
            "items": [
                {"id": 101, "name": "Chez Paul", "lat": 45.76, "lon": 4.83},
                {"id": "node/7", "lat": 45.75, "lon": 4.84},
                {"name": "no coords"}
            ]
        }"#;
        let document: CommerceDocument = serde_json::from_str(json).unwrap();
        let input = document.into_input(None);

        assert_eq!(input.city.as_deref(), Some("Lyon"));
        assert_eq!(input.category.as_deref(), Some("bakery"));
        assert!(input.bbox.is_some());
        assert_eq!(input.points.len(), 2);
        assert_eq!(input.points[0].id, "101");
        assert_eq!(input.points[1].id, "node/7");
        assert!(input.points.iter().all(|p| p.category == "bakery"));
    }

    #[test]
    fn commerce_document_with_places_and_fallback_category() {
        let json = r#"{"places": [{"lat": 48.85, "lon": 2.35}]}"#;
        let document: CommerceDocument = serde_json::from_str(json).unwrap();
        let input = document.into_input(Some("Boulangerie"));

        assert_eq!(input.category.as_deref(), Some("boulangerie"));
        assert_eq!(input.points.len(), 1);
        assert_eq!(input.points[0].id, "place-0");
        assert!(input.bbox.is_none());
    }

    #[test]
    fn label_is_used_when_key_is_missing() {
        let json = r#"{"category": {"label": "Épicerie"}, "items": []}"#;
        let document: CommerceDocument = serde_json::from_str(json).unwrap();
        assert_eq!(document.category_key().as_deref(), Some("epicerie"));
    }
}
