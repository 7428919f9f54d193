//! `GeoJSON` export of ranked zones.

use city_insights_grid_models::Coordinate;
use city_insights_pipeline::AnalysisResult;
use city_insights_zones_models::{PriorityZone, ZoneBoundary};
use geo::{LineString, Point, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};

/// One feature per priority zone, in rank order.
///
/// Each feature carries the zone boundary as its geometry: a `Point`
/// when every member shares one coordinate, a `LineString` when they
/// are collinear, and a `Polygon` otherwise.
#[must_use]
pub fn to_feature_collection(result: &AnalysisResult) -> GeoJson {
    let features = result
        .priority_zones
        .iter()
        .map(|priority| zone_feature(priority, &result.category))
        .collect();

    GeoJson::FeatureCollection(FeatureCollection {
        bbox: Some(vec![
            result.bbox.min_lon,
            result.bbox.min_lat,
            result.bbox.max_lon,
            result.bbox.max_lat,
        ]),
        features,
        foreign_members: None,
    })
}

fn zone_feature(priority: &PriorityZone, category: &str) -> Feature {
    let zone = &priority.zone;

    let mut properties = JsonObject::new();
    properties.insert("label".to_string(), zone.label.into());
    properties.insert("rank".to_string(), priority.rank.into());
    properties.insert("score".to_string(), priority.score.into());
    properties.insert("population".to_string(), zone.population_mass.into());
    properties.insert("commerceCount".to_string(), zone.commerce_count.into());
    properties.insert("category".to_string(), category.into());
    properties.insert(
        "centroid".to_string(),
        vec![zone.centroid.longitude, zone.centroid.latitude].into(),
    );

    Feature {
        bbox: Some(vec![
            zone.bounds.min_lon,
            zone.bounds.min_lat,
            zone.bounds.max_lon,
            zone.bounds.max_lat,
        ]),
        geometry: Some(boundary_geometry(&zone.boundary)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn boundary_geometry(boundary: &ZoneBoundary) -> Geometry {
    let coordinates = boundary.coordinates();
    let value = match boundary {
        ZoneBoundary::Point { coordinate } => {
            Value::from(&Point::new(coordinate.longitude, coordinate.latitude))
        }
        ZoneBoundary::Segment { .. } => Value::from(&line(&coordinates)),
        ZoneBoundary::Polygon { .. } => Value::from(&Polygon::new(line(&coordinates), vec![])),
    };
    Geometry::new(value)
}

fn line(coordinates: &[Coordinate]) -> LineString<f64> {
    coordinates
        .iter()
        .map(|c| (c.longitude, c.latitude))
        .collect::<Vec<_>>()
        .into()
}
