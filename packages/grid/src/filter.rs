//! Bounding-box restriction of the population grid.

use city_insights_grid_models::{BoundingBox, GridCell};

/// Returns the cells of `cells` whose center lies inside `bbox`.
///
/// Bounds are inclusive and input order is preserved. An empty result
/// is not an error: a box outside the dataset's coverage simply
/// intersects nothing.
#[must_use]
pub fn filter(cells: &[GridCell], bbox: &BoundingBox) -> Vec<GridCell> {
    let kept: Vec<GridCell> = cells
        .iter()
        .filter(|cell| bbox.contains(cell.latitude, cell.longitude))
        .copied()
        .collect();

    log::debug!(
        "Grid filter kept {}/{} cells inside lat [{}, {}] lon [{}, {}]",
        kept.len(),
        cells.len(),
        bbox.min_lat,
        bbox.max_lat,
        bbox.min_lon,
        bbox.max_lon
    );

    kept
}
