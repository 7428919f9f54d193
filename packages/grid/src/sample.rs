//! Density-preserving reduction of grid cells to weighted sample points.
//!
//! A city box can hold tens of thousands of 200 m cells, far more than
//! clustering or display needs. [`sample`] reduces them to at most
//! `budget` points. When aggregation is needed, populated cells are
//! binned on a square grid in a local metric projection; the bin size is
//! the finest one whose number of non-empty bins still fits the budget.
//! Each bin becomes one point at the population-weighted centroid of its
//! cells, carrying their summed population.

use std::collections::{BTreeMap, BTreeSet};

use city_insights_grid_models::{Coordinate, GridCell, LocalProjection, WeightedPoint};

/// Upper bound on bins along the longer axis during the resolution
/// search. Finer than any realistic grid spacing over a city.
const MAX_DIVISIONS: i64 = 1 << 20;

#[derive(Default)]
struct BinAccumulator {
    population: u64,
    lat_sum: f64,
    lon_sum: f64,
}

/// Bin geometry for one candidate resolution.
struct Binning {
    min_x: f64,
    min_y: f64,
    side: f64,
    divisions: i64,
}

impl Binning {
    #[allow(clippy::cast_precision_loss)]
    fn new(min_x: f64, min_y: f64, span: f64, divisions: i64) -> Self {
        Self {
            min_x,
            min_y,
            side: span / divisions as f64,
            divisions,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn key(&self, xy: [f64; 2]) -> (i64, i64) {
        let col = ((xy[0] - self.min_x) / self.side).floor() as i64;
        let row = ((xy[1] - self.min_y) / self.side).floor() as i64;
        (
            row.clamp(0, self.divisions - 1),
            col.clamp(0, self.divisions - 1),
        )
    }

    fn occupied(&self, projected: &[[f64; 2]]) -> usize {
        projected
            .iter()
            .map(|xy| self.key(*xy))
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Reduces `cells` to at most `budget` weighted points.
///
/// Empty cells are ignored. When there are no more populated cells than
/// `budget`, each becomes its own point (in input order). The weights of
/// the output always sum to the total population of `cells` and are all
/// strictly positive. A total population of zero yields an empty result.
///
/// A `budget` of zero is treated as one.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sample(cells: &[GridCell], budget: usize) -> Vec<WeightedPoint> {
    let budget = budget.max(1);
    let populated: Vec<&GridCell> = cells.iter().filter(|c| c.population > 0).collect();

    if populated.is_empty() {
        log::debug!("No populated cells to sample");
        return Vec::new();
    }

    if populated.len() <= budget {
        log::debug!(
            "{} populated cells fit the sampling budget of {budget}, no aggregation",
            populated.len()
        );
        return populated
            .iter()
            .map(|c| WeightedPoint::new(c.latitude, c.longitude, c.population as f64))
            .collect();
    }

    let projection = LocalProjection::centered_on(
        populated
            .iter()
            .map(|c| Coordinate::new(c.latitude, c.longitude)),
    );
    let projected: Vec<[f64; 2]> = populated
        .iter()
        .map(|c| projection.project(Coordinate::new(c.latitude, c.longitude)))
        .collect();

    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for [x, y] in &projected {
        min_x = min_x.min(*x);
        min_y = min_y.min(*y);
        max_x = max_x.max(*x);
        max_y = max_y.max(*y);
    }
    let span = (max_x - min_x).max(max_y - min_y);

    // Coincident cells have no extent; any positive span puts them in one bin.
    let (span, divisions) = if span > 0.0 {
        (span, finest_divisions(&projected, min_x, min_y, span, budget))
    } else {
        (1.0, 1)
    };
    let binning = Binning::new(min_x, min_y, span, divisions);

    let mut bins: BTreeMap<(i64, i64), BinAccumulator> = BTreeMap::new();
    for (cell, xy) in populated.iter().zip(&projected) {
        let bin = bins.entry(binning.key(*xy)).or_default();
        let pop = cell.population as f64;
        bin.population += cell.population;
        bin.lat_sum += cell.latitude * pop;
        bin.lon_sum += cell.longitude * pop;
    }

    let points: Vec<WeightedPoint> = bins
        .into_values()
        .map(|bin| {
            let weight = bin.population as f64;
            WeightedPoint::new(bin.lat_sum / weight, bin.lon_sum / weight, weight)
        })
        .collect();

    log::debug!(
        "Aggregated {} populated cells into {} points ({divisions} divisions, budget {budget})",
        populated.len(),
        points.len()
    );

    points
}

/// Binary-searches the largest division count whose non-empty bin count
/// fits `budget`. One division always fits (a single bin).
fn finest_divisions(
    projected: &[[f64; 2]],
    min_x: f64,
    min_y: f64,
    span: f64,
    budget: usize,
) -> i64 {
    let (mut lo, mut hi) = (1_i64, MAX_DIVISIONS);

    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if Binning::new(min_x, min_y, span, mid).occupied(projected) <= budget {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    lo
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `n x n` cells spaced ~200 m apart starting at Paris.
    fn square_grid(n: u32, population: u64) -> Vec<GridCell> {
        let mut cells = Vec::new();
        for i in 0..n {
            for j in 0..n {
                cells.push(GridCell::new(
                    48.85 + f64::from(i) * 0.0018,
                    2.35 + f64::from(j) * 0.0027,
                    population,
                ));
            }
        }
        cells
    }

    #[allow(clippy::cast_precision_loss)]
    fn total(cells: &[GridCell]) -> f64 {
        cells.iter().map(|c| c.population as f64).sum()
    }

    fn weight_sum(points: &[WeightedPoint]) -> f64 {
        points.iter().map(|p| p.weight).sum()
    }

    #[test]
    fn zero_population_yields_empty() {
        let cells = square_grid(5, 0);
        assert!(sample(&cells, 10).is_empty());
        assert!(sample(&[], 10).is_empty());
    }

    #[test]
    fn small_input_passes_through() {
        let mut cells = square_grid(3, 7);
        cells.push(GridCell::new(48.9, 2.4, 0));
        let points = sample(&cells, 100);

        assert_eq!(points.len(), 9);
        for (point, cell) in points.iter().zip(&cells) {
            assert!((point.latitude - cell.latitude).abs() < f64::EPSILON);
            assert!((point.weight - 7.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn aggregation_respects_budget_and_mass() {
        let cells = square_grid(30, 13);
        for budget in [1, 5, 20, 64, 250, 899] {
            let points = sample(&cells, budget);
            assert!(!points.is_empty());
            assert!(
                points.len() <= budget,
                "budget {budget} exceeded: {}",
                points.len()
            );
            assert!((weight_sum(&points) - total(&cells)).abs() < 1e-6);
            assert!(points.iter().all(|p| p.weight > 0.0));
        }
    }

    #[test]
    fn aggregation_uses_most_of_the_budget() {
        let cells = square_grid(30, 1);
        let points = sample(&cells, 100);
        assert!(points.len() >= 25, "only {} points", points.len());
    }

    #[test]
    fn uneven_populations_keep_their_mass() {
        let mut cells = square_grid(20, 1);
        for (i, cell) in cells.iter_mut().enumerate() {
            cell.population = (u64::try_from(i).unwrap() * 37) % 500;
        }
        let points = sample(&cells, 17);
        assert!(points.len() <= 17);
        assert!((weight_sum(&points) - total(&cells)).abs() < 1e-6);
        assert!(points.iter().all(|p| p.weight > 0.0));
    }

    #[test]
    fn centroid_is_population_weighted() {
        let cells = vec![
            GridCell::new(48.0, 2.0, 1),
            GridCell::new(48.0, 2.001, 3),
            GridCell::new(48.0, 2.002, 0),
        ];
        let points = sample(&cells, 1);
        assert_eq!(points.len(), 1);
        assert!((points[0].longitude - 2.00075).abs() < 1e-9);
        assert!((points[0].weight - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn coincident_cells_collapse() {
        let cells = vec![GridCell::new(48.0, 2.0, 5); 4];
        let points = sample(&cells, 2);
        assert_eq!(points.len(), 1);
        assert!((points[0].weight - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_budget_is_treated_as_one() {
        let cells = square_grid(4, 2);
        let points = sample(&cells, 0);
        assert_eq!(points.len(), 1);
        assert!((points[0].weight - 32.0).abs() < f64::EPSILON);
    }

    #[test]
    fn output_is_deterministic() {
        let cells = square_grid(25, 3);
        assert_eq!(sample(&cells, 40), sample(&cells, 40));
    }
}
