//! Population density distribution over the cells of a study area.

use city_insights_grid_models::GridCell;
use serde::{Deserialize, Serialize};

/// Quantiles of per-cell population over the populated cells of an area.
///
/// Consumers use it to scale density legends and heatmaps without
/// re-reading the raw grid.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationSummary {
    /// Number of cells with a positive population.
    pub cell_count: usize,
    /// Total population over those cells.
    pub total_population: u64,
    /// 10th percentile of per-cell population.
    pub p10: f64,
    /// 25th percentile.
    pub p25: f64,
    /// Median.
    pub p50: f64,
    /// 75th percentile.
    pub p75: f64,
    /// 90th percentile.
    pub p90: f64,
    /// 95th percentile.
    pub p95: f64,
}

/// Summarizes the populated cells of `cells`. All-zero when none are
/// populated.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize(cells: &[GridCell]) -> PopulationSummary {
    let mut populations: Vec<f64> = cells
        .iter()
        .filter(|c| c.population > 0)
        .map(|c| c.population as f64)
        .collect();

    if populations.is_empty() {
        return PopulationSummary::default();
    }

    populations.sort_by(f64::total_cmp);

    PopulationSummary {
        cell_count: populations.len(),
        total_population: cells.iter().map(|c| c.population).sum(),
        p10: quantile(&populations, 0.10),
        p25: quantile(&populations, 0.25),
        p50: quantile(&populations, 0.50),
        p75: quantile(&populations, 0.75),
        p90: quantile(&populations, 0.90),
        p95: quantile(&populations, 0.95),
    }
}

/// Linear-interpolated quantile of an ascending, non-empty slice.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if q <= 0.0 {
        return sorted[0];
    }
    if q >= 1.0 {
        return sorted[sorted.len() - 1];
    }

    let pos = (sorted.len() - 1) as f64 * q;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }

    let weight = pos - pos.floor();
    sorted[lo].mul_add(1.0 - weight, sorted[hi] * weight)
}
