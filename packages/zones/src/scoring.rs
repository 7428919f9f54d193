//! Opportunity ranking of zones.
//!
//! A zone scores high when many people live there and few competing
//! commerces already serve it:
//!
//! `score = alpha * minmax(population_mass) - beta * minmax(commerce_count)`
//!
//! Both metrics are min-max normalized across the zones of one run; a
//! metric that is the same for every zone contributes nothing.

use city_insights_zones_models::{PriorityZone, ScoreWeights, Zone};

use crate::AnalysisError;

/// Scores and ranks `zones`, best opportunity first.
///
/// Ties on score are broken by ascending zone label, so ranks form a
/// total order.
///
/// # Errors
///
/// Returns [`AnalysisError::InvalidParameter`] if `alpha` or `beta` is
/// not a positive finite number.
#[allow(clippy::cast_precision_loss)]
pub fn score(zones: &[Zone], weights: &ScoreWeights) -> Result<Vec<PriorityZone>, AnalysisError> {
    for (name, value) in [("alpha", weights.alpha), ("beta", weights.beta)] {
        if !(value.is_finite() && value > 0.0) {
            return Err(AnalysisError::invalid(format!(
                "score weight {name} must be positive and finite, got {value}"
            )));
        }
    }

    let demand = normalize(zones.iter().map(|z| z.population_mass));
    let competition = normalize(zones.iter().map(|z| z.commerce_count as f64));

    let mut ranked: Vec<PriorityZone> = zones
        .iter()
        .zip(demand.iter().zip(&competition))
        .map(|(zone, (d, c))| PriorityZone {
            zone: zone.clone(),
            score: weights.alpha.mul_add(*d, -(weights.beta * c)),
            rank: 0,
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.zone.label.cmp(&b.zone.label))
    });
    for (i, zone) in ranked.iter_mut().enumerate() {
        zone.rank = i + 1;
    }

    if let Some(best) = ranked.first() {
        log::debug!(
            "Top zone {} scores {:.3} (population {:.0}, {} competitors)",
            best.zone.label,
            best.score,
            best.zone.population_mass,
            best.zone.commerce_count
        );
    }

    Ok(ranked)
}

fn normalize(values: impl Iterator<Item = f64> + Clone) -> Vec<f64> {
    let (min, max) = values
        .clone()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;

    values
        .map(|v| if range > 0.0 { (v - min) / range } else { 0.0 })
        .collect()
}
