//! Picking the number of zones from evaluated candidates.

use city_insights_zones_models::{ClusterCandidate, KSelection};

/// Chooses `k` from `candidates` according to `policy`.
///
/// Metric-based policies fall back in order: best silhouette, then
/// lowest Davies-Bouldin, then a point-count heuristic when no usable
/// candidate remains.
#[must_use]
pub fn choose_k(candidates: &[ClusterCandidate], policy: KSelection, point_count: usize) -> usize {
    let chosen = match policy {
        KSelection::Fixed { k } => Some(k),
        KSelection::BestSilhouette => {
            best_silhouette(candidates).or_else(|| lowest_davies_bouldin(candidates))
        }
        KSelection::LowestDaviesBouldin => lowest_davies_bouldin(candidates),
        KSelection::Elbow => elbow(candidates),
    };

    chosen.unwrap_or_else(|| {
        let k = heuristic_k(point_count);
        log::debug!("No usable candidate for {policy}, using k={k} for {point_count} points");
        k
    })
}

/// Zone count used when no metric is available.
#[must_use]
pub const fn heuristic_k(point_count: usize) -> usize {
    match point_count {
        0..=5 => 2,
        6..=50 => 3,
        51..=150 => 4,
        _ => 5,
    }
}

fn best_silhouette(candidates: &[ClusterCandidate]) -> Option<usize> {
    candidates
        .iter()
        .filter(|c| c.silhouette_score.is_finite())
        .fold(None, |best: Option<&ClusterCandidate>, c| match best {
            Some(b) if b.silhouette_score >= c.silhouette_score => Some(b),
            _ => Some(c),
        })
        .map(|c| c.k)
}

fn lowest_davies_bouldin(candidates: &[ClusterCandidate]) -> Option<usize> {
    candidates
        .iter()
        .filter(|c| c.davies_bouldin_score.is_finite())
        .fold(None, |best: Option<&ClusterCandidate>, c| match best {
            Some(b) if b.davies_bouldin_score <= c.davies_bouldin_score => Some(b),
            _ => Some(c),
        })
        .map(|c| c.k)
}

/// The candidate farthest below the chord joining the first and last
/// points of the normalized inertia curve.
#[allow(clippy::cast_precision_loss)]
fn elbow(candidates: &[ClusterCandidate]) -> Option<usize> {
    let mut curve: Vec<&ClusterCandidate> = candidates
        .iter()
        .filter(|c| c.inertia.is_finite())
        .collect();
    curve.sort_by_key(|c| c.k);
    if curve.len() < 3 {
        return None;
    }

    let (first, last) = (curve[0], curve[curve.len() - 1]);
    let k_span = (last.k - first.k) as f64;
    let inertia_span = first.inertia - last.inertia;
    if k_span <= 0.0 || inertia_span <= 0.0 {
        return None;
    }

    // Normalized chord runs from (0, 1) to (1, 0); distance below it is
    // proportional to 1 - x - y.
    let mut best: Option<(usize, f64)> = None;
    for c in &curve[1..curve.len() - 1] {
        let x = (c.k - first.k) as f64 / k_span;
        let y = (c.inertia - last.inertia) / inertia_span;
        let gap = 1.0 - x - y;
        if best.is_none_or(|(_, g)| gap > g) {
            best = Some((c.k, gap));
        }
    }

    best.filter(|(_, gap)| *gap > 0.0).map(|(k, _)| k)
}
