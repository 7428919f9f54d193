#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! End-to-end zone analysis for one city and one commerce category.
//!
//! [`PipelineOrchestrator`] chains the steps in a fixed order:
//!
//! 1. **Filtering**: keep the grid cells inside the requested box.
//! 2. **Sampling**: reduce them to a bounded set of weighted points.
//! 3. **Clustering**: optionally evaluate quality over a range of `k`,
//!    pick `k`, and partition the points into zones.
//! 4. **Scoring**: rank zones by demand minus competition.
//!
//! A failed step ends the run with the step name and the originating
//! error kind. Nothing is retried: every step is deterministic.

pub mod cancel;
pub mod config;

use city_insights_grid::{PopulationSummary, filter, sample, summarize};
use city_insights_grid_models::{BoundingBox, CommercePoint, GridCell, normalize_category};
use city_insights_zones::progress::{NullProgress, ProgressCallback};
use city_insights_zones::{
    AnalysisError, ClusterQualityEvaluator, ErrorKind, ZoneClusterer, choose_k, score,
};
use city_insights_zones_models::{ClusterCandidate, KSelection, PriorityZone, Zone};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

pub use cancel::CancellationToken;
pub use city_insights_zones::progress;
pub use config::{KRange, PipelineConfig};

/// A processing step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum PipelineStep {
    /// Restricting grid cells to the bounding box.
    Filtering,
    /// Reducing cells to weighted points.
    Sampling,
    /// Evaluating, choosing `k`, and building zones.
    Clustering,
    /// Ranking zones.
    Scoring,
}

/// Where a run is. Runs only move forward; [`Self::Failed`] can follow
/// any step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum PipelineState {
    /// Running [`PipelineStep::Filtering`].
    Filtering,
    /// Running [`PipelineStep::Sampling`].
    Sampling,
    /// Running [`PipelineStep::Clustering`].
    Clustering,
    /// Running [`PipelineStep::Scoring`].
    Scoring,
    /// Finished with a result.
    Done,
    /// Ended by an error or cancellation.
    Failed,
}

impl From<PipelineStep> for PipelineState {
    fn from(step: PipelineStep) -> Self {
        match step {
            PipelineStep::Filtering => Self::Filtering,
            PipelineStep::Sampling => Self::Sampling,
            PipelineStep::Clustering => Self::Clustering,
            PipelineStep::Scoring => Self::Scoring,
        }
    }
}

/// Errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A step failed.
    #[error("{step} failed: {source}")]
    Step {
        /// The failing step.
        step: PipelineStep,
        /// What went wrong.
        source: AnalysisError,
    },

    /// The cancellation token fired before `step` started.
    #[error("Cancelled before {step}")]
    Cancelled {
        /// The step that did not start.
        step: PipelineStep,
    },
}

impl PipelineError {
    /// The step at which the run ended.
    #[must_use]
    pub const fn step(&self) -> PipelineStep {
        match self {
            Self::Step { step, .. } | Self::Cancelled { step } => *step,
        }
    }

    /// The originating error kind, `None` for cancellation.
    #[must_use]
    pub const fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Step { source, .. } => Some(source.kind()),
            Self::Cancelled { .. } => None,
        }
    }
}

/// Errors loading or validating a [`PipelineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML could not be parsed.
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML could not be written.
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error("Invalid config: {message}")]
    Invalid {
        /// Which value and why.
        message: String,
    },
}

/// Inputs of one analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    /// Population grid cells (may extend beyond `bbox`).
    pub cells: Vec<GridCell>,
    /// Commerce points of the area, any category.
    pub commerces: Vec<CommercePoint>,
    /// Area to analyze.
    pub bbox: BoundingBox,
    /// Commerce category whose competition is counted.
    pub category: String,
    /// Number of zones. Chosen from evaluated candidates when absent.
    #[serde(default)]
    pub k: Option<usize>,
    /// Return quality candidates even when `k` is given.
    #[serde(default)]
    pub evaluate_quality: bool,
}

/// Output of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Normalized category key.
    pub category: String,
    /// Analyzed area.
    pub bbox: BoundingBox,
    /// Density distribution of the cells inside `bbox`.
    pub population: PopulationSummary,
    /// Number of weighted points clustered.
    pub sampled_points: usize,
    /// Number of zones requested from the clusterer.
    pub k: usize,
    /// Quality candidates, when evaluation ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<ClusterCandidate>>,
    /// `false` when evaluation was cut short by cancellation.
    pub candidates_complete: bool,
    /// Zones, labeled by descending population.
    pub zones: Vec<Zone>,
    /// Zones ranked by opportunity.
    pub priority_zones: Vec<PriorityZone>,
}

/// Runs analyses with a fixed configuration.
///
/// The orchestrator holds no per-run state, so one instance can serve
/// concurrent runs from several threads.
#[derive(Debug, Clone, Default)]
pub struct PipelineOrchestrator {
    config: PipelineConfig,
}

/// Tracks the state of one run and logs transitions.
struct Run<'a> {
    state: PipelineState,
    progress: &'a dyn ProgressCallback,
}

impl<'a> Run<'a> {
    fn start(progress: &'a dyn ProgressCallback) -> Self {
        log::debug!("Pipeline state: {}", PipelineState::Filtering);
        progress.set_message(PipelineState::Filtering.to_string());
        Self {
            state: PipelineState::Filtering,
            progress,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        log::debug!("Pipeline state: {} -> {next}", self.state);
        self.progress.set_message(next.to_string());
        self.state = next;
    }

    /// Moves to `step` unless `cancel` has fired.
    fn enter(
        &mut self,
        step: PipelineStep,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            log::info!("Pipeline cancelled before {step}");
            self.advance(PipelineState::Failed);
            return Err(PipelineError::Cancelled { step });
        }
        let next = PipelineState::from(step);
        if self.state != next {
            self.advance(next);
        }
        Ok(())
    }

    fn fail(&mut self, step: PipelineStep, source: AnalysisError) -> PipelineError {
        log::warn!("Pipeline {step} failed ({}): {source}", source.kind());
        self.advance(PipelineState::Failed);
        PipelineError::Step { step, source }
    }
}

impl PipelineOrchestrator {
    /// Creates an orchestrator with `config` as given.
    ///
    /// The config is trusted: out-of-range values are clamped or skipped
    /// where a step meets them (a zero `sample_budget` samples one point,
    /// `k` values below 2 are never evaluated). Use [`Self::try_new`] for
    /// configs built outside [`PipelineConfig::load`].
    #[must_use]
    pub const fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Creates an orchestrator after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first out-of-range value.
    pub fn try_new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Runs one analysis without progress reporting or cancellation
    /// (other than the configured time budget).
    ///
    /// # Errors
    ///
    /// See [`Self::run_with`].
    pub fn run(&self, request: &AnalysisRequest) -> Result<AnalysisResult, PipelineError> {
        self.run_with(request, &NullProgress, &CancellationToken::new())
    }

    /// Runs one analysis.
    ///
    /// `cancel` is checked before filtering, sampling, and clustering,
    /// and before each evaluated `k`. Once zones are being built the run
    /// completes. A stop during quality evaluation keeps the candidates
    /// computed so far and continues.
    ///
    /// # Errors
    ///
    /// * [`PipelineError::Step`] with [`ErrorKind::EmptyInput`] when no
    ///   cell lies in the box (at filtering) or none is populated (at
    ///   sampling).
    /// * [`PipelineError::Step`] with the clusterer's or scorer's error
    ///   for invalid parameters or unstable metrics.
    /// * [`PipelineError::Cancelled`] when `cancel` fires before
    ///   clustering starts.
    pub fn run_with(
        &self,
        request: &AnalysisRequest,
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, PipelineError> {
        let cancel = match self.config.time_budget_secs {
            Some(secs) => cancel.with_timeout(std::time::Duration::from_secs(secs)),
            None => cancel.clone(),
        };
        let mut run = Run::start(progress);
        let category = normalize_category(&request.category);

        // Filtering
        run.enter(PipelineStep::Filtering, &cancel)?;
        let bbox = &request.bbox;
        if let Err(e) = BoundingBox::new(bbox.min_lat, bbox.max_lat, bbox.min_lon, bbox.max_lon) {
            return Err(run.fail(
                PipelineStep::Filtering,
                AnalysisError::InvalidParameter {
                    message: e.to_string(),
                },
            ));
        }
        let cells = filter(&request.cells, bbox);
        if cells.is_empty() {
            return Err(run.fail(
                PipelineStep::Filtering,
                AnalysisError::EmptyInput {
                    message: format!("none of {} grid cells lie in the box", request.cells.len()),
                },
            ));
        }
        let population = summarize(&cells);
        log::info!(
            "Filtered {} of {} cells, population {}",
            cells.len(),
            request.cells.len(),
            population.total_population
        );

        // Sampling
        run.enter(PipelineStep::Sampling, &cancel)?;
        let points = sample(&cells, self.config.sample_budget);
        if points.is_empty() {
            return Err(run.fail(
                PipelineStep::Sampling,
                AnalysisError::EmptyInput {
                    message: format!("the {} cells in the box are unpopulated", cells.len()),
                },
            ));
        }
        log::info!("Sampled {} weighted points", points.len());

        // Clustering
        run.enter(PipelineStep::Clustering, &cancel)?;
        let needs_candidates = request.k.is_none()
            && !matches!(self.config.k_selection, KSelection::Fixed { .. });
        let evaluation = if request.evaluate_quality || needs_candidates {
            let evaluator = ClusterQualityEvaluator::new(self.config.kmeans);
            let evaluation = evaluator
                .evaluate_with(
                    &points,
                    self.config.k_range.as_range(),
                    self.config.weighted,
                    progress,
                    &|| cancel.is_cancelled(),
                )
                .map_err(|e| run.fail(PipelineStep::Clustering, e))?;
            if !evaluation.completed {
                log::warn!(
                    "Quality evaluation cut short after {} candidates",
                    evaluation.candidates.len()
                );
            }
            Some(evaluation)
        } else {
            None
        };

        let k = request.k.unwrap_or_else(|| {
            let candidates = evaluation.as_ref().map_or(&[][..], |e| &e.candidates[..]);
            choose_k(candidates, self.config.k_selection, points.len())
        });
        log::info!("Clustering {} points into {k} zones", points.len());

        let zones = ZoneClusterer::new(self.config.kmeans)
            .with_weighted(self.config.weighted)
            .with_strict_partition(self.config.strict_partition)
            .cluster(&points, &request.commerces, &category, k)
            .map_err(|e| run.fail(PipelineStep::Clustering, e))?;

        // Scoring
        run.advance(PipelineStep::Scoring.into());
        let priority_zones = score(&zones, &self.config.score_weights)
            .map_err(|e| run.fail(PipelineStep::Scoring, e))?;

        run.advance(PipelineState::Done);
        log::info!(
            "Analysis of '{category}' done: {} zones ranked",
            priority_zones.len()
        );

        let (candidates, candidates_complete) = match evaluation {
            Some(e) => (Some(e.candidates), e.completed),
            None => (None, true),
        };

        Ok(AnalysisResult {
            category,
            bbox: *bbox,
            population,
            sampled_points: points.len(),
            k,
            candidates,
            candidates_complete,
            zones,
            priority_zones,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use super::*;

    /// 10 x 10 cells, 200 m apart, covering 2 km x 2 km in Paris.
    fn paris_grid(population: u64) -> Vec<GridCell> {
        let mut cells = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                cells.push(GridCell::new(
                    48.85 + f64::from(i) * 0.0018,
                    2.33 + f64::from(j) * 0.00273,
                    population,
                ));
            }
        }
        cells
    }

    fn paris_box() -> BoundingBox {
        BoundingBox::new(48.849, 48.868, 2.329, 2.356).unwrap()
    }

    fn request(cells: Vec<GridCell>, k: Option<usize>) -> AnalysisRequest {
        AnalysisRequest {
            cells,
            commerces: vec![
                CommercePoint {
                    id: "1".to_string(),
                    name: "Boulangerie A".to_string(),
                    latitude: 48.852,
                    longitude: 2.332,
                    category: "boulangerie".to_string(),
                },
                CommercePoint {
                    id: "2".to_string(),
                    name: "Boucherie B".to_string(),
                    latitude: 48.865,
                    longitude: 2.353,
                    category: "boucherie".to_string(),
                },
            ],
            bbox: paris_box(),
            category: "Boulangerie".to_string(),
            k,
            evaluate_quality: false,
        }
    }

    fn budget_20() -> PipelineOrchestrator {
        PipelineOrchestrator::new(PipelineConfig {
            sample_budget: 20,
            ..PipelineConfig::default()
        })
    }

    #[derive(Default)]
    struct RecordingProgress {
        messages: Mutex<Vec<String>>,
    }

    impl ProgressCallback for RecordingProgress {
        fn set_total(&self, _total: u64) {}
        fn inc(&self, _delta: u64) {}
        fn set_message(&self, msg: String) {
            self.messages.lock().unwrap().push(msg);
        }
        fn finish(&self, _msg: String) {}
        fn finish_and_clear(&self) {}
    }

    impl RecordingProgress {
        fn states(&self) -> Vec<String> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| !m.starts_with("Evaluating"))
                .cloned()
                .collect()
        }
    }

    #[test]
    fn uniform_grid_end_to_end() {
        let result = budget_20().run(&request(paris_grid(100), Some(4))).unwrap();

        assert_eq!(result.population.cell_count, 100);
        assert_eq!(result.population.total_population, 10_000);
        assert!(result.sampled_points <= 20);

        assert_eq!(result.k, 4);
        assert_eq!(result.zones.len(), 4);
        let mass: f64 = result.zones.iter().map(|z| z.population_mass).sum();
        assert!((mass - 10_000.0).abs() < 1e-6);

        let ranks: BTreeSet<usize> = result.priority_zones.iter().map(|p| p.rank).collect();
        assert_eq!(ranks, (1..=4).collect());
        assert!(result.candidates.is_none());
        assert_eq!(result.category, "boulangerie");

        let commerce_total: usize = result.zones.iter().map(|z| z.commerce_ids.len()).sum();
        assert_eq!(commerce_total, 2);
        let matching: usize = result.zones.iter().map(|z| z.commerce_count).sum();
        assert_eq!(matching, 1);
    }

    #[test]
    fn states_advance_in_order() {
        let progress = RecordingProgress::default();
        budget_20()
            .run_with(
                &request(paris_grid(100), Some(4)),
                &progress,
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(
            progress.states(),
            vec!["filtering", "sampling", "clustering", "scoring", "done"]
        );
    }

    #[test]
    fn box_without_cells_fails_at_filtering() {
        let mut req = request(paris_grid(100), Some(4));
        req.bbox = BoundingBox::new(45.7, 45.8, 4.8, 4.9).unwrap();

        let progress = RecordingProgress::default();
        let err = budget_20()
            .run_with(&req, &progress, &CancellationToken::new())
            .unwrap_err();

        assert_eq!(err.step(), PipelineStep::Filtering);
        assert_eq!(err.kind(), Some(ErrorKind::EmptyInput));
        assert_eq!(progress.states(), vec!["filtering", "failed"]);
    }

    #[test]
    fn unpopulated_cells_fail_at_sampling() {
        let err = budget_20()
            .run(&request(paris_grid(0), Some(4)))
            .unwrap_err();
        assert_eq!(err.step(), PipelineStep::Sampling);
        assert_eq!(err.kind(), Some(ErrorKind::EmptyInput));
    }

    #[test]
    fn invalid_k_fails_at_clustering() {
        let err = budget_20()
            .run(&request(paris_grid(100), Some(0)))
            .unwrap_err();
        assert_eq!(err.step(), PipelineStep::Clustering);
        assert_eq!(err.kind(), Some(ErrorKind::InvalidParameter));
    }

    #[test]
    fn k_is_chosen_from_candidates_when_absent() {
        let orchestrator = PipelineOrchestrator::new(PipelineConfig {
            sample_budget: 20,
            k_range: KRange { min: 2, max: 6 },
            ..PipelineConfig::default()
        });
        let result = orchestrator.run(&request(paris_grid(100), None)).unwrap();

        let candidates = result.candidates.unwrap();
        assert!(!candidates.is_empty());
        assert!(result.candidates_complete);
        let best = candidates
            .iter()
            .fold(None, |best: Option<&ClusterCandidate>, c| match best {
                Some(b) if b.silhouette_score >= c.silhouette_score => Some(b),
                _ => Some(c),
            })
            .unwrap();
        assert_eq!(result.k, best.k);
        assert_eq!(result.zones.len(), result.k);
    }

    #[test]
    fn explicit_k_with_evaluation_keeps_k() {
        let mut req = request(paris_grid(100), Some(3));
        req.evaluate_quality = true;
        let result = budget_20().run(&req).unwrap();

        assert_eq!(result.k, 3);
        assert!(result.candidates.is_some());
    }

    #[test]
    fn cancelled_token_stops_before_filtering() {
        let token = CancellationToken::new();
        token.cancel();
        let err = budget_20()
            .run_with(&request(paris_grid(100), Some(4)), &NullProgress, &token)
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Cancelled {
                step: PipelineStep::Filtering
            }
        ));
        assert_eq!(err.kind(), None);
    }

    /// Runs `after_first` once the first `k` has been evaluated.
    struct AfterFirstK<F: Fn() + Send + Sync> {
        after_first: F,
        done: Mutex<bool>,
    }

    impl<F: Fn() + Send + Sync> AfterFirstK<F> {
        const fn new(after_first: F) -> Self {
            Self {
                after_first,
                done: Mutex::new(false),
            }
        }
    }

    impl<F: Fn() + Send + Sync> ProgressCallback for AfterFirstK<F> {
        fn set_total(&self, _total: u64) {}
        fn inc(&self, _delta: u64) {
            let mut done = self.done.lock().unwrap();
            if !*done {
                *done = true;
                (self.after_first)();
            }
        }
        fn set_message(&self, _msg: String) {}
        fn finish(&self, _msg: String) {}
        fn finish_and_clear(&self) {}
    }

    fn evaluating_2_to_6() -> PipelineOrchestrator {
        PipelineOrchestrator::new(PipelineConfig {
            sample_budget: 20,
            k_range: KRange { min: 2, max: 6 },
            ..PipelineConfig::default()
        })
    }

    fn assert_partial_with_zones(result: &AnalysisResult) {
        assert!(!result.candidates_complete);
        let candidates = result.candidates.as_ref().unwrap();
        let ks: Vec<usize> = candidates.iter().map(|c| c.k).collect();
        assert_eq!(ks, vec![2]);

        assert_eq!(result.k, 2);
        assert_eq!(result.zones.len(), 2);
        assert_eq!(result.priority_zones.len(), result.zones.len());
        let mass: f64 = result.zones.iter().map(|z| z.population_mass).sum();
        assert!((mass - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn cancel_during_evaluation_keeps_partial_candidates() {
        let token = CancellationToken::new();
        let progress = AfterFirstK::new(|| token.cancel());

        let result = evaluating_2_to_6()
            .run_with(&request(paris_grid(100), None), &progress, &token)
            .unwrap();

        assert!(token.is_cancelled());
        assert_partial_with_zones(&result);
    }

    #[test]
    fn deadline_during_evaluation_keeps_partial_candidates() {
        let token = CancellationToken::new().with_timeout(std::time::Duration::from_millis(500));
        let expiry = std::time::Instant::now() + std::time::Duration::from_millis(520);
        let progress = AfterFirstK::new(|| {
            std::thread::sleep(expiry.saturating_duration_since(std::time::Instant::now()));
        });

        let result = evaluating_2_to_6()
            .run_with(&request(paris_grid(100), None), &progress, &token)
            .unwrap();

        assert!(token.is_cancelled());
        assert_partial_with_zones(&result);
    }

    #[test]
    fn try_new_validates_config() {
        assert!(PipelineOrchestrator::try_new(PipelineConfig::default()).is_ok());

        let err = PipelineOrchestrator::try_new(PipelineConfig {
            sample_budget: 0,
            ..PipelineConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = PipelineOrchestrator::try_new(PipelineConfig {
            k_range: KRange { min: 6, max: 2 },
            ..PipelineConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn runs_are_deterministic() {
        let orchestrator = budget_20();
        let req = request(paris_grid(100), None);
        assert_eq!(orchestrator.run(&req).unwrap(), orchestrator.run(&req).unwrap());
    }

    #[test]
    fn result_serializes_camel_case() {
        let result = budget_20().run(&request(paris_grid(100), Some(2))).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("priorityZones").is_some());
        assert!(json.get("sampledPoints").is_some());
        assert!(json.get("candidates").is_none());
        assert_eq!(json["zones"][0]["label"], 0);
    }
}
