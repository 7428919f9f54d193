//! Pipeline configuration.
//!
//! Every field has a default, so a TOML file only needs the values it
//! overrides:
//!
//! ```toml
//! sample_budget = 1500
//!
//! [k_range]
//! min = 3
//! max = 8
//!
//! [k_selection]
//! policy = "lowest-davies-bouldin"
//! ```

use std::path::Path;

use city_insights_zones_models::{KMeansParams, KSelection, ScoreWeights};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Inclusive range of zone counts to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KRange {
    /// Smallest `k` to evaluate.
    pub min: usize,
    /// Largest `k` to evaluate.
    pub max: usize,
}

impl Default for KRange {
    fn default() -> Self {
        Self { min: 2, max: 10 }
    }
}

impl KRange {
    /// The range as `min..=max`.
    #[must_use]
    pub const fn as_range(&self) -> std::ops::RangeInclusive<usize> {
        self.min..=self.max
    }
}

/// Tuning of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of weighted points handed to clustering.
    pub sample_budget: usize,
    /// Zone counts evaluated when quality evaluation runs.
    pub k_range: KRange,
    /// k-means fitting parameters.
    pub kmeans: KMeansParams,
    /// Whether population weights drive clustering.
    pub weighted: bool,
    /// Reject `k` values that would give one zone per point.
    pub strict_partition: bool,
    /// Demand and competition weights for scoring.
    pub score_weights: ScoreWeights,
    /// How `k` is picked when the request does not fix it.
    pub k_selection: KSelection,
    /// Wall-clock budget for a run, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_budget_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_budget: 2000,
            k_range: KRange::default(),
            kmeans: KMeansParams::default(),
            weighted: true,
            strict_partition: false,
            score_weights: ScoreWeights::default(),
            k_selection: KSelection::default(),
            time_budget_secs: None,
        }
    }
}

impl PipelineConfig {
    /// Parses and validates a TOML configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TOML is malformed or a value is
    /// out of range.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, is malformed,
    /// or holds an out-of-range value.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        log::info!("Loading pipeline config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Serializes the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialize`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });

        if self.sample_budget == 0 {
            return invalid("sample_budget must be at least 1".to_string());
        }
        if self.k_range.min < 2 {
            return invalid(format!("k_range.min must be at least 2, got {}", self.k_range.min));
        }
        if self.k_range.min > self.k_range.max {
            return invalid(format!(
                "k_range.min ({}) exceeds k_range.max ({})",
                self.k_range.min, self.k_range.max
            ));
        }
        if self.kmeans.max_iterations == 0 {
            return invalid("kmeans.max_iterations must be at least 1".to_string());
        }
        if self.kmeans.n_init == 0 {
            return invalid("kmeans.n_init must be at least 1".to_string());
        }
        if !(self.kmeans.tolerance.is_finite() && self.kmeans.tolerance >= 0.0) {
            return invalid(format!(
                "kmeans.tolerance must be finite and non-negative, got {}",
                self.kmeans.tolerance
            ));
        }
        for (name, value) in [
            ("alpha", self.score_weights.alpha),
            ("beta", self.score_weights.beta),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return invalid(format!(
                    "score_weights.{name} must be positive and finite, got {value}"
                ));
            }
        }
        if matches!(self.k_selection, KSelection::Fixed { k: 0 }) {
            return invalid("k_selection fixed k must be at least 1".to_string());
        }
        if self.time_budget_secs == Some(0) {
            return invalid("time_budget_secs must be at least 1".to_string());
        }

        Ok(())
    }
}
