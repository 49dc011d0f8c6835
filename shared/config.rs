//! Run configuration, loadable from TOML and overridable from the command line.

use crate::cluster::filter::DEFAULT_BREAKPOINTS;
use crate::cluster::hierarchy::{ClusterCutoff, DEFAULT_CUTOFF_QUANTILE, LinkageMethod};
use crate::cluster::metric::Metric;
use crate::lineage::area::DEFAULT_AREA_EPSILON;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_SORT_BREAKPOINTS: [f64; 6] = [0.9, 0.75, 0.5, 0.25, 0.15, 0.0];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(
        "Invalid cutoffs: detection ({detection}) must lie in [0, 1), fixed ({fixed}) in (0, 1], and detection must be below fixed."
    )]
    InvalidCutoffs { detection: f64, fixed: f64 },
    #[error("The cutoff quantile must lie within [0, 1]; got {0}.")]
    InvalidQuantile(f64),
    #[error("The explicit distance cutoff must be finite and non-negative; got {0}.")]
    InvalidDistanceCutoff(f64),
    #[error("Score weights must be finite and non-negative.")]
    InvalidWeights,
    #[error("The significance level must lie within (0, 1); got {0}.")]
    InvalidSignificance(f64),
    #[error("The score window and minimum score must be finite; got window {window}, minimum {minimum}.")]
    InvalidScoreRule { window: f64, minimum: f64 },
    #[error("The iteration cap must be at least 1.")]
    InvalidIterations,
    #[error("At least one background breakpoint is required, and each must lie within [0, 1].")]
    InvalidBreakpoints,
    #[error("Sort breakpoints must each lie within [0, 1].")]
    InvalidSortBreakpoints,
    #[error("The polygon epsilon and containment tolerance must be finite and non-negative.")]
    InvalidGeometry,
}

/// Weights applied to each pairwise lineage sub-score.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoreWeights {
    pub greater: f64,
    pub above_fixed: f64,
    pub derivative: f64,
    pub area: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            greater: 1.0,
            above_fixed: 1.0,
            derivative: 2.0,
            area: 1.0,
        }
    }
}

impl ScoreWeights {
    fn is_valid(&self) -> bool {
        [self.greater, self.above_fixed, self.derivative, self.area]
            .iter()
            .all(|w| w.is_finite() && *w >= 0.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LineageConfig {
    /// Frequencies at or below this are undetected.
    pub detection_cutoff: f64,
    /// Frequencies above this are fixed.
    pub fixed_cutoff: f64,
    /// Explicit cluster cut; inferred from `cutoff_quantile` when absent.
    #[serde(alias = "similarity_cutoff", skip_serializing_if = "Option::is_none")]
    pub distance_cutoff: Option<f64>,
    pub cutoff_quantile: f64,
    pub metric: Metric,
    pub linkage: LinkageMethod,
    pub significance_pvalue: f64,
    pub minimum_score: f64,
    pub score_window: f64,
    pub starting_genotypes: Vec<Vec<String>>,
    /// 0 uses every available CPU.
    pub worker_count: usize,
    pub breakpoints: Vec<f64>,
    pub sort_breakpoints: Vec<f64>,
    pub strict_filter: bool,
    pub max_iterations: usize,
    pub prefilter: bool,
    pub area_epsilon: f64,
    pub containment_tolerance: f64,
    pub score_weights: ScoreWeights,
    /// Child genotype (or member trajectory) to parent overrides.
    pub known_ancestry: BTreeMap<String, String>,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            detection_cutoff: 0.03,
            fixed_cutoff: 0.97,
            distance_cutoff: None,
            cutoff_quantile: DEFAULT_CUTOFF_QUANTILE,
            metric: Metric::default(),
            linkage: LinkageMethod::default(),
            significance_pvalue: 0.05,
            minimum_score: 1.0,
            score_window: 2.0,
            starting_genotypes: Vec::new(),
            worker_count: num_cpus::get(),
            breakpoints: DEFAULT_BREAKPOINTS.to_vec(),
            sort_breakpoints: DEFAULT_SORT_BREAKPOINTS.to_vec(),
            strict_filter: false,
            max_iterations: 20,
            prefilter: true,
            area_epsilon: DEFAULT_AREA_EPSILON,
            containment_tolerance: 0.05,
            score_weights: ScoreWeights::default(),
            known_ancestry: BTreeMap::new(),
        }
    }
}

impl LineageConfig {
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads and validates a configuration file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let detection = self.detection_cutoff;
        let fixed = self.fixed_cutoff;
        if !(0.0..1.0).contains(&detection) || !(fixed > 0.0 && fixed <= 1.0) || detection >= fixed {
            return Err(ConfigError::InvalidCutoffs { detection, fixed });
        }
        if !(0.0..=1.0).contains(&self.cutoff_quantile) {
            return Err(ConfigError::InvalidQuantile(self.cutoff_quantile));
        }
        if let Some(cutoff) = self.distance_cutoff {
            if !cutoff.is_finite() || cutoff < 0.0 {
                return Err(ConfigError::InvalidDistanceCutoff(cutoff));
            }
        }
        if !self.score_weights.is_valid() {
            return Err(ConfigError::InvalidWeights);
        }
        if !(self.significance_pvalue > 0.0 && self.significance_pvalue < 1.0) {
            return Err(ConfigError::InvalidSignificance(self.significance_pvalue));
        }
        if !self.score_window.is_finite() || !self.minimum_score.is_finite() {
            return Err(ConfigError::InvalidScoreRule {
                window: self.score_window,
                minimum: self.minimum_score,
            });
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidIterations);
        }
        if self.breakpoints.is_empty()
            || self
                .breakpoints
                .iter()
                .any(|b| !(0.0..=1.0).contains(b))
        {
            return Err(ConfigError::InvalidBreakpoints);
        }
        if self.sort_breakpoints.iter().any(|b| !(0.0..=1.0).contains(b)) {
            return Err(ConfigError::InvalidSortBreakpoints);
        }
        let geometry_ok = [self.area_epsilon, self.containment_tolerance]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0);
        if !geometry_ok {
            return Err(ConfigError::InvalidGeometry);
        }
        Ok(())
    }

    pub fn cluster_cutoff(&self) -> ClusterCutoff {
        match self.distance_cutoff {
            Some(distance) => ClusterCutoff::Distance(distance),
            None => ClusterCutoff::Inferred {
                quantile: self.cutoff_quantile,
            },
        }
    }
}
