//! Dissimilarity metrics between two frequency series.
//!
//! Every metric takes two equal-length series restricted to the timepoints that
//! are valid for the pair and returns `None` when the comparison is undefined
//! (zero variance, degenerate geometry). Undefined comparisons are resolved to
//! the maximum observed distance later, when the whole matrix is known.

use crate::lineage::area::Shape;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_MINKOWSKI_P: f64 = 2.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error(
        "Unknown distance metric '{0}'. Expected one of: binomial, pearson, pearson:raw, minkowski, minkowski:<p>, jaccard, combined."
    )]
    Unknown(String),
    #[error("The Minkowski exponent must be a finite number >= 1; got '{0}'.")]
    InvalidExponent(String),
}

/// The supported metrics, each carrying its own parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Metric {
    /// Mean absolute difference scaled by the binomial standard deviation.
    Binomial,
    /// `1 - r`, with the small-sample correction when `adjusted` is set.
    Pearson { adjusted: bool },
    /// Lp-norm of the difference.
    Minkowski { p: f64 },
    /// One minus the ratio of shared to combined area under the curves.
    Jaccard,
    /// `2 * pearson + minkowski(p = 2)`.
    Combined,
}

impl Default for Metric {
    fn default() -> Self {
        Self::Binomial
    }
}

impl Metric {
    /// Distance between two series sampled at `timepoints`. `area_epsilon` flattens
    /// near-zero heights when the metric builds polygons.
    pub fn distance(
        &self,
        timepoints: &[f64],
        left: &[f64],
        right: &[f64],
        area_epsilon: f64,
    ) -> Option<f64> {
        debug_assert_eq!(left.len(), right.len());
        if left.is_empty() {
            return None;
        }
        let value = match *self {
            Self::Binomial => binomial_distance(left, right),
            Self::Pearson { adjusted } => pearson_distance(left, right, adjusted),
            Self::Minkowski { p } => Some(minkowski_distance(left, right, p)),
            Self::Jaccard => jaccard_distance(timepoints, left, right, area_epsilon),
            Self::Combined => {
                let pearson = pearson_distance(left, right, true)?;
                Some(2.0 * pearson + minkowski_distance(left, right, DEFAULT_MINKOWSKI_P))
            }
        }?;
        value.is_finite().then_some(value)
    }
}

impl FromStr for Metric {
    type Err = MetricError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        let (name, parameter) = match normalized.split_once(':') {
            Some((name, parameter)) => (name, Some(parameter)),
            None => (normalized.as_str(), None),
        };
        match (name, parameter) {
            ("binomial", None) => Ok(Self::Binomial),
            ("pearson", None) => Ok(Self::Pearson { adjusted: true }),
            ("pearson", Some("raw")) => Ok(Self::Pearson { adjusted: false }),
            ("minkowski", None) => Ok(Self::Minkowski {
                p: DEFAULT_MINKOWSKI_P,
            }),
            ("minkowski", Some(p_text)) => match p_text.parse::<f64>() {
                Ok(p) if p.is_finite() && p >= 1.0 => Ok(Self::Minkowski { p }),
                _ => Err(MetricError::InvalidExponent(p_text.to_string())),
            },
            ("jaccard", None) => Ok(Self::Jaccard),
            ("combined", None) => Ok(Self::Combined),
            _ => Err(MetricError::Unknown(value.to_string())),
        }
    }
}

impl TryFrom<String> for Metric {
    type Error = MetricError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Metric> for String {
    fn from(value: Metric) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binomial => f.write_str("binomial"),
            Self::Pearson { adjusted: true } => f.write_str("pearson"),
            Self::Pearson { adjusted: false } => f.write_str("pearson:raw"),
            Self::Minkowski { p } if *p == DEFAULT_MINKOWSKI_P => f.write_str("minkowski"),
            Self::Minkowski { p } => write!(f, "minkowski:{p}"),
            Self::Jaccard => f.write_str("jaccard"),
            Self::Combined => f.write_str("combined"),
        }
    }
}

/// z-score-like statistic: `mean|l - r| / sqrt(2 * mean(p(1 - p)))` with `p` the
/// per-timepoint mean of the two series.
pub fn binomial_distance(left: &[f64], right: &[f64]) -> Option<f64> {
    let n = left.len() as f64;
    let mut abs_diff = 0.0;
    let mut variance = 0.0;
    for (&l, &r) in left.iter().zip(right) {
        let p = (l + r) / 2.0;
        abs_diff += (l - r).abs();
        variance += p * (1.0 - p);
    }
    let mean_abs_diff = abs_diff / n;
    let mean_variance = variance / n;
    if mean_abs_diff == 0.0 {
        return Some(0.0);
    }
    if mean_variance <= 0.0 {
        return None;
    }
    Some(mean_abs_diff / (2.0 * mean_variance).sqrt())
}

/// Pearson correlation, optionally with the `r * (1 + (1 - r^2) / 2n)` correction.
pub fn pearson_correlation(left: &[f64], right: &[f64], adjusted: bool) -> Option<f64> {
    let n = left.len();
    if n < 2 {
        return None;
    }
    let count = n as f64;
    let mean_l = left.iter().sum::<f64>() / count;
    let mean_r = right.iter().sum::<f64>() / count;
    let mut covariance = 0.0;
    let mut var_l = 0.0;
    let mut var_r = 0.0;
    for (&l, &r) in left.iter().zip(right) {
        let dl = l - mean_l;
        let dr = r - mean_r;
        covariance += dl * dr;
        var_l += dl * dl;
        var_r += dr * dr;
    }
    if var_l <= 0.0 || var_r <= 0.0 {
        return None;
    }
    let r = covariance / (var_l * var_r).sqrt();
    let r = if adjusted {
        r * (1.0 + (1.0 - r * r) / (2.0 * count))
    } else {
        r
    };
    Some(r.clamp(-1.0, 1.0))
}

pub fn pearson_distance(left: &[f64], right: &[f64], adjusted: bool) -> Option<f64> {
    pearson_correlation(left, right, adjusted).map(|r| 1.0 - r)
}

pub fn minkowski_distance(left: &[f64], right: &[f64], p: f64) -> f64 {
    left.iter()
        .zip(right)
        .map(|(&l, &r)| (l - r).abs().powf(p))
        .sum::<f64>()
        .powf(1.0 / p)
}

/// `1 - |X ∩ Y| / |X ∪ Y|` over the areas under both curves. A single valid
/// timepoint has no area, so the pointwise min/max ratio is used instead.
pub fn jaccard_distance(
    timepoints: &[f64],
    left: &[f64],
    right: &[f64],
    area_epsilon: f64,
) -> Option<f64> {
    if left.len() < 2 {
        let shared: f64 = left.iter().zip(right).map(|(&l, &r)| l.min(r)).sum();
        let combined: f64 = left.iter().zip(right).map(|(&l, &r)| l.max(r)).sum();
        return (combined > 0.0).then(|| 1.0 - shared / combined);
    }
    let left_shape = Shape::under_curve(timepoints, left, area_epsilon).ok()?;
    let right_shape = Shape::under_curve(timepoints, right, area_epsilon).ok()?;
    let shared = left_shape.intersection_area(&right_shape).ok()?;
    let combined = left_shape.union_area(&right_shape).ok()?;
    if combined <= 0.0 {
        return None;
    }
    Some(1.0 - shared / combined)
}
