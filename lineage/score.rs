//! Pairwise evidence that one genotype arose inside another.
//!
//! Four signed sub-scores are combined for every (candidate parent, child) pair:
//!
//! * `greater`: the parent is consistently or significantly above the child.
//! * `above_fixed`: together they exceed fixation, so they cannot be disjoint.
//! * `derivative`: their changes move in the same direction while both are growing.
//!   Only counted when the other three already favour the pair.
//! * `area`: the child's area under the curve sits inside the parent's.

use super::area::{GeometryError, Shape};
use crate::shared::config::{LineageConfig, ScoreWeights};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Fewer overlapping points than this fall back to plain summation in the fixation test.
const MINIMUM_TEST_POINTS: usize = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PairScores {
    pub greater: f64,
    pub above_fixed: f64,
    pub derivative: f64,
    pub area: f64,
}

impl PairScores {
    pub fn total(&self) -> f64 {
        self.greater + self.above_fixed + self.derivative + self.area
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoreRecord {
    pub parent: String,
    pub child: String,
    #[serde(flatten)]
    pub scores: PairScores,
    pub total: f64,
}

impl ScoreRecord {
    pub fn new(parent: &str, child: &str, scores: PairScores) -> Self {
        Self {
            parent: parent.to_string(),
            child: child.to_string(),
            total: scores.total(),
            scores,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LineageScorer {
    pub detection_cutoff: f64,
    pub fixed_cutoff: f64,
    pub significance: f64,
    pub weights: ScoreWeights,
    pub area_epsilon: f64,
    pub containment_tolerance: f64,
}

impl LineageScorer {
    pub fn from_config(config: &LineageConfig) -> Self {
        Self {
            detection_cutoff: config.detection_cutoff,
            fixed_cutoff: config.fixed_cutoff,
            significance: config.significance_pvalue,
            weights: config.score_weights,
            area_epsilon: config.area_epsilon,
            containment_tolerance: config.containment_tolerance,
        }
    }

    /// Scores `child` as a descendant of `parent`. Both series share `timepoints`.
    pub fn score_pair(&self, timepoints: &[f64], parent: &[f64], child: &[f64]) -> PairScores {
        let overlap = self.inner_overlap(parent, child);
        let mut scores = PairScores {
            greater: self.greater_score(parent, child, &overlap),
            above_fixed: self.above_fixed_score(timepoints, parent, child, &overlap),
            derivative: 0.0,
            area: self.area_score(timepoints, parent, child),
        };
        if scores.total() > 0.0 {
            scores.derivative = self.derivative_score(parent, child);
        }
        scores
    }

    /// Indices where both series are detected.
    fn inner_overlap(&self, parent: &[f64], child: &[f64]) -> Vec<usize> {
        (0..parent.len())
            .filter(|&i| parent[i] > self.detection_cutoff && child[i] > self.detection_cutoff)
            .collect()
    }

    pub fn greater_score(&self, parent: &[f64], child: &[f64], overlap: &[usize]) -> f64 {
        let weight = self.weights.greater;
        if overlap.is_empty() {
            return -weight;
        }
        let diffs: Vec<f64> = overlap.iter().map(|&i| parent[i] - child[i]).collect();
        let parent_greater = diffs.iter().filter(|&&d| d > self.detection_cutoff).count();
        let child_greater = diffs.iter().filter(|&&d| d < -self.detection_cutoff).count();

        let negated: Vec<f64> = diffs.iter().map(|d| -d).collect();
        let parent_significant = one_sided_pvalue(&diffs) < self.significance;
        let child_significant = one_sided_pvalue(&negated) < self.significance;

        let parent_side = (parent_greater > 0 && child_greater == 0) || parent_significant;
        let child_side = (child_greater > 0 && parent_greater == 0) || child_significant;
        match (parent_side, child_side) {
            (true, false) => weight,
            (false, true) => -weight,
            // Ambiguous or absent evidence.
            _ => 0.0,
        }
    }

    pub fn above_fixed_score(
        &self,
        timepoints: &[f64],
        parent: &[f64],
        child: &[f64],
        overlap: &[usize],
    ) -> f64 {
        let weight = self.weights.above_fixed;
        if overlap.len() < MINIMUM_TEST_POINTS {
            let combined: Vec<f64> = overlap
                .iter()
                .filter(|&&i| timepoints[i] != 0.0)
                .map(|&i| parent[i] + child[i])
                .collect();
            if combined.is_empty() {
                return 0.0;
            }
            let mean = combined.iter().sum::<f64>() / combined.len() as f64;
            return if mean > self.fixed_cutoff { weight } else { 0.0 };
        }

        let combined: Vec<f64> = overlap.iter().map(|&i| parent[i] + child[i]).collect();
        let target = 1.0 + self.detection_cutoff;
        let (mean, variance) = mean_and_variance(&combined);
        let pvalue = welch_greater_pvalue(mean, variance, target, self.detection_cutoff, combined.len());
        if pvalue < self.significance && mean > target {
            weight
        } else {
            0.0
        }
    }

    /// Sign agreement of consecutive changes over timepoints where both series are
    /// detected and have not fixed yet.
    pub fn derivative_score(&self, parent: &[f64], child: &[f64]) -> f64 {
        let weight = self.weights.derivative;
        let parent_window = self.growing_window(parent);
        let child_window = self.growing_window(child);
        let common: Vec<usize> = (0..parent.len())
            .filter(|&i| parent_window[i] && child_window[i])
            .collect();
        if common.len() < 2 {
            return 0.0;
        }
        let dot: f64 = common
            .windows(2)
            .map(|pair| {
                let dp = parent[pair[1]] - parent[pair[0]];
                let dc = child[pair[1]] - child[pair[0]];
                sign(dp) * sign(dc)
            })
            .sum();
        if dot > 0.0 {
            weight
        } else if dot < 0.0 {
            -weight
        } else {
            0.0
        }
    }

    pub fn area_score(&self, timepoints: &[f64], parent: &[f64], child: &[f64]) -> f64 {
        match self.area_relation(timepoints, parent, child) {
            Ok(score) => score,
            Err(err) => {
                log::warn!("Degenerate geometry while comparing areas ({err}); area score set to 0");
                0.0
            }
        }
    }

    fn area_relation(
        &self,
        timepoints: &[f64],
        parent: &[f64],
        child: &[f64],
    ) -> Result<f64, GeometryError> {
        let weight = self.weights.area;
        let tolerance = self.containment_tolerance;
        let parent_shape = Shape::under_curve(timepoints, parent, self.area_epsilon)?;
        let child_shape = Shape::under_curve(timepoints, child, self.area_epsilon)?;
        let outside_parent = Shape::complement(timepoints, parent, 1.0, self.area_epsilon)?;

        let child_in_parent = child_shape.is_within(&parent_shape, tolerance)?;
        let child_outside_parent = child_shape.is_within(&outside_parent, tolerance)?;
        let parent_in_child = parent_shape.is_within(&child_shape, tolerance)?;
        let shared = child_shape.intersection_area(&parent_shape)?;
        let unshared = child_shape.symmetric_difference_area(&parent_shape)?;

        if child_in_parent && !child_outside_parent {
            Ok(weight)
        } else if (parent_in_child && !child_in_parent)
            || child_shape.area() > 2.0 * parent_shape.area()
            || unshared > 2.0 * shared
        {
            Ok(-weight)
        } else {
            Ok(0.0)
        }
    }

    fn growing_window(&self, series: &[f64]) -> Vec<bool> {
        let fixed_at = series
            .iter()
            .position(|&v| v > self.fixed_cutoff)
            .unwrap_or(series.len());
        series
            .iter()
            .enumerate()
            .map(|(i, &v)| v > self.detection_cutoff && i < fixed_at)
            .collect()
    }
}

fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Mean and unbiased variance.
fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance)
}

/// One-sided p-value for "the mean of `values` exceeds zero" (one-sample t-test).
fn one_sided_pvalue(values: &[f64]) -> f64 {
    let n = values.len();
    if n < MINIMUM_TEST_POINTS {
        return 1.0;
    }
    let (mean, variance) = mean_and_variance(values);
    let standard_error = (variance / n as f64).sqrt();
    if standard_error <= f64::EPSILON {
        return if mean > 0.0 { 0.0 } else { 1.0 };
    }
    upper_tail(mean / standard_error, (n - 1) as f64)
}

/// Welch test of a sample (`mean`, `variance`, `n`) against a synthetic sample of the
/// same size centred on `target` with variance `target_variance`.
fn welch_greater_pvalue(mean: f64, variance: f64, target: f64, target_variance: f64, n: usize) -> f64 {
    let size = n as f64;
    let a = variance / size;
    let b = target_variance / size;
    let standard_error = (a + b).sqrt();
    if standard_error <= f64::EPSILON {
        return if mean > target { 0.0 } else { 1.0 };
    }
    let denominator = (a * a + b * b) / (size - 1.0);
    let freedom = if denominator > 0.0 {
        (a + b).powi(2) / denominator
    } else {
        size - 1.0
    };
    upper_tail((mean - target) / standard_error, freedom)
}

fn upper_tail(statistic: f64, freedom: f64) -> f64 {
    match StudentsT::new(0.0, 1.0, freedom) {
        Ok(distribution) => (1.0 - distribution.cdf(statistic)).clamp(0.0, 1.0),
        Err(err) => {
            log::debug!("Cannot build a t distribution with {freedom} degrees of freedom: {err}");
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const TIMES: [f64; 6] = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];

    fn scorer() -> LineageScorer {
        LineageScorer::from_config(&LineageConfig::default())
    }

    #[test]
    fn parent_above_child_scores_greater() {
        let scorer = scorer();
        let parent = [0.0, 0.2, 0.5, 0.8, 0.9, 0.9];
        let child = [0.0, 0.0, 0.1, 0.3, 0.5, 0.6];
        let overlap = scorer.inner_overlap(&parent, &child);
        assert_eq!(scorer.greater_score(&parent, &child, &overlap), 1.0);
        assert_eq!(scorer.greater_score(&child, &parent, &overlap), -1.0);
    }

    #[test]
    fn never_overlapping_is_not_a_parent() {
        let scorer = scorer();
        let early = [0.0, 0.3, 0.0, 0.0, 0.0, 0.0];
        let late = [0.0, 0.0, 0.0, 0.0, 0.4, 0.5];
        assert_eq!(scorer.greater_score(&early, &late, &[]), -1.0);
    }

    #[test]
    fn crossing_series_are_ambiguous() {
        let scorer = scorer();
        let a = [0.0, 0.5, 0.5, 0.1, 0.1, 0.0];
        let b = [0.0, 0.1, 0.1, 0.5, 0.5, 0.0];
        let overlap = scorer.inner_overlap(&a, &b);
        assert_eq!(scorer.greater_score(&a, &b, &overlap), 0.0);
    }

    #[test]
    fn nested_pair_above_fixation() {
        let scorer = scorer();
        let parent = [0.0, 0.6, 0.8, 1.0, 1.0, 1.0];
        let child = [0.0, 0.5, 0.6, 0.8, 0.9, 1.0];
        let overlap = scorer.inner_overlap(&parent, &child);
        assert_eq!(scorer.above_fixed_score(&TIMES, &parent, &child, &overlap), 1.0);

        let small = [0.0, 0.05, 0.1, 0.1, 0.1, 0.05];
        let overlap = scorer.inner_overlap(&parent, &small);
        assert_eq!(scorer.above_fixed_score(&TIMES, &parent, &small, &overlap), 0.0);
    }

    #[test]
    fn short_overlap_uses_summation() {
        let scorer = scorer();
        let parent = [0.0, 0.0, 0.0, 0.0, 0.6, 1.0];
        let child = [0.0, 0.0, 0.0, 0.0, 0.5, 0.9];
        let overlap = scorer.inner_overlap(&parent, &child);
        assert_eq!(overlap, vec![4, 5]);
        assert_eq!(scorer.above_fixed_score(&TIMES, &parent, &child, &overlap), 1.0);
    }

    #[test]
    fn derivative_follows_sign_agreement() {
        let scorer = scorer();
        let parent = [0.0, 0.1, 0.3, 0.5, 0.7, 0.9];
        let along = [0.0, 0.05, 0.1, 0.2, 0.3, 0.4];
        let against = [0.0, 0.6, 0.5, 0.4, 0.3, 0.2];
        assert_eq!(scorer.derivative_score(&parent, &along), 2.0);
        assert_eq!(scorer.derivative_score(&parent, &against), -2.0);
    }

    #[test]
    fn contained_child_scores_area() {
        let scorer = scorer();
        let parent = [0.0, 0.4, 0.8, 0.9, 0.9, 0.9];
        let child = [0.0, 0.0, 0.3, 0.6, 0.7, 0.8];
        assert_eq!(scorer.area_score(&TIMES, &parent, &child), 1.0);
        assert_eq!(scorer.area_score(&TIMES, &child, &parent), -1.0);
    }

    #[test]
    fn degenerate_geometry_scores_zero() {
        let scorer = scorer();
        let times = [0.0, 0.0, 1.0];
        assert_eq!(scorer.area_score(&times, &[0.0, 0.5, 0.5], &[0.0, 0.2, 0.2]), 0.0);
    }

    #[test]
    fn derivative_only_breaks_ties_for_plausible_parents() {
        let scorer = scorer();
        let early = [0.0, 0.3, 0.0, 0.0, 0.0, 0.0];
        let late = [0.0, 0.0, 0.0, 0.0, 0.4, 0.5];
        let scores = scorer.score_pair(&TIMES, &early, &late);
        assert!(scores.greater + scores.above_fixed + scores.area <= 0.0);
        assert_eq!(scores.derivative, 0.0);
    }

    #[test]
    fn one_sided_test_direction() {
        assert!(one_sided_pvalue(&[0.3, 0.35, 0.4, 0.32]) < 0.01);
        assert!(one_sided_pvalue(&[-0.3, -0.35, -0.4, -0.32]) > 0.99);
        assert_eq!(one_sided_pvalue(&[0.1, 0.1]), 1.0);
        assert_abs_diff_eq!(one_sided_pvalue(&[0.2, 0.2, 0.2]), 0.0, epsilon = 1e-12);
    }
}
