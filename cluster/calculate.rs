//! Computes the pairwise distance cache for a trajectory table.
//!
//! Pairs are independent, so they are fanned out over a dedicated rayon pool as
//! immutable [`PairTask`]s. Results are collected in full before anything is
//! written to the cache; the maximum-distance substitution for incomparable
//! pairs therefore always sees every value.

use super::cache::{CacheError, DistanceCache};
use super::metric::Metric;
use super::progress::{ClusterProgressObserver, ClusterProgressStage, NoopClusterProgress};
use crate::lineage::area::DEFAULT_AREA_EPSILON;
use crate::shared::config::LineageConfig;
use crate::shared::table::FrequencyTable;
use itertools::Itertools;
use rayon::prelude::*;
use thiserror::Error;

/// Above this many trajectories the quadratic number of pairs is worth a warning.
pub const LARGE_TABLE_WARNING: usize = 2_000;

#[derive(Error, Debug)]
pub enum DistanceError {
    #[error("Cannot compute pairwise distances: the trajectory table is empty.")]
    EmptyTable,
    #[error(
        "Cannot compute pairwise distances: none of the {0} trajectories share a comparable timepoint."
    )]
    Incomparable(usize),
    #[error("Failed to start the distance worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// How the fixed (swept) regions of two series relate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixationPattern {
    NeverFixed,
    OneFixed,
    /// Both fixed, with at least one timepoint where they are fixed together.
    FixedOverlapping,
    /// Both fixed, never at the same timepoint.
    FixedDisjoint,
}

pub fn classify(left: &[f64], right: &[f64], fixed_cutoff: f64) -> FixationPattern {
    let left_fixed = left.iter().any(|&v| v > fixed_cutoff);
    let right_fixed = right.iter().any(|&v| v > fixed_cutoff);
    match (left_fixed, right_fixed) {
        (false, false) => FixationPattern::NeverFixed,
        (true, false) | (false, true) => FixationPattern::OneFixed,
        (true, true) => {
            let overlap = left
                .iter()
                .zip(right)
                .any(|(&l, &r)| l > fixed_cutoff && r > fixed_cutoff);
            if overlap {
                FixationPattern::FixedOverlapping
            } else {
                FixationPattern::FixedDisjoint
            }
        }
    }
}

fn first_index_above(series: &[f64], cutoff: f64) -> Option<usize> {
    series.iter().position(|&v| v > cutoff)
}

/// Indices of the timepoints at which two series can be meaningfully compared.
///
/// A timepoint is dropped when both series are undetected. When both series are
/// fixed together the shared fixed timepoints carry no information and are dropped.
/// When only one series is fixed, timepoints where it is fixed while the other has
/// not yet been detected are dropped: the other series is still undecided there.
pub fn valid_timepoints(
    left: &[f64],
    right: &[f64],
    detection_cutoff: f64,
    fixed_cutoff: f64,
) -> Vec<usize> {
    let pattern = classify(left, right, fixed_cutoff);
    let left_detected = first_index_above(left, detection_cutoff);
    let right_detected = first_index_above(right, detection_cutoff);
    let undecided = |idx: usize, first_detected: Option<usize>| first_detected.is_none_or(|d| idx < d);

    (0..left.len())
        .filter(|&idx| {
            let (l, r) = (left[idx], right[idx]);
            if l <= detection_cutoff && r <= detection_cutoff {
                return false;
            }
            let (l_fixed, r_fixed) = (l > fixed_cutoff, r > fixed_cutoff);
            match pattern {
                FixationPattern::NeverFixed | FixationPattern::FixedDisjoint => true,
                FixationPattern::OneFixed => {
                    if l_fixed {
                        !undecided(idx, right_detected)
                    } else if r_fixed {
                        !undecided(idx, left_detected)
                    } else {
                        true
                    }
                }
                FixationPattern::FixedOverlapping => !(l_fixed && r_fixed),
            }
        })
        .collect()
}

/// True when both series fix at the same timepoint and stay fixed at exactly the
/// same set of timepoints.
pub fn fixed_overlap(left: &[f64], right: &[f64], fixed_cutoff: f64) -> bool {
    let left_fixed: Vec<usize> = (0..left.len()).filter(|&i| left[i] > fixed_cutoff).collect();
    let right_fixed: Vec<usize> = (0..right.len())
        .filter(|&i| right[i] > fixed_cutoff)
        .collect();
    match (left_fixed.first(), right_fixed.first()) {
        (Some(l), Some(r)) => l == r && left_fixed == right_fixed,
        _ => false,
    }
}

/// Distance between two full series, or `None` when they cannot be compared.
pub fn pairwise_distance(
    timepoints: &[f64],
    left: &[f64],
    right: &[f64],
    detection_cutoff: f64,
    fixed_cutoff: f64,
    metric: Metric,
    area_epsilon: f64,
) -> Option<f64> {
    let valid = valid_timepoints(left, right, detection_cutoff, fixed_cutoff);
    if valid.is_empty() {
        return fixed_overlap(left, right, fixed_cutoff).then_some(0.0);
    }
    let times: Vec<f64> = valid.iter().map(|&i| timepoints[i]).collect();
    let l: Vec<f64> = valid.iter().map(|&i| left[i]).collect();
    let r: Vec<f64> = valid.iter().map(|&i| right[i]).collect();
    metric.distance(&times, &l, &r, area_epsilon)
}

/// One unit of work for the distance pool.
#[derive(Clone, Copy, Debug)]
pub struct PairTask<'a> {
    pub pair: (&'a str, &'a str),
    pub series: (&'a [f64], &'a [f64]),
    pub timepoints: &'a [f64],
    pub detection_cutoff: f64,
    pub fixed_cutoff: f64,
    pub metric: Metric,
    pub area_epsilon: f64,
}

impl PairTask<'_> {
    pub fn evaluate(&self) -> ((String, String), Option<f64>) {
        let value = pairwise_distance(
            self.timepoints,
            self.series.0,
            self.series.1,
            self.detection_cutoff,
            self.fixed_cutoff,
            self.metric,
            self.area_epsilon,
        );
        ((self.pair.0.to_string(), self.pair.1.to_string()), value)
    }
}

#[derive(Clone, Debug)]
pub struct DistanceCalculator {
    pub detection_cutoff: f64,
    pub fixed_cutoff: f64,
    pub metric: Metric,
    /// Heights at or below this are flattened before polygons are built.
    pub area_epsilon: f64,
    /// Size of the worker pool; 0 uses every available CPU.
    pub worker_count: usize,
}

impl DistanceCalculator {
    pub fn new(detection_cutoff: f64, fixed_cutoff: f64, metric: Metric) -> Self {
        Self {
            detection_cutoff,
            fixed_cutoff,
            metric,
            area_epsilon: DEFAULT_AREA_EPSILON,
            worker_count: 0,
        }
    }

    pub fn from_config(config: &LineageConfig) -> Self {
        Self::new(config.detection_cutoff, config.fixed_cutoff, config.metric)
            .with_area_epsilon(config.area_epsilon)
            .with_workers(config.worker_count)
    }

    pub fn with_area_epsilon(mut self, area_epsilon: f64) -> Self {
        self.area_epsilon = area_epsilon;
        self
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Computes every pair of the table into a fresh cache.
    pub fn run(&self, table: &FrequencyTable) -> Result<DistanceCache, DistanceError> {
        let mut cache = DistanceCache::new();
        self.update(table, &mut cache, &mut NoopClusterProgress)?;
        Ok(cache)
    }

    /// Computes the pairs of `table` that `cache` does not hold yet. Returns how many
    /// pairs were computed.
    pub fn update<P>(
        &self,
        table: &FrequencyTable,
        cache: &mut DistanceCache,
        progress: &mut P,
    ) -> Result<usize, DistanceError>
    where
        P: ClusterProgressObserver + ?Sized,
    {
        if table.is_empty() {
            return Err(DistanceError::EmptyTable);
        }
        let n = table.len();
        if n > LARGE_TABLE_WARNING {
            log::warn!(
                "{} trajectories require {} pairwise comparisons; this may take a long time.",
                n,
                n * (n - 1) / 2
            );
        }

        let rows: Vec<Vec<f64>> = (0..n).map(|idx| table.row_at(idx).to_vec()).collect();
        let names = table.names();
        let tasks: Vec<PairTask<'_>> = (0..n)
            .tuple_combinations()
            .filter(|&(i, j)| !cache.contains(&names[i], &names[j]))
            .map(|(i, j)| PairTask {
                pair: (names[i].as_str(), names[j].as_str()),
                series: (rows[i].as_slice(), rows[j].as_slice()),
                timepoints: table.timepoints(),
                detection_cutoff: self.detection_cutoff,
                fixed_cutoff: self.fixed_cutoff,
                metric: self.metric,
                area_epsilon: self.area_epsilon,
            })
            .collect();

        let workers = if self.worker_count == 0 {
            num_cpus::get()
        } else {
            self.worker_count
        };
        log::info!(
            "Computing {} of {} pairwise distances with the {} metric on {} workers",
            tasks.len(),
            n * (n - 1) / 2,
            self.metric,
            workers
        );

        progress.on_stage_start(ClusterProgressStage::PairwiseDistances, tasks.len());
        let results: Vec<((String, String), Option<f64>)> = if tasks.is_empty() {
            Vec::new()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()?;
            pool.install(|| tasks.par_iter().map(PairTask::evaluate).collect())
        };
        let computed = results.len();
        let incomparable = results.iter().filter(|(_, value)| value.is_none()).count();
        progress.on_stage_advance(ClusterProgressStage::PairwiseDistances, computed);
        cache.update(results);
        progress.on_stage_finish(ClusterProgressStage::PairwiseDistances);

        if incomparable > 0 {
            log::debug!("{incomparable} pairs are incomparable and take the maximum distance");
        }
        if n >= 2 && !has_comparable_pair(names, cache) {
            return Err(DistanceError::Incomparable(n));
        }
        Ok(computed)
    }
}

fn has_comparable_pair(names: &[String], cache: &DistanceCache) -> bool {
    names
        .iter()
        .tuple_combinations()
        .any(|(a, b)| matches!(cache.raw(a, b), Some(Some(_))))
}
