//! Filters applied around clustering.
//!
//! Trajectories with no usable ordering information are dropped before the first
//! clustering pass. After each pass the genotypes are checked against fixed
//! backgrounds: once a background sweeps, genotypes that arose outside it must
//! vanish, so a genotype detected on both sides of the sweep was mis-clustered.

use crate::shared::table::{FrequencyTable, count_above, first_above};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Candidate fixation cutoffs for background detection, scanned in descending order.
pub const DEFAULT_BREAKPOINTS: [f64; 11] = [1.0, 0.9, 0.8, 0.7, 0.6, 0.5, 0.4, 0.3, 0.2, 0.1, 0.0];

/// A background must sum above this across all timepoints, which excludes one-timepoint blips.
const BACKGROUND_MINIMUM_SUM: f64 = 2.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("No backgrounds could be detected using any configured breakpoint.")]
    NoBackgrounds,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterReason {
    /// Never above the detection cutoff.
    Undetected,
    /// Above the detection cutoff at exactly one timepoint.
    SingleTimepoint,
    /// Already fixed at timepoint 0.
    FixedAtOrigin,
    /// Member of a genotype removed by the validity filter.
    InvalidGenotype,
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Undetected => "undetected",
            Self::SingleTimepoint => "single-timepoint",
            Self::FixedAtOrigin => "fixed-at-origin",
            Self::InvalidGenotype => "invalid-genotype",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FilteredTrajectory {
    pub name: String,
    pub reason: FilterReason,
}

/// Splits `table` into trajectories worth clustering and the ones that are dropped.
pub fn prefilter_trajectories(
    table: &FrequencyTable,
    detection_cutoff: f64,
    fixed_cutoff: f64,
) -> (FrequencyTable, Vec<FilteredTrajectory>) {
    let origin = table
        .timepoints()
        .iter()
        .position(|&t| t == 0.0)
        .unwrap_or(0);
    let mut filtered = Vec::new();
    for (name, series) in table.rows() {
        let detected = count_above(series, detection_cutoff);
        let reason = if detected == 0 {
            Some(FilterReason::Undetected)
        } else if series[origin] > fixed_cutoff {
            Some(FilterReason::FixedAtOrigin)
        } else if detected == 1 {
            Some(FilterReason::SingleTimepoint)
        } else {
            None
        };
        if let Some(reason) = reason {
            log::debug!("Dropping trajectory '{name}' before clustering: {reason}");
            filtered.push(FilteredTrajectory {
                name: name.to_string(),
                reason,
            });
        }
    }
    let removed: Vec<String> = filtered.iter().map(|f| f.name.clone()).collect();
    (table.without(&removed), filtered)
}

/// Genotypes that sweep past the first breakpoint (descending) that yields any.
/// Returns the breakpoint used together with the background names.
pub fn find_backgrounds(
    genotypes: &FrequencyTable,
    breakpoints: &[f64],
) -> Result<(f64, Vec<String>), FilterError> {
    let mut ordered = breakpoints.to_vec();
    ordered.sort_by(|a, b| b.total_cmp(a));
    ordered.dedup();

    for cutoff in ordered {
        let backgrounds: Vec<String> = genotypes
            .rows()
            .filter(|(_, series)| {
                series.iter().any(|&v| v > cutoff) && series.sum() > BACKGROUND_MINIMUM_SUM
            })
            .map(|(name, _)| name.to_string())
            .collect();
        if !backgrounds.is_empty() {
            return Ok((cutoff, backgrounds));
        }
    }
    Err(FilterError::NoBackgrounds)
}

/// First genotype, scanning backgrounds and then genotypes in table order, that is
/// detected both before a background appears and after it fixes without having
/// vanished at the fixation timepoint.
///
/// `strict` flags any detection at the fixation timepoint; otherwise the genotype
/// and the background together must exceed `1 + detection_cutoff` there.
pub fn find_invalid_genotype(
    genotypes: &FrequencyTable,
    backgrounds: &[String],
    detection_cutoff: f64,
    fixed_cutoff: f64,
    strict: bool,
) -> Option<String> {
    for background in backgrounds {
        let Some(bg) = genotypes.row(background) else {
            continue;
        };
        let (Some(detected_at), Some(fixed_at)) =
            (first_above(bg, detection_cutoff), first_above(bg, fixed_cutoff))
        else {
            continue;
        };

        for (name, series) in genotypes.rows() {
            if name == background {
                continue;
            }
            let before = series
                .iter()
                .take(detected_at)
                .any(|&v| v > detection_cutoff);
            let after = series
                .iter()
                .skip(fixed_at + 1)
                .any(|&v| v > detection_cutoff);
            if !(before && after) {
                continue;
            }
            let at_fixation = series[fixed_at];
            let survived = if strict {
                at_fixation > detection_cutoff
            } else {
                at_fixation + bg[fixed_at] > 1.0 + detection_cutoff
            };
            if survived {
                log::debug!(
                    "Genotype '{name}' persists through the sweep of background '{background}'"
                );
                return Some(name.to_string());
            }
        }
    }
    None
}
