//! Orders genotypes for the ancestry builder: those that reach high frequencies
//! first come first.

use crate::shared::table::{FrequencyTable, first_above};
use std::cmp::Ordering;

/// Genotype names ordered by the first frequency threshold they exceed, then by when
/// they exceed it. Thresholds are `fixed_cutoff` followed by `breakpoints`, descending.
pub fn sort_genotypes(
    genotypes: &FrequencyTable,
    detection_cutoff: f64,
    fixed_cutoff: f64,
    breakpoints: &[f64],
) -> Vec<String> {
    let mut thresholds = Vec::with_capacity(breakpoints.len() + 1);
    thresholds.push(fixed_cutoff);
    thresholds.extend_from_slice(breakpoints);
    thresholds.sort_by(|a, b| b.total_cmp(a));
    thresholds.dedup();

    let mut placed = vec![false; genotypes.len()];
    let mut order = Vec::with_capacity(genotypes.len());
    for threshold in thresholds {
        let mut tier: Vec<(usize, usize, Option<usize>)> = genotypes
            .rows()
            .enumerate()
            .filter(|(idx, _)| !placed[*idx])
            .filter_map(|(idx, (_, series))| {
                first_above(series, threshold)
                    .map(|crossed| (idx, crossed, first_above(series, detection_cutoff)))
            })
            .collect();
        tier.sort_by(|a, b| {
            a.1.cmp(&b.1)
                .then_with(|| compare_detection(a.2, b.2))
                .then_with(|| natord::compare(&genotypes.names()[a.0], &genotypes.names()[b.0]))
        });
        for (idx, _, _) in tier {
            placed[idx] = true;
            order.push(genotypes.names()[idx].clone());
        }
    }

    let mut leftovers: Vec<&String> = genotypes
        .names()
        .iter()
        .enumerate()
        .filter(|(idx, _)| !placed[*idx])
        .map(|(_, name)| name)
        .collect();
    leftovers.sort_by(|a, b| natord::compare(a, b));
    order.extend(leftovers.into_iter().cloned());
    order
}

fn compare_detection(a: Option<usize>, b: Option<usize>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
