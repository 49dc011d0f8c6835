//! End-to-end run: trajectories in, genotypes and their ancestry out.

use super::cache::DistanceCache;
use super::filter::{FilteredTrajectory, prefilter_trajectories};
use super::hierarchy::LinkageTree;
use super::iterate::{ClusterFilterLoop, Genotype, IterationError};
use super::progress::ClusterProgressObserver;
use crate::lineage::ancestry::{AncestryBuilder, AncestryError, AncestryMap, Candidate};
use crate::lineage::score::ScoreRecord;
use crate::lineage::sort::sort_genotypes;
use crate::shared::config::{ConfigError, LineageConfig};
use crate::shared::table::FrequencyTable;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Every trajectory was filtered out before clustering; there is nothing to cluster.")]
    NothingToCluster,
    #[error(transparent)]
    Iteration(#[from] IterationError),
    #[error(transparent)]
    Ancestry(#[from] AncestryError),
}

#[derive(Clone, Debug)]
pub struct WorkflowResult {
    pub genotype_table: FrequencyTable,
    pub genotypes: Vec<Genotype>,
    /// Trajectories dropped by the pre-filter followed by those removed while iterating.
    pub filtered: Vec<FilteredTrajectory>,
    pub linkage: LinkageTree,
    pub cutoff: f64,
    pub iterations: usize,
    pub converged: bool,
    pub sort_order: Vec<String>,
    pub ancestry: AncestryMap,
    pub confidence: BTreeMap<String, Vec<Candidate>>,
    pub scores: Vec<ScoreRecord>,
}

pub fn run_workflow<P>(
    table: &FrequencyTable,
    config: &LineageConfig,
    progress: &mut P,
) -> Result<WorkflowResult, WorkflowError>
where
    P: ClusterProgressObserver + ?Sized,
{
    config.validate()?;
    log::info!(
        "Clustering {} trajectories over {} timepoints (detection {}, fixed {})",
        table.len(),
        table.timepoints().len(),
        config.detection_cutoff,
        config.fixed_cutoff
    );

    let (working, mut filtered) = if config.prefilter {
        prefilter_trajectories(table, config.detection_cutoff, config.fixed_cutoff)
    } else {
        (table.clone(), Vec::new())
    };
    if !filtered.is_empty() {
        log::info!("Filtered {} trajectories before clustering", filtered.len());
    }
    if working.is_empty() {
        return Err(WorkflowError::NothingToCluster);
    }

    let mut cache = DistanceCache::new();
    let outcome = ClusterFilterLoop::new(config).run(&working, &mut cache, progress)?;
    filtered.extend(outcome.removed);

    let sort_order = sort_genotypes(
        &outcome.genotype_table,
        config.detection_cutoff,
        config.fixed_cutoff,
        &config.sort_breakpoints,
    );
    log::debug!("Genotype order: {}", sort_order.join(", "));
    let lineage = AncestryBuilder::new(config).build(
        &outcome.genotype_table,
        &outcome.genotypes,
        &sort_order,
    )?;

    Ok(WorkflowResult {
        genotype_table: outcome.genotype_table,
        genotypes: outcome.genotypes,
        filtered,
        linkage: outcome.linkage,
        cutoff: outcome.cutoff,
        iterations: outcome.iterations,
        converged: outcome.converged,
        sort_order,
        ancestry: lineage.ancestry,
        confidence: lineage.confidence,
        scores: lineage.scores,
    })
}
