//! Alternates clustering and genotype validation until no genotype is invalid.

use super::cache::DistanceCache;
use super::calculate::{DistanceCalculator, DistanceError};
use super::filter::{FilterReason, FilteredTrajectory, find_backgrounds, find_invalid_genotype};
use super::hierarchy::{ClusterError, HierarchicalClustering, LinkageTree};
use super::progress::{ClusterProgressObserver, ClusterProgressStage};
use crate::shared::config::LineageConfig;
use crate::shared::table::{FrequencyTable, TableError};
use ndarray::Array2;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IterationError {
    #[error(transparent)]
    Distance(#[from] DistanceError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("Every trajectory was removed by the genotype validity filter.")]
    Exhausted,
}

/// A cluster of trajectories presumed to share a genetic background.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Genotype {
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Cluster,
    Validate,
    Terminated,
}

#[derive(Clone, Debug)]
pub struct ClusterOutcome {
    pub genotypes: Vec<Genotype>,
    /// Mean member frequency of each genotype, rows named after the genotypes.
    pub genotype_table: FrequencyTable,
    pub linkage: LinkageTree,
    pub cutoff: f64,
    /// Trajectories stripped from invalid genotypes, in removal order.
    pub removed: Vec<FilteredTrajectory>,
    pub iterations: usize,
    /// False when the iteration cap stopped the loop with an invalid genotype left.
    pub converged: bool,
}

struct Snapshot {
    genotypes: Vec<Genotype>,
    genotype_table: FrequencyTable,
    linkage: LinkageTree,
    cutoff: f64,
}

pub struct ClusterFilterLoop<'a> {
    config: &'a LineageConfig,
}

impl<'a> ClusterFilterLoop<'a> {
    pub fn new(config: &'a LineageConfig) -> Self {
        Self { config }
    }

    /// Runs the loop over `table`. Distances already present in `cache` are reused and
    /// the cache is left holding the pairs of the final working table.
    pub fn run<P>(
        &self,
        table: &FrequencyTable,
        cache: &mut DistanceCache,
        progress: &mut P,
    ) -> Result<ClusterOutcome, IterationError>
    where
        P: ClusterProgressObserver + ?Sized,
    {
        let config = self.config;
        let calculator = DistanceCalculator::from_config(config);
        let clustering = HierarchicalClustering::new(config.linkage, config.cluster_cutoff());

        let mut working = table.clone();
        let mut removed: Vec<FilteredTrajectory> = Vec::new();
        let mut snapshot: Option<Snapshot> = None;
        let mut iterations = 0;
        let mut converged = true;
        let mut state = LoopState::Cluster;

        while state != LoopState::Terminated {
            state = match state {
                LoopState::Cluster => {
                    iterations += 1;
                    *cache = cache.reduce(working.names().iter().map(String::as_str));
                    calculator.update(&working, cache, progress)?;

                    progress.on_stage_start(ClusterProgressStage::Linkage, working.len());
                    let result =
                        clustering.run(cache, working.names(), &config.starting_genotypes)?;
                    progress.on_stage_advance(ClusterProgressStage::Linkage, working.len());
                    progress.on_stage_finish(ClusterProgressStage::Linkage);

                    let (genotypes, genotype_table) = build_genotypes(&working, &result.clusters)?;
                    log::info!(
                        "Iteration {}: {} trajectories grouped into {} genotypes (cut at {:.4})",
                        iterations,
                        working.len(),
                        genotypes.len(),
                        result.cutoff
                    );
                    snapshot = Some(Snapshot {
                        genotypes,
                        genotype_table,
                        linkage: result.linkage,
                        cutoff: result.cutoff,
                    });
                    LoopState::Validate
                }
                LoopState::Validate => {
                    let Some(current) = snapshot.as_ref() else {
                        break;
                    };
                    progress.on_stage_start(ClusterProgressStage::Validation, current.genotypes.len());
                    let invalid = match find_backgrounds(&current.genotype_table, &config.breakpoints) {
                        Ok((cutoff, backgrounds)) => {
                            log::debug!(
                                "Backgrounds above {cutoff}: {}",
                                backgrounds.join(", ")
                            );
                            find_invalid_genotype(
                                &current.genotype_table,
                                &backgrounds,
                                config.detection_cutoff,
                                cutoff,
                                config.strict_filter,
                            )
                        }
                        Err(err) => {
                            log::warn!("{err} Skipping genotype validation.");
                            None
                        }
                    };
                    progress.on_stage_finish(ClusterProgressStage::Validation);

                    match invalid {
                        None => LoopState::Terminated,
                        Some(name) if iterations >= config.max_iterations => {
                            log::warn!(
                                "Stopped after {iterations} iterations with genotype '{name}' still invalid; keeping the last clustering."
                            );
                            converged = false;
                            LoopState::Terminated
                        }
                        Some(name) => {
                            let members = current
                                .genotypes
                                .iter()
                                .find(|g| g.name == name)
                                .map(|g| g.members.clone())
                                .unwrap_or_default();
                            log::info!(
                                "Removing invalid genotype '{}' ({} trajectories: {})",
                                name,
                                members.len(),
                                members.join(", ")
                            );
                            removed.extend(members.iter().map(|member| FilteredTrajectory {
                                name: member.clone(),
                                reason: FilterReason::InvalidGenotype,
                            }));
                            working = working.without(&members);
                            if working.is_empty() {
                                return Err(IterationError::Exhausted);
                            }
                            LoopState::Cluster
                        }
                    }
                }
                LoopState::Terminated => LoopState::Terminated,
            };
        }

        let Snapshot {
            genotypes,
            genotype_table,
            linkage,
            cutoff,
        } = snapshot.ok_or(IterationError::Exhausted)?;
        Ok(ClusterOutcome {
            genotypes,
            genotype_table,
            linkage,
            cutoff,
            removed,
            iterations,
            converged,
        })
    }
}

/// Names clusters `genotype-1`, `genotype-2`, ... in cluster order and averages their members.
fn build_genotypes(
    table: &FrequencyTable,
    clusters: &[Vec<String>],
) -> Result<(Vec<Genotype>, FrequencyTable), TableError> {
    let mut values = Array2::<f64>::zeros((clusters.len(), table.timepoints().len()));
    let mut genotypes = Vec::with_capacity(clusters.len());
    for (idx, members) in clusters.iter().enumerate() {
        let mean = table.mean_of(members)?;
        values.row_mut(idx).assign(&mean);
        genotypes.push(Genotype {
            name: format!("genotype-{}", idx + 1),
            members: members.clone(),
        });
    }
    let names = genotypes.iter().map(|g| g.name.clone()).collect();
    let genotype_table = FrequencyTable::from_parts(table.timepoints().to_vec(), names, values);
    Ok((genotypes, genotype_table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::progress::NoopClusterProgress;
    use approx::assert_abs_diff_eq;

    fn table(rows: &[(&str, &[f64])]) -> FrequencyTable {
        let width = rows[0].1.len();
        FrequencyTable::new(
            (0..width).map(|t| t as f64).collect(),
            rows.iter()
                .map(|(name, values)| (name.to_string(), values.to_vec()))
                .collect(),
        )
        .expect("valid table")
    }

    fn config() -> LineageConfig {
        LineageConfig {
            worker_count: 1,
            ..LineageConfig::default()
        }
    }

    #[test]
    fn genotype_means_follow_members() {
        let input = table(&[("a", &[0.0, 0.2, 0.4]), ("b", &[0.0, 0.4, 0.6])]);
        let clusters = vec![vec!["a".to_string(), "b".to_string()]];
        let (genotypes, means) = build_genotypes(&input, &clusters).unwrap();
        assert_eq!(genotypes[0].name, "genotype-1");
        let row = means.row("genotype-1").unwrap();
        assert_abs_diff_eq!(row[1], 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(row[2], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn correlated_rise_clusters_together() {
        let input = table(&[
            ("A", &[0.0, 0.0, 0.0, 0.1, 0.5, 0.5]),
            ("B", &[0.0, 0.1, 0.15, 0.03, 0.0, 0.0]),
            ("C", &[0.0, 0.0, 0.0, 0.3, 0.7, 1.0]),
        ]);
        let config = config();
        let mut cache = DistanceCache::new();
        let outcome = ClusterFilterLoop::new(&config)
            .run(&input, &mut cache, &mut NoopClusterProgress)
            .expect("loop runs");
        let members: Vec<Vec<String>> = outcome.genotypes.iter().map(|g| g.members.clone()).collect();
        assert_eq!(
            members,
            vec![
                vec!["A".to_string(), "C".to_string()],
                vec!["B".to_string()]
            ]
        );
        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 1);
        assert!(outcome.removed.is_empty());
    }

    #[test]
    fn invalid_genotype_is_removed_and_reclustered() {
        // "sweep" fixes at t=3; "ghost" is present before it appears and after it fixes.
        let input = table(&[
            ("sweep-1", &[0.0, 0.0, 0.5, 1.0, 1.0, 1.0]),
            ("sweep-2", &[0.0, 0.0, 0.52, 1.0, 1.0, 1.0]),
            ("ghost", &[0.0, 0.2, 0.25, 0.2, 0.3, 0.25]),
        ]);
        let config = LineageConfig {
            distance_cutoff: Some(0.5),
            ..config()
        };
        let mut cache = DistanceCache::new();
        let outcome = ClusterFilterLoop::new(&config)
            .run(&input, &mut cache, &mut NoopClusterProgress)
            .expect("loop runs");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(
            outcome.removed,
            vec![FilteredTrajectory {
                name: "ghost".to_string(),
                reason: FilterReason::InvalidGenotype
            }]
        );
        let remaining: Vec<String> = outcome.genotypes.iter().flat_map(|g| g.members.clone()).collect();
        assert_eq!(remaining, vec!["sweep-1".to_string(), "sweep-2".to_string()]);
        assert_eq!(cache.labels(), remaining);
    }

    #[test]
    fn iteration_cap_keeps_last_state() {
        let input = table(&[
            ("sweep-1", &[0.0, 0.0, 0.5, 1.0, 1.0, 1.0]),
            ("sweep-2", &[0.0, 0.0, 0.52, 1.0, 1.0, 1.0]),
            ("ghost", &[0.0, 0.2, 0.25, 0.2, 0.3, 0.25]),
        ]);
        let config = LineageConfig {
            distance_cutoff: Some(0.5),
            max_iterations: 1,
            ..config()
        };
        let mut cache = DistanceCache::new();
        let outcome = ClusterFilterLoop::new(&config)
            .run(&input, &mut cache, &mut NoopClusterProgress)
            .expect("loop runs");
        assert!(!outcome.converged);
        assert!(outcome.removed.is_empty());
        let total: usize = outcome.genotypes.iter().map(|g| g.members.len()).sum();
        assert_eq!(total, 3);
    }
}
