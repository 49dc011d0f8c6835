//! Stage reporting for the cluster/validate loop.
//!
//! A stage may run once per loop iteration, so observers should expect
//! `Linkage` and `Validation` to restart after a trajectory is removed.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClusterProgressStage {
    /// Distances for pairs missing from the cache. Counted in pairs.
    PairwiseDistances,
    /// Agglomeration and dendrogram cut. Counted in trajectories.
    Linkage,
    /// Background search and the invalid-genotype check. Counted in genotypes.
    Validation,
}

impl ClusterProgressStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::PairwiseDistances => "pairwise distance computation",
            Self::Linkage => "hierarchical clustering",
            Self::Validation => "genotype validation",
        }
    }

    /// What the `total`/`processed` counts of this stage refer to.
    pub fn unit(self) -> &'static str {
        match self {
            Self::PairwiseDistances => "pairs",
            Self::Linkage => "trajectories",
            Self::Validation => "genotypes",
        }
    }
}

impl fmt::Display for ClusterProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Receives stage boundaries from the distance calculator and the cluster loop.
/// Every method is optional.
pub trait ClusterProgressObserver {
    fn on_stage_start(&mut self, _stage: ClusterProgressStage, _total: usize) {}
    fn on_stage_advance(&mut self, _stage: ClusterProgressStage, _processed: usize) {}
    fn on_stage_finish(&mut self, _stage: ClusterProgressStage) {}
}

/// Observer for library callers and tests that do not display progress.
#[derive(Default)]
pub struct NoopClusterProgress;

impl ClusterProgressObserver for NoopClusterProgress {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl ClusterProgressObserver for Recorder {
        fn on_stage_start(&mut self, stage: ClusterProgressStage, total: usize) {
            self.events.push(format!("start {stage} {total} {}", stage.unit()));
        }
        fn on_stage_finish(&mut self, stage: ClusterProgressStage) {
            self.events.push(format!("finish {stage}"));
        }
    }

    #[test]
    fn unobserved_events_fall_through_to_defaults() {
        let mut recorder = Recorder::default();
        recorder.on_stage_start(ClusterProgressStage::Linkage, 4);
        recorder.on_stage_advance(ClusterProgressStage::Linkage, 2);
        recorder.on_stage_finish(ClusterProgressStage::Linkage);
        assert_eq!(
            recorder.events,
            vec![
                "start hierarchical clustering 4 trajectories".to_string(),
                "finish hierarchical clustering".to_string()
            ]
        );
    }
}
