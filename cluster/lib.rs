#![deny(unused_variables)]
#![deny(unused_imports)]
pub mod cache;
pub mod calculate;
pub mod filter;
pub mod hierarchy;
pub mod iterate;
pub mod metric;
pub mod pipeline;
pub mod progress;
pub mod cluster {
    pub use super::{cache, calculate, filter, hierarchy, iterate, metric, pipeline, progress};
}

#[path = "../lineage/mod.rs"]
pub mod lineage;

#[path = "../shared/config.rs"]
pub mod shared_config;
#[path = "../shared/io.rs"]
pub mod shared_io;
#[path = "../shared/table.rs"]
pub mod shared_table;
pub mod shared {
    pub use super::shared_config as config;
    pub use super::shared_io as io;
    pub use super::shared_table as table;
}

pub use cache::DistanceCache;
pub use calculate::DistanceCalculator;
pub use hierarchy::{HierarchicalClustering, LinkageMethod};
pub use iterate::{ClusterFilterLoop, ClusterOutcome, Genotype};
pub use metric::Metric;
pub use pipeline::{WorkflowError, WorkflowResult, run_workflow};
pub use shared_config::LineageConfig;
pub use shared_table::FrequencyTable;
