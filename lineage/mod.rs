pub mod ancestry;
pub mod area;
pub mod score;
pub mod sort;
pub use ancestry::{AncestryBuilder, AncestryError, AncestryMap, ROOT_GENOTYPE};
pub use score::{LineageScorer, PairScores, ScoreRecord};
pub use sort::sort_genotypes;
