//! Builds the ancestry tree of genotypes.
//!
//! Genotypes are processed in sort order. Each one is scored against every genotype
//! processed before it and nested under the oldest candidate whose score is close to
//! the best. Parents are always processed earlier than their children (or are the
//! root), so the tree cannot contain a cycle.

use super::score::{LineageScorer, ScoreRecord};
use crate::cluster::iterate::Genotype;
use crate::shared::config::LineageConfig;
use crate::shared::table::FrequencyTable;
use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// The synthetic "nothing detected" genotype every tree is rooted at.
pub const ROOT_GENOTYPE: &str = "genotype-0";

/// Score assigned to user-supplied parents so they always win.
pub const KNOWN_ANCESTRY_SCORE: f64 = 100.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AncestryError {
    #[error("Known ancestry names '{0}', which is neither a genotype nor one of their trajectories.")]
    UnknownGenotype(String),
    #[error("Known ancestry forms a cycle through genotype '{0}'.")]
    CyclicKnownAncestry(String),
    #[error("Genotype '{0}' is listed in the sort order but missing from the genotype table.")]
    MissingGenotype(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Candidate {
    pub parent: String,
    pub score: f64,
}

/// Child genotype to parent genotype. The root never appears as a key.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AncestryMap {
    parents: BTreeMap<String, String>,
}

impl AncestryMap {
    pub fn parent_of(&self, genotype: &str) -> Option<&str> {
        self.parents.get(genotype).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.parents.iter().map(|(child, parent)| (child.as_str(), parent.as_str()))
    }

    pub fn children_of(&self, genotype: &str) -> Vec<&str> {
        let mut children: Vec<&str> = self
            .iter()
            .filter(|(_, parent)| *parent == genotype)
            .map(|(child, _)| child)
            .collect();
        children.sort_by(|a, b| natord::compare(a, b));
        children
    }

    /// Ancestors from the direct parent up to the root. `None` if the chain does not
    /// reach the root within `len()` steps.
    pub fn lineage_of(&self, genotype: &str) -> Option<Vec<&str>> {
        if genotype == ROOT_GENOTYPE {
            return Some(Vec::new());
        }
        let mut current = self.parent_of(genotype)?;
        let mut chain = vec![current];
        for _ in 0..self.parents.len() {
            if current == ROOT_GENOTYPE {
                return Some(chain);
            }
            current = self.parent_of(current)?;
            chain.push(current);
        }
        None
    }

    fn insert(&mut self, child: &str, parent: &str) {
        self.parents.insert(child.to_string(), parent.to_string());
    }
}

#[derive(Clone, Debug, Default)]
pub struct AncestryResult {
    pub ancestry: AncestryMap,
    /// Genotypes in the order they were nested.
    pub processing_order: Vec<String>,
    /// Every candidate parent considered for each genotype, most recent first.
    pub confidence: BTreeMap<String, Vec<Candidate>>,
    pub scores: Vec<ScoreRecord>,
}

#[derive(Clone, Debug)]
pub struct AncestryBuilder {
    scorer: LineageScorer,
    minimum_score: f64,
    score_window: f64,
    known_ancestry: BTreeMap<String, String>,
}

impl AncestryBuilder {
    pub fn new(config: &LineageConfig) -> Self {
        Self {
            scorer: LineageScorer::from_config(config),
            minimum_score: config.minimum_score,
            score_window: config.score_window,
            known_ancestry: config.known_ancestry.clone(),
        }
    }

    /// Nests every genotype in `order` under a parent. `genotypes` provides the member
    /// trajectories that known-ancestry entries may refer to.
    pub fn build(
        &self,
        table: &FrequencyTable,
        genotypes: &[Genotype],
        order: &[String],
    ) -> Result<AncestryResult, AncestryError> {
        for name in order {
            if table.index_of(name).is_none() {
                return Err(AncestryError::MissingGenotype(name.clone()));
            }
        }
        let known = self.resolve_known_ancestry(table, genotypes)?;
        let processing_order = processing_order(table, order, &known);
        let mut result = AncestryResult {
            processing_order: processing_order.clone(),
            ..AncestryResult::default()
        };
        let Some(initial) = processing_order.first() else {
            return Ok(result);
        };
        log::debug!("Nesting initial genotype '{initial}' under the root");
        result.ancestry.insert(initial, ROOT_GENOTYPE);

        let rank: AHashMap<&str, usize> = processing_order
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();
        let timepoints = table.timepoints();
        for (position, child) in processing_order.iter().enumerate().skip(1) {
            let child_series = table.row(child).map(|row| row.to_vec()).unwrap_or_default();
            let mut candidates = Vec::with_capacity(position + 1);
            if let Some(parent) = known.get(child.as_str()) {
                candidates.push(Candidate {
                    parent: parent.clone(),
                    score: KNOWN_ANCESTRY_SCORE,
                });
            }
            for candidate in processing_order[..position].iter().rev() {
                let candidate_series = table
                    .row(candidate)
                    .map(|row| row.to_vec())
                    .unwrap_or_default();
                let scores = self
                    .scorer
                    .score_pair(timepoints, &candidate_series, &child_series);
                let record = ScoreRecord::new(candidate, child, scores);
                log::debug!(
                    "{} -> {}: greater {}, above-fixed {}, derivative {}, area {}, total {}",
                    candidate,
                    child,
                    scores.greater,
                    scores.above_fixed,
                    scores.derivative,
                    scores.area,
                    record.total
                );
                candidates.push(Candidate {
                    parent: candidate.clone(),
                    score: record.total,
                });
                result.scores.push(record);
            }

            let parent = match known.get(child.as_str()) {
                Some(parent) => parent.clone(),
                None => select_parent(&candidates, &rank, self.minimum_score, self.score_window),
            };
            let parent = if &parent == child {
                ROOT_GENOTYPE.to_string()
            } else {
                parent
            };
            result.ancestry.insert(child, &parent);
            result.confidence.insert(child.clone(), candidates);
        }

        log::info!(
            "Nested {} genotypes; {} directly under the root",
            result.ancestry.len(),
            result.ancestry.children_of(ROOT_GENOTYPE).len()
        );
        Ok(result)
    }

    /// Maps known-ancestry names (genotypes or their member trajectories) to genotypes
    /// and rejects cycles.
    fn resolve_known_ancestry(
        &self,
        table: &FrequencyTable,
        genotypes: &[Genotype],
    ) -> Result<BTreeMap<String, String>, AncestryError> {
        let resolve = |name: &str| -> Result<String, AncestryError> {
            if name == ROOT_GENOTYPE || table.index_of(name).is_some() {
                return Ok(name.to_string());
            }
            genotypes
                .iter()
                .find(|g| g.members.iter().any(|member| member == name))
                .map(|g| g.name.clone())
                .ok_or_else(|| AncestryError::UnknownGenotype(name.to_string()))
        };

        let mut known = BTreeMap::new();
        for (child, parent) in &self.known_ancestry {
            let child = resolve(child)?;
            let parent = resolve(parent)?;
            if child == ROOT_GENOTYPE {
                return Err(AncestryError::UnknownGenotype(child));
            }
            if child != parent {
                known.insert(child, parent);
            }
        }

        for start in known.keys() {
            let mut seen = AHashSet::new();
            let mut current = start.as_str();
            while let Some(parent) = known.get(current) {
                if !seen.insert(current) {
                    return Err(AncestryError::CyclicKnownAncestry(start.clone()));
                }
                current = parent.as_str();
            }
        }
        Ok(known)
    }
}

/// The highest-peaking genotype without a known parent goes first, the rest follow in
/// sort order, moved as needed so that known parents precede their children.
fn processing_order(
    table: &FrequencyTable,
    order: &[String],
    known: &BTreeMap<String, String>,
) -> Vec<String> {
    let peak = |name: &str| {
        table
            .row(name)
            .map(|row| row.iter().copied().fold(0.0, f64::max))
            .unwrap_or(0.0)
    };
    let has_known_parent =
        |name: &str| known.get(name).is_some_and(|parent| parent != ROOT_GENOTYPE);

    let mut initial: Option<(&String, f64)> = None;
    for name in order.iter().filter(|name| !has_known_parent(name)) {
        let value = peak(name);
        if initial.is_none_or(|(_, best)| value > best) {
            initial = Some((name, value));
        }
    }
    let Some((initial, _)) = initial else {
        return order.to_vec();
    };

    let mut placed: Vec<String> = vec![initial.clone()];
    let mut pending: Vec<&String> = order.iter().filter(|name| *name != initial).collect();
    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|name| {
            let ready = match known.get(name.as_str()) {
                Some(parent) => parent == ROOT_GENOTYPE || placed.contains(parent),
                None => true,
            };
            if ready {
                placed.push((*name).clone());
            }
            !ready
        });
        if pending.len() == before {
            placed.extend(pending.drain(..).cloned());
        }
    }
    placed
}

/// Among candidates scoring above `minimum`, the earliest-processed one whose score is
/// within `window` of the best. The root when nobody qualifies.
fn select_parent(
    candidates: &[Candidate],
    rank: &AHashMap<&str, usize>,
    minimum: f64,
    window: f64,
) -> String {
    let eligible: Vec<&Candidate> = candidates.iter().filter(|c| c.score > minimum).collect();
    let Some(best) = eligible.iter().map(|c| c.score).reduce(f64::max) else {
        return ROOT_GENOTYPE.to_string();
    };
    eligible
        .into_iter()
        .filter(|c| best - c.score < window)
        .min_by_key(|c| rank.get(c.parent.as_str()).copied().unwrap_or(usize::MAX))
        .map(|c| c.parent.clone())
        .unwrap_or_else(|| ROOT_GENOTYPE.to_string())
}
