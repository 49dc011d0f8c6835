//! Hierarchical clustering of trajectories into genotypes.
//!
//! The cached distances are materialized as a condensed matrix, agglomerated with
//! `kodama`, reordered with an optimal leaf ordering and cut into flat clusters at
//! either a supplied distance or a low quantile of the observed distances.

use super::cache::{CacheError, DistanceCache};
use itertools::Itertools;
use kodama::{Method, linkage};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_CUTOFF_QUANTILE: f64 = 0.05;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("There are no trajectories to cluster.")]
    Empty,
    #[error("The cluster cut distance must be finite and non-negative; got {0}.")]
    InvalidCutoff(f64),
    #[error("The cutoff quantile must lie within [0, 1]; got {0}.")]
    InvalidQuantile(f64),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkageMethodError {
    #[error(
        "Unknown clustering linkage method '{0}'. Expected one of: ward, average, complete, single, weighted."
    )]
    Unknown(String),
}

/// Agglomeration rule. Only monotone rules are offered so the tree can be cut by height.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LinkageMethod {
    #[default]
    Ward,
    Average,
    Complete,
    Single,
    Weighted,
}

impl LinkageMethod {
    fn kodama(self) -> Method {
        match self {
            Self::Ward => Method::Ward,
            Self::Average => Method::Average,
            Self::Complete => Method::Complete,
            Self::Single => Method::Single,
            Self::Weighted => Method::Weighted,
        }
    }
}

impl FromStr for LinkageMethod {
    type Err = LinkageMethodError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ward" => Ok(Self::Ward),
            "average" => Ok(Self::Average),
            "complete" => Ok(Self::Complete),
            "single" => Ok(Self::Single),
            "weighted" => Ok(Self::Weighted),
            _ => Err(LinkageMethodError::Unknown(value.to_string())),
        }
    }
}

impl TryFrom<String> for LinkageMethod {
    type Error = LinkageMethodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LinkageMethod> for String {
    fn from(value: LinkageMethod) -> Self {
        value.to_string()
    }
}

impl fmt::Display for LinkageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ward => "ward",
            Self::Average => "average",
            Self::Complete => "complete",
            Self::Single => "single",
            Self::Weighted => "weighted",
        })
    }
}

/// Where to cut the linkage tree.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClusterCutoff {
    /// Quantile of the distances that are neither zero nor the maximum.
    Inferred { quantile: f64 },
    Distance(f64),
}

impl Default for ClusterCutoff {
    fn default() -> Self {
        Self::Inferred {
            quantile: DEFAULT_CUTOFF_QUANTILE,
        }
    }
}

/// One merge: `left` and `right` are leaf indices (< n) or earlier merges (n + step).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LinkageStep {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
    pub size: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LinkageTree {
    labels: Vec<String>,
    steps: Vec<LinkageStep>,
    leaf_order: Vec<usize>,
}

impl LinkageTree {
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn steps(&self) -> &[LinkageStep] {
        &self.steps
    }

    /// Leaf indices in optimal dendrogram order.
    pub fn leaf_order(&self) -> &[usize] {
        &self.leaf_order
    }

    pub fn ordered_labels(&self) -> Vec<&str> {
        self.leaf_order
            .iter()
            .map(|&idx| self.labels[idx].as_str())
            .collect()
    }

    /// Flat clusters of leaf indices whose merge height is at most `cutoff`.
    /// Clusters are ordered by their smallest leaf index; leaves inside a cluster ascend.
    pub fn cut(&self, cutoff: f64) -> Vec<Vec<usize>> {
        let n = self.labels.len();
        let mut membership: Vec<Option<usize>> = vec![None; n + self.steps.len()];
        let mut next_group = 0;

        for (idx, step) in self.steps.iter().enumerate().rev() {
            let node = n + idx;
            if step.distance <= cutoff {
                let group = match membership[node] {
                    Some(group) => group,
                    None => {
                        next_group += 1;
                        next_group - 1
                    }
                };
                membership[node] = Some(group);
                membership[step.left] = Some(group);
                membership[step.right] = Some(group);
            }
        }

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut slot_of_group: Vec<Option<usize>> = vec![None; next_group];
        for (leaf, group) in membership.into_iter().take(n).enumerate() {
            match group {
                Some(group) => match slot_of_group[group] {
                    Some(slot) => groups[slot].push(leaf),
                    None => {
                        slot_of_group[group] = Some(groups.len());
                        groups.push(vec![leaf]);
                    }
                },
                None => groups.push(vec![leaf]),
            }
        }
        groups
    }
}

#[derive(Clone, Debug)]
pub struct ClusterResult {
    pub clusters: Vec<Vec<String>>,
    pub linkage: LinkageTree,
    pub cutoff: f64,
}

#[derive(Clone, Debug, Default)]
pub struct HierarchicalClustering {
    pub method: LinkageMethod,
    pub cutoff: ClusterCutoff,
}

impl HierarchicalClustering {
    pub fn new(method: LinkageMethod, cutoff: ClusterCutoff) -> Self {
        Self { method, cutoff }
    }

    /// Clusters `labels` using the distances in `cache`. Members of each starting group
    /// are placed at distance zero from each other so they merge first.
    pub fn run(
        &self,
        cache: &DistanceCache,
        labels: &[String],
        starting_groups: &[Vec<String>],
    ) -> Result<ClusterResult, ClusterError> {
        match self.cutoff {
            ClusterCutoff::Distance(d) if !d.is_finite() || d < 0.0 => {
                return Err(ClusterError::InvalidCutoff(d));
            }
            ClusterCutoff::Inferred { quantile } if !(0.0..=1.0).contains(&quantile) => {
                return Err(ClusterError::InvalidQuantile(quantile));
            }
            _ => {}
        }
        let n = labels.len();
        if n == 0 {
            return Err(ClusterError::Empty);
        }
        if n == 1 {
            return Ok(ClusterResult {
                clusters: vec![labels.to_vec()],
                linkage: LinkageTree {
                    labels: labels.to_vec(),
                    steps: Vec::new(),
                    leaf_order: vec![0],
                },
                cutoff: match self.cutoff {
                    ClusterCutoff::Distance(d) => d,
                    ClusterCutoff::Inferred { .. } => 0.0,
                },
            });
        }

        let mut working = cache.reduce(labels.iter().map(String::as_str));
        force_starting_groups(&mut working, labels, starting_groups);

        let mut condensed = working.to_condensed_form(labels)?;
        let cutoff = match self.cutoff {
            ClusterCutoff::Distance(d) => d,
            ClusterCutoff::Inferred { quantile } => infer_cutoff(&condensed, quantile),
        };

        let dendrogram = linkage(&mut condensed, n, self.method.kodama());
        let steps: Vec<LinkageStep> = dendrogram
            .steps()
            .iter()
            .map(|step| LinkageStep {
                left: step.cluster1,
                right: step.cluster2,
                distance: step.dissimilarity,
                size: step.size,
            })
            .collect();
        let matrix = working.to_square_matrix(labels)?;
        let leaf_order = optimal_leaf_order(n, &steps, &matrix);
        let tree = LinkageTree {
            labels: labels.to_vec(),
            steps,
            leaf_order,
        };

        let clusters: Vec<Vec<String>> = tree
            .cut(cutoff)
            .into_iter()
            .map(|group| group.into_iter().map(|idx| labels[idx].clone()).collect())
            .collect();
        log::debug!(
            "Cut {} trajectories into {} clusters at distance {:.4} ({} linkage)",
            n,
            clusters.len(),
            cutoff,
            self.method
        );

        Ok(ClusterResult {
            clusters,
            linkage: tree,
            cutoff,
        })
    }
}

fn force_starting_groups(
    cache: &mut DistanceCache,
    labels: &[String],
    starting_groups: &[Vec<String>],
) {
    for group in starting_groups {
        let present: Vec<&String> = group.iter().filter(|name| labels.contains(name)).collect();
        if present.len() < group.len() {
            log::warn!(
                "Starting group [{}] names {} trajectories that are not being clustered",
                group.join(", "),
                group.len() - present.len()
            );
        }
        for (a, b) in present.into_iter().tuple_combinations() {
            cache.insert(a, b, Some(0.0));
        }
    }
}

/// Low quantile of the distances, ignoring exact zeros and the maximum so the cut
/// neither collapses to zero nor reaches the "unrelated" sentinel. Falls back to 0.
pub fn infer_cutoff(distances: &[f64], quantile: f64) -> f64 {
    let maximum = distances.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut candidates: Vec<f64> = distances
        .iter()
        .copied()
        .filter(|&d| d != 0.0 && d != maximum)
        .collect();
    if candidates.is_empty() {
        return 0.0;
    }
    candidates.sort_by(f64::total_cmp);
    let position = quantile * (candidates.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    candidates[lower] + (candidates[upper] - candidates[lower]) * fraction
}

/// Leaf order minimizing the summed distance between neighbouring leaves, among all
/// orders consistent with the tree (Bar-Joseph et al.). Every pair of leaves has a
/// single lowest common ancestor, so the per-node cost tables share one n x n matrix.
pub fn optimal_leaf_order(n: usize, steps: &[LinkageStep], distances: &Array2<f64>) -> Vec<usize> {
    if n <= 2 || steps.len() + 1 != n {
        return (0..n).collect();
    }
    let mut leaves: Vec<Vec<usize>> = (0..n).map(|leaf| vec![leaf]).collect();
    let mut children: Vec<Option<(usize, usize)>> = vec![None; n];
    let mut cost = Array2::<f64>::zeros((n, n));
    let mut split = vec![(0usize, 0usize); n * n];
    let mut slot = vec![0usize; n];

    for step in steps {
        let (a, b) = (step.left, step.right);
        for (position, &k) in leaves[b].iter().enumerate() {
            slot[k] = position;
        }
        for &i in &leaves[a] {
            let ends_of_a = far_side(&leaves, &children, a, i);
            let through: Vec<(f64, usize)> = leaves[b]
                .iter()
                .map(|&k| {
                    ends_of_a
                        .iter()
                        .map(|&h| (cost[[i, h]] + distances[[h, k]], h))
                        .min_by(|x, y| x.0.total_cmp(&y.0))
                        .unwrap_or((f64::INFINITY, i))
                })
                .collect();
            for &j in &leaves[b] {
                let starts_of_b = far_side(&leaves, &children, b, j);
                let mut best = (f64::INFINITY, (i, j));
                for &k in starts_of_b {
                    let (partial, h) = through[slot[k]];
                    let total = partial + cost[[k, j]];
                    if total < best.0 {
                        best = (total, (h, k));
                    }
                }
                let (h, k) = best.1;
                cost[[i, j]] = best.0;
                cost[[j, i]] = best.0;
                split[i * n + j] = (h, k);
                split[j * n + i] = (k, h);
            }
        }
        let mut merged = leaves[a].clone();
        merged.extend_from_slice(&leaves[b]);
        leaves.push(merged);
        children.push(Some((a, b)));
    }

    let root = leaves.len() - 1;
    let Some((a, b)) = children[root] else {
        return (0..n).collect();
    };
    let mut start = (f64::INFINITY, leaves[a][0], leaves[b][0]);
    for &i in &leaves[a] {
        for &j in &leaves[b] {
            if cost[[i, j]] < start.0 {
                start = (cost[[i, j]], i, j);
            }
        }
    }

    let mut order = Vec::with_capacity(n);
    walk(root, start.1, start.2, &leaves, &children, &split, n, &mut order);
    order
}

/// Leaves a path through `node` may end on when it starts at `leaf`.
fn far_side<'a>(
    leaves: &'a [Vec<usize>],
    children: &[Option<(usize, usize)>],
    node: usize,
    leaf: usize,
) -> &'a [usize] {
    match children[node] {
        None => &leaves[node],
        Some((x, y)) => {
            if leaves[x].contains(&leaf) {
                &leaves[y]
            } else {
                &leaves[x]
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn walk(
    node: usize,
    from: usize,
    to: usize,
    leaves: &[Vec<usize>],
    children: &[Option<(usize, usize)>],
    split: &[(usize, usize)],
    n: usize,
    order: &mut Vec<usize>,
) {
    match children[node] {
        None => order.push(from),
        Some((x, y)) => {
            let (h, k) = split[from * n + to];
            let (first, second) = if leaves[x].contains(&from) {
                (x, y)
            } else {
                (y, x)
            };
            walk(first, from, h, leaves, children, split, n, order);
            walk(second, k, to, leaves, children, split, n, order);
        }
    }
}
