//! Symmetric store of pairwise trajectory distances.
//!
//! Each unordered pair is stored under both orderings so lookups never need to
//! canonicalize names. Values are kept raw: `None` marks a pair that could not be
//! compared, and it is only resolved to the maximum distance when a matrix is
//! materialized for a concrete set of labels. Reducing the cache to fewer labels
//! therefore re-resolves incomparable pairs against the new maximum.

use ahash::AHashMap;
use ndarray::{Array2, ArrayView2};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("No distance has been computed for the pair ('{0}', '{1}').")]
    MissingPair(String, String),
    #[error("Cannot compute pairwise distances: every pair of trajectories is incomparable.")]
    NoComparablePairs,
    #[error("Expected a {expected}x{expected} distance matrix; got {rows}x{cols}.")]
    Shape {
        expected: usize,
        rows: usize,
        cols: usize,
    },
    #[error("The distance matrix is not symmetric at ('{0}', '{1}').")]
    Asymmetric(String, String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DistanceCache {
    entries: AHashMap<(String, String), Option<f64>>,
}

impl DistanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every cached pair.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Number of unordered pairs.
    pub fn len(&self) -> usize {
        self.entries.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stores `value` for the unordered pair. Self-pairs are never stored.
    pub fn insert(&mut self, a: &str, b: &str, value: Option<f64>) {
        if a == b {
            return;
        }
        self.entries.insert((a.to_string(), b.to_string()), value);
        self.entries.insert((b.to_string(), a.to_string()), value);
    }

    pub fn update<I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = ((String, String), Option<f64>)>,
    {
        for ((a, b), value) in pairs {
            self.insert(&a, &b, value);
        }
    }

    pub fn contains(&self, a: &str, b: &str) -> bool {
        self.entries.contains_key(&(a.to_string(), b.to_string()))
    }

    /// The stored value: `None` if the pair is missing, `Some(None)` if it is incomparable.
    pub fn raw(&self, a: &str, b: &str) -> Option<Option<f64>> {
        self.entries.get(&(a.to_string(), b.to_string())).copied()
    }

    /// Resolved distance. Incomparable pairs take the maximum comparable distance.
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        if a == b {
            return Some(0.0);
        }
        match self.raw(a, b)? {
            Some(value) => Some(value),
            None => self.max_distance(),
        }
    }

    /// Largest comparable distance in the cache.
    pub fn max_distance(&self) -> Option<f64> {
        self.entries
            .values()
            .flatten()
            .copied()
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
    }

    /// Every label that appears in at least one pair, in natural order.
    pub fn labels(&self) -> Vec<String> {
        let unique: HashSet<&String> = self.entries.keys().map(|(a, _)| a).collect();
        let mut labels: Vec<String> = unique.into_iter().cloned().collect();
        labels.sort_by(|a, b| natord::compare(a, b));
        labels
    }

    /// A new cache holding only pairs whose labels both appear in `keep`.
    pub fn reduce<'a, I>(&self, keep: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let keep: HashSet<&str> = keep.into_iter().collect();
        let entries = self
            .entries
            .iter()
            .filter(|((a, b), _)| keep.contains(a.as_str()) && keep.contains(b.as_str()))
            .map(|(key, value)| (key.clone(), *value))
            .collect();
        Self { entries }
    }

    /// Dense symmetric matrix over `labels`, zero on the diagonal.
    pub fn to_square_matrix(&self, labels: &[String]) -> Result<Array2<f64>, CacheError> {
        let n = labels.len();
        let mut raw = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                let value = self
                    .raw(&labels[i], &labels[j])
                    .ok_or_else(|| CacheError::MissingPair(labels[i].clone(), labels[j].clone()))?;
                raw.push(((i, j), value));
            }
        }

        let maximum = raw
            .iter()
            .filter_map(|(_, value)| *value)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))));
        if maximum.is_none() && !raw.is_empty() {
            return Err(CacheError::NoComparablePairs);
        }
        let sentinel = maximum.unwrap_or(0.0);

        let mut matrix = Array2::zeros((n, n));
        for ((i, j), value) in raw {
            let resolved = value.unwrap_or(sentinel);
            matrix[[i, j]] = resolved;
            matrix[[j, i]] = resolved;
        }
        Ok(matrix)
    }

    /// Upper triangle of the square matrix, row-major, as linkage routines expect.
    pub fn to_condensed_form(&self, labels: &[String]) -> Result<Vec<f64>, CacheError> {
        let matrix = self.to_square_matrix(labels)?;
        let n = labels.len();
        let mut condensed = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                condensed.push(matrix[[i, j]]);
            }
        }
        Ok(condensed)
    }

    pub fn from_square_matrix(
        labels: &[String],
        matrix: ArrayView2<'_, f64>,
    ) -> Result<Self, CacheError> {
        let n = labels.len();
        if matrix.nrows() != n || matrix.ncols() != n {
            return Err(CacheError::Shape {
                expected: n,
                rows: matrix.nrows(),
                cols: matrix.ncols(),
            });
        }
        let mut cache = Self::new();
        for i in 0..n {
            for j in (i + 1)..n {
                let upper = matrix[[i, j]];
                if (upper - matrix[[j, i]]).abs() > 1.0e-12 {
                    return Err(CacheError::Asymmetric(labels[i].clone(), labels[j].clone()));
                }
                cache.insert(&labels[i], &labels[j], Some(upper));
            }
        }
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn example() -> DistanceCache {
        let mut cache = DistanceCache::new();
        cache.insert("a", "b", Some(0.5));
        cache.insert("a", "c", Some(1.5));
        cache.insert("b", "c", None);
        cache.insert("c", "d", Some(0.25));
        cache.insert("a", "d", Some(0.75));
        cache.insert("b", "d", Some(2.0));
        cache
    }

    #[test]
    fn insert_is_symmetric_and_skips_self_pairs() {
        let mut cache = DistanceCache::new();
        cache.insert("x", "y", Some(0.3));
        cache.insert("x", "x", Some(9.0));
        assert_eq!(cache.raw("y", "x"), Some(Some(0.3)));
        assert_eq!(cache.raw("x", "x"), None);
        assert_eq!(cache.get("x", "x"), Some(0.0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn incomparable_pairs_resolve_to_maximum() {
        let cache = example();
        assert_eq!(cache.get("b", "c"), Some(2.0));
        assert_eq!(cache.get("c", "b"), Some(2.0));

        // Without d the maximum shrinks, and so does the sentinel.
        let reduced = cache.reduce(["a", "b", "c"]);
        let matrix = reduced.to_square_matrix(&labels(&["a", "b", "c"])).unwrap();
        assert_abs_diff_eq!(matrix[[1, 2]], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(matrix[[2, 1]], 1.5, epsilon = 1e-12);
        assert_eq!(matrix[[0, 0]], 0.0);
    }

    #[test]
    fn reduce_is_idempotent() {
        let cache = example();
        let keep = ["a", "c", "d"];
        let once = cache.reduce(keep);
        let twice = once.reduce(keep);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
        assert_eq!(once.labels(), labels(&["a", "c", "d"]));
    }

    #[test]
    fn square_matrix_round_trip() {
        let cache = example();
        let names = labels(&["a", "b", "c", "d"]);
        let matrix = cache.to_square_matrix(&names).unwrap();
        let rebuilt = DistanceCache::from_square_matrix(&names, matrix.view()).unwrap();
        for a in &names {
            for b in &names {
                assert_eq!(rebuilt.get(a, b), cache.get(a, b), "pair {a}/{b}");
            }
        }
    }

    #[test]
    fn condensed_form_is_row_major_upper_triangle() {
        let cache = example();
        let condensed = cache
            .to_condensed_form(&labels(&["a", "b", "c", "d"]))
            .unwrap();
        assert_eq!(condensed, vec![0.5, 1.5, 0.75, 2.0, 2.0, 0.25]);
    }

    #[test]
    fn missing_and_incomparable_matrices_fail() {
        let cache = example();
        let err = cache.to_square_matrix(&labels(&["a", "e"])).unwrap_err();
        assert!(matches!(err, CacheError::MissingPair(_, _)));

        let mut blind = DistanceCache::new();
        blind.insert("a", "b", None);
        let err = blind.to_square_matrix(&labels(&["a", "b"])).unwrap_err();
        assert_eq!(err, CacheError::NoComparablePairs);
    }

    #[test]
    fn rejects_asymmetric_input() {
        let names = labels(&["a", "b"]);
        let matrix = ndarray::array![[0.0, 1.0], [2.0, 0.0]];
        assert!(matches!(
            DistanceCache::from_square_matrix(&names, matrix.view()),
            Err(CacheError::Asymmetric(_, _))
        ));
    }
}
