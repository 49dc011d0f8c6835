//! Frequency tables shared by every stage of the engine.
//!
//! A [`FrequencyTable`] is a dense matrix of frequencies with named rows and a
//! sorted numeric timepoint axis. The same type carries the imported trajectory
//! table and the per-genotype mean table produced by clustering.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("The timepoint axis must include timepoint 0.")]
    MissingOrigin,
    #[error("Timepoint {0} appears more than once in the table header.")]
    DuplicateTimepoint(f64),
    #[error("Timepoint values must be finite; found {0}.")]
    NonFiniteTimepoint(f64),
    #[error("The row name '{0}' appears more than once. Row names must be unique.")]
    DuplicateName(String),
    #[error("Row '{name}' has {found} values but the table has {expected} timepoints.")]
    RowLength {
        name: String,
        found: usize,
        expected: usize,
    },
    #[error(
        "Row '{name}' has frequency {value} at timepoint {timepoint}; frequencies must be finite and within [0, 1]."
    )]
    OutOfRange {
        name: String,
        timepoint: f64,
        value: f64,
    },
    #[error("No row named '{0}' exists in the table.")]
    UnknownRow(String),
    #[error("Cannot average an empty set of rows.")]
    EmptySelection,
}

/// Named frequency series over a shared, ascending timepoint axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrequencyTable {
    timepoints: Vec<f64>,
    names: Vec<String>,
    /// Shape: [rows, timepoints].
    values: Array2<f64>,
}

impl FrequencyTable {
    /// Builds a table from unsorted timepoints and rows listed in the same column order.
    /// Columns are re-sorted ascending; every row is validated.
    pub fn new(timepoints: Vec<f64>, rows: Vec<(String, Vec<f64>)>) -> Result<Self, TableError> {
        for &t in &timepoints {
            if !t.is_finite() {
                return Err(TableError::NonFiniteTimepoint(t));
            }
        }
        let mut order: Vec<usize> = (0..timepoints.len()).collect();
        order.sort_by(|&a, &b| timepoints[a].total_cmp(&timepoints[b]));
        let sorted: Vec<f64> = order.iter().map(|&i| timepoints[i]).collect();
        for pair in sorted.windows(2) {
            if pair[0] == pair[1] {
                return Err(TableError::DuplicateTimepoint(pair[0]));
            }
        }
        if !sorted.contains(&0.0) {
            return Err(TableError::MissingOrigin);
        }

        let mut names = Vec::with_capacity(rows.len());
        let mut seen = HashSet::with_capacity(rows.len());
        let mut values = Array2::zeros((rows.len(), sorted.len()));
        for (row_idx, (name, row)) in rows.into_iter().enumerate() {
            if row.len() != sorted.len() {
                return Err(TableError::RowLength {
                    name,
                    found: row.len(),
                    expected: sorted.len(),
                });
            }
            if !seen.insert(name.clone()) {
                return Err(TableError::DuplicateName(name));
            }
            for (col_idx, &source_col) in order.iter().enumerate() {
                let value = row[source_col];
                if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                    return Err(TableError::OutOfRange {
                        name,
                        timepoint: sorted[col_idx],
                        value,
                    });
                }
                values[[row_idx, col_idx]] = value;
            }
            names.push(name);
        }

        Ok(Self {
            timepoints: sorted,
            names,
            values,
        })
    }

    /// Builds a table from already-sorted parts; used for derived tables.
    pub(crate) fn from_parts(timepoints: Vec<f64>, names: Vec<String>, values: Array2<f64>) -> Self {
        debug_assert_eq!(values.nrows(), names.len());
        debug_assert_eq!(values.ncols(), timepoints.len());
        Self {
            timepoints,
            names,
            values,
        }
    }

    pub fn timepoints(&self) -> &[f64] {
        &self.timepoints
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn row(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.index_of(name).map(|idx| self.values.row(idx))
    }

    pub fn row_at(&self, idx: usize) -> ArrayView1<'_, f64> {
        self.values.row(idx)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, ArrayView1<'_, f64>)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.axis_iter(Axis(0)))
    }

    /// Keeps only the named rows, preserving this table's row order.
    pub fn subset<'a, I>(&self, keep: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut wanted = HashSet::new();
        for name in keep {
            if self.index_of(name).is_none() {
                return Err(TableError::UnknownRow(name.to_string()));
            }
            wanted.insert(name);
        }
        let indices: Vec<usize> = (0..self.len())
            .filter(|&idx| wanted.contains(self.names[idx].as_str()))
            .collect();
        Ok(self.select_rows(&indices))
    }

    /// Drops the named rows. Names that are not present are ignored.
    pub fn without(&self, remove: &[String]) -> Self {
        let removed: HashSet<&str> = remove.iter().map(String::as_str).collect();
        let indices: Vec<usize> = (0..self.len())
            .filter(|&idx| !removed.contains(self.names[idx].as_str()))
            .collect();
        self.select_rows(&indices)
    }

    /// Arithmetic mean of the named rows at every timepoint.
    pub fn mean_of(&self, members: &[String]) -> Result<Array1<f64>, TableError> {
        if members.is_empty() {
            return Err(TableError::EmptySelection);
        }
        let mut total = Array1::<f64>::zeros(self.timepoints.len());
        for name in members {
            let row = self
                .row(name)
                .ok_or_else(|| TableError::UnknownRow(name.clone()))?;
            total += &row;
        }
        total /= members.len() as f64;
        Ok(total)
    }

    fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            timepoints: self.timepoints.clone(),
            names: indices.iter().map(|&idx| self.names[idx].clone()).collect(),
            values: self.values.select(Axis(0), indices),
        }
    }
}

/// Index of the first value strictly above `cutoff`.
pub fn first_above(series: ArrayView1<'_, f64>, cutoff: f64) -> Option<usize> {
    series.iter().position(|&value| value > cutoff)
}

/// Number of values strictly above `cutoff`.
pub fn count_above(series: ArrayView1<'_, f64>, cutoff: f64) -> usize {
    series.iter().filter(|&&value| value > cutoff).count()
}
