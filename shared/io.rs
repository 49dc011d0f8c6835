//! Tab-separated import of trajectory tables and export of workflow results.

use crate::cluster::filter::FilteredTrajectory;
use crate::cluster::iterate::Genotype;
use crate::cluster::pipeline::WorkflowResult;
use crate::lineage::ancestry::AncestryMap;
use crate::lineage::score::ScoreRecord;
use crate::shared::table::{FrequencyTable, TableError};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableIoError {
    #[error("Failed to read or write a table file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Malformed tab-separated data: {0}")]
    CsvError(#[from] csv::Error),
    #[error("The header needs a name column followed by at least one timepoint column.")]
    MissingTimepoints,
    #[error("Header cell '{0}' is not a numeric timepoint.")]
    InvalidTimepoint(String),
    #[error("Row {row}, timepoint '{column}': '{value}' is not a number.")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },
    #[error("Row {0} has no trajectory name.")]
    MissingName(usize),
    #[error(transparent)]
    Table(#[from] TableError),
}

pub fn read_trajectory_table(path: &Path) -> Result<FrequencyTable, TableIoError> {
    parse_trajectory_table(File::open(path)?)
}

/// Parses a table whose first column holds trajectory names and whose remaining
/// header cells are timepoints. Empty cells are 0. Tables holding any value above 1
/// are read as percentages.
pub fn parse_trajectory_table<R: Read>(reader: R) -> Result<FrequencyTable, TableIoError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(TableIoError::MissingTimepoints);
    }
    let timepoints = headers
        .iter()
        .skip(1)
        .map(|cell| {
            cell.parse::<f64>()
                .map_err(|_| TableIoError::InvalidTimepoint(cell.to_string()))
        })
        .collect::<Result<Vec<f64>, _>>()?;

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let row_number = line + 2;
        let name = record.get(0).unwrap_or("");
        if name.is_empty() {
            return Err(TableIoError::MissingName(row_number));
        }
        let mut values = Vec::with_capacity(timepoints.len());
        for (column, cell) in record.iter().skip(1).enumerate() {
            let value = if cell.is_empty() {
                0.0
            } else {
                cell.parse::<f64>().map_err(|_| TableIoError::InvalidValue {
                    row: row_number,
                    column: headers.get(column + 1).unwrap_or("?").to_string(),
                    value: cell.to_string(),
                })?
            };
            values.push(value);
        }
        rows.push((name.to_string(), values));
    }

    if rows.iter().flat_map(|(_, values)| values).any(|&v| v > 1.0) {
        log::info!("Frequencies above 1 found; reading the table as percentages");
        for (_, values) in &mut rows {
            for value in values.iter_mut() {
                *value /= 100.0;
            }
        }
    }
    Ok(FrequencyTable::new(timepoints, rows)?)
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<File>, TableIoError> {
    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?)
}

/// One row per genotype: name, `|`-joined members, then the mean frequencies.
pub fn write_genotype_table(
    path: &Path,
    table: &FrequencyTable,
    genotypes: &[Genotype],
) -> Result<(), TableIoError> {
    let mut writer = tsv_writer(path)?;
    let mut header = vec!["genotype".to_string(), "members".to_string()];
    header.extend(table.timepoints().iter().map(|t| t.to_string()));
    writer.write_record(&header)?;
    for genotype in genotypes {
        let Some(series) = table.row(&genotype.name) else {
            continue;
        };
        let mut record = vec![genotype.name.clone(), genotype.members.join("|")];
        record.extend(series.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_ancestry(path: &Path, ancestry: &AncestryMap, order: &[String]) -> Result<(), TableIoError> {
    let mut writer = tsv_writer(path)?;
    writer.write_record(["genotype", "parent"])?;
    for genotype in order {
        if let Some(parent) = ancestry.parent_of(genotype) {
            writer.write_record([genotype.as_str(), parent])?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn write_scores(path: &Path, scores: &[ScoreRecord]) -> Result<(), TableIoError> {
    let mut writer = tsv_writer(path)?;
    writer.write_record([
        "parent",
        "child",
        "greater",
        "above_fixed",
        "derivative",
        "area",
        "total",
    ])?;
    for record in scores {
        writer.write_record([
            record.parent.clone(),
            record.child.clone(),
            record.scores.greater.to_string(),
            record.scores.above_fixed.to_string(),
            record.scores.derivative.to_string(),
            record.scores.area.to_string(),
            record.total.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_filtered(path: &Path, filtered: &[FilteredTrajectory]) -> Result<(), TableIoError> {
    let mut writer = tsv_writer(path)?;
    writer.write_record(["trajectory", "reason"])?;
    for trajectory in filtered {
        writer.write_record([trajectory.name.clone(), trajectory.reason.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes `genotypes.tsv`, `ancestry.tsv`, `scores.tsv` and `filtered.tsv` into `dir`.
pub fn write_outputs(dir: &Path, result: &WorkflowResult) -> Result<Vec<PathBuf>, TableIoError> {
    fs::create_dir_all(dir)?;
    let genotypes = dir.join("genotypes.tsv");
    let ancestry = dir.join("ancestry.tsv");
    let scores = dir.join("scores.tsv");
    let filtered = dir.join("filtered.tsv");

    write_genotype_table(&genotypes, &result.genotype_table, &result.genotypes)?;
    let mut order = result.sort_order.clone();
    order.retain(|name| result.ancestry.parent_of(name).is_some());
    write_ancestry(&ancestry, &result.ancestry, &order)?;
    write_scores(&scores, &result.scores)?;
    write_filtered(&filtered, &result.filtered)?;
    Ok(vec![genotypes, ancestry, scores, filtered])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::filter::FilterReason;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    #[test]
    fn parses_tab_separated_table() {
        let text = "trajectory\t0\t2\t1\nA\t0\t0.5\t0.25\nB\t0.1\t\t0.2\n";
        let table = parse_trajectory_table(text.as_bytes()).expect("parse");
        assert_eq!(table.timepoints(), &[0.0, 1.0, 2.0]);
        assert_eq!(table.row("A").unwrap().to_vec(), vec![0.0, 0.25, 0.5]);
        assert_eq!(table.row("B").unwrap().to_vec(), vec![0.1, 0.2, 0.0]);
    }

    #[test]
    fn percentages_are_rescaled() {
        let text = "name\t0\t1\nA\t0\t50\nB\t1\t100\n";
        let table = parse_trajectory_table(text.as_bytes()).expect("parse");
        assert_abs_diff_eq!(table.row("A").unwrap()[1], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(table.row("B").unwrap()[0], 0.01, epsilon = 1e-12);
    }

    #[test]
    fn rejects_bad_cells() {
        let header = parse_trajectory_table("name\tday-one\nA\t0.1\n".as_bytes());
        assert!(matches!(header, Err(TableIoError::InvalidTimepoint(_))));

        let value = parse_trajectory_table("name\t0\t1\nA\t0\tlots\n".as_bytes());
        assert!(matches!(value, Err(TableIoError::InvalidValue { row: 2, .. })));

        let origin = parse_trajectory_table("name\t1\t2\nA\t0\t0.1\n".as_bytes());
        assert!(matches!(origin, Err(TableIoError::Table(TableError::MissingOrigin))));
    }

    #[test]
    fn writes_filtered_trajectories() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("filtered.tsv");
        let filtered = vec![FilteredTrajectory {
            name: "A".into(),
            reason: FilterReason::SingleTimepoint,
        }];
        write_filtered(&path, &filtered).expect("write");
        let text = fs::read_to_string(&path).expect("read back");
        assert_eq!(text, "trajectory\treason\nA\tsingle-timepoint\n");
    }
}
