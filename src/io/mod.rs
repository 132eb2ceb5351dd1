//! Input/Output operations module.
//!
//! Reads tab-delimited count tables and writes run results: mixing
//! proportions, their standard deviations, per-sink feature tables and the
//! parameters the run used.

use crate::config::GibbsConfig;
use crate::count_table::{CountTable, InputError};
use crate::stats::collate::{GibbsResults, LabeledMatrix};
use anyhow::{Context, Result};
use log::info;
use ndarray::Array2;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const MIXING_PROPORTIONS_FILE: &str = "mixing_proportions.txt";
pub const MIXING_PROPORTIONS_STDS_FILE: &str = "mixing_proportions_stds.txt";
pub const PARAMETERS_FILE: &str = "parameters.json";
pub const FEATURE_TABLE_SUFFIX: &str = ".feature_table.txt";

/// Reads a count table from a tab-delimited file.
///
/// The first row holds feature ids after a leading corner cell; each
/// following row is a sample id followed by one count per feature.
pub fn read_count_table(path: &Path, apply_fractional_correction: bool) -> Result<CountTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open count table '{}'", path.display()))?;

    let headers = rdr.headers()?.clone();
    let feature_ids: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();

    let mut sample_ids = Vec::new();
    let mut values = Vec::new();
    for result in rdr.records() {
        let record = result
            .with_context(|| format!("Malformed row in count table '{}'", path.display()))?;
        let sample_id = record.get(0).unwrap_or_default().trim().to_string();
        for (feature, field) in feature_ids.iter().zip(record.iter().skip(1)) {
            values.push(parse_count(field, &sample_id, feature)?);
        }
        sample_ids.push(sample_id);
    }

    let matrix = Array2::from_shape_vec((sample_ids.len(), feature_ids.len()), values)
        .with_context(|| format!("Count table '{}' is not rectangular", path.display()))?;
    let table = CountTable::from_raw(
        matrix.view(),
        sample_ids,
        feature_ids,
        apply_fractional_correction,
    )
    .with_context(|| format!("Invalid count table '{}'", path.display()))?;

    info!(
        "Read {} samples x {} features from {}",
        table.n_samples(),
        table.n_features(),
        path.display()
    );
    Ok(table)
}

fn parse_count(field: &str, sample: &str, feature: &str) -> Result<f64, InputError> {
    let field = field.trim();
    if field.is_empty() {
        return Err(InputError::Missing {
            sample: sample.to_string(),
            feature: feature.to_string(),
        });
    }
    field.parse::<f64>().map_err(|_| InputError::NotNumeric {
        sample: sample.to_string(),
        feature: feature.to_string(),
        value: field.to_string(),
    })
}

/// Writes a labeled matrix as a tab-delimited table with `corner` as the
/// first header cell.
pub fn write_labeled_matrix<T: Display>(
    matrix: &LabeledMatrix<T>,
    corner: &str,
    output_path: &Path,
) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create '{}'", output_path.display()))?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(BufWriter::new(file));

    let mut header = vec![corner.to_string()];
    header.extend(matrix.col_ids.iter().cloned());
    writer.write_record(&header)?;

    for (row_id, row) in matrix.row_ids.iter().zip(matrix.values.outer_iter()) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(row_id.clone());
        record.extend(row.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Writes every result of a run into `output_dir`, which must exist.
///
/// Returns the paths written.
pub fn write_results(
    results: &GibbsResults,
    config: &GibbsConfig,
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    let path = output_dir.join(MIXING_PROPORTIONS_FILE);
    write_labeled_matrix(&results.proportions.means, "SampleID", &path)?;
    written.push(path);

    let path = output_dir.join(MIXING_PROPORTIONS_STDS_FILE);
    write_labeled_matrix(&results.proportions.stds, "SampleID", &path)?;
    written.push(path);

    if let Some(tables) = &results.feature_tables {
        for (sink_id, table) in results.proportions.means.row_ids.iter().zip(tables) {
            let path = output_dir.join(format!("{}{}", sink_id, FEATURE_TABLE_SUFFIX));
            write_labeled_matrix(&table.table, "Source", &path)?;
            written.push(path);
        }
    }

    let path = output_dir.join(PARAMETERS_FILE);
    let mut file = BufWriter::new(
        File::create(&path).with_context(|| format!("Failed to create '{}'", path.display()))?,
    );
    serde_json::to_writer_pretty(&mut file, config)?;
    file.flush()?;
    written.push(path);

    info!("Wrote {} result files to {}", written.len(), output_dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::collate::{FeatureTable, MixingProportions};
    use ndarray::arr2;
    use std::fs;
    use tempfile::tempdir;

    fn write_file(path: &Path, content: &str) {
        let mut file = File::create(path).unwrap();
        write!(file, "{}", content).unwrap();
    }

    #[test]
    fn test_read_count_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sources.tsv");
        write_file(&path, "SampleID\tOTU1\tOTU2\tOTU3\nsoil\t10\t0\t5\nwater\t0\t3\t7\n");

        let table = read_count_table(&path, false).unwrap();
        assert_eq!(table.dimensions(), (2, 3));
        assert_eq!(table.sample_ids(), vec!["soil", "water"]);
        assert_eq!(table.feature_ids(), vec!["OTU1", "OTU2", "OTU3"]);
        assert_eq!(table.counts_matrix(), &arr2(&[[10, 0, 5], [0, 3, 7]]));
    }

    #[test]
    fn test_read_count_table_rejects_bad_values() {
        let dir = tempdir().unwrap();

        let path = dir.path().join("fractional.tsv");
        write_file(&path, "id\tA\tB\ns1\t1.5\t2\n");
        assert!(read_count_table(&path, false).is_err());
        let corrected = read_count_table(&path, true).unwrap();
        assert_eq!(corrected.counts_matrix(), &arr2(&[[2, 2]]));

        let path = dir.path().join("text.tsv");
        write_file(&path, "id\tA\tB\ns1\tabc\t2\n");
        let err = read_count_table(&path, true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InputError>(),
            Some(InputError::NotNumeric { .. })
        ));

        let path = dir.path().join("missing.tsv");
        write_file(&path, "id\tA\tB\ns1\t\t2\n");
        let err = read_count_table(&path, true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InputError>(),
            Some(InputError::Missing { .. })
        ));

        let path = dir.path().join("ragged.tsv");
        write_file(&path, "id\tA\tB\ns1\t1\n");
        assert!(read_count_table(&path, true).is_err());
    }

    #[test]
    fn test_write_labeled_matrix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("matrix.txt");
        let matrix = LabeledMatrix {
            row_ids: vec!["sink1".to_string()],
            col_ids: vec!["soil".to_string(), "Unknown".to_string()],
            values: arr2(&[[0.75, 0.25]]),
        };
        write_labeled_matrix(&matrix, "SampleID", &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "SampleID\tsoil\tUnknown\nsink1\t0.75\t0.25\n");
    }

    #[test]
    fn test_write_results() {
        let dir = tempdir().unwrap();
        let ids = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let results = GibbsResults {
            proportions: MixingProportions {
                means: LabeledMatrix {
                    row_ids: ids(&["sink1"]),
                    col_ids: ids(&["soil", "Unknown"]),
                    values: arr2(&[[0.5, 0.5]]),
                },
                stds: LabeledMatrix {
                    row_ids: ids(&["sink1"]),
                    col_ids: ids(&["soil", "Unknown"]),
                    values: arr2(&[[0.1, 0.1]]),
                },
            },
            feature_tables: Some(vec![FeatureTable {
                table: LabeledMatrix {
                    row_ids: ids(&["soil", "Unknown"]),
                    col_ids: ids(&["OTU1"]),
                    values: arr2(&[[3], [1]]),
                },
                n_draws: 1,
            }]),
        };
        let config = GibbsConfig::default();

        let written = write_results(&results, &config, dir.path()).unwrap();
        assert_eq!(written.len(), 4);

        let ft = fs::read_to_string(dir.path().join("sink1.feature_table.txt")).unwrap();
        assert_eq!(ft, "Source\tOTU1\nsoil\t3\nUnknown\t1\n");

        let params = fs::read_to_string(dir.path().join(PARAMETERS_FILE)).unwrap();
        let back: GibbsConfig = serde_json::from_str(&params).unwrap();
        assert_eq!(back, config);
    }
}
