//! Labeled integer count tables.
//!
//! A `CountTable` holds one row per sample and one column per feature
//! (taxon, OTU, ...). Source tables and sink tables share this layout so
//! that a sink row can be handed straight to the sampler.

use indexmap::IndexSet;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("Count matrix has shape {rows}x{cols} but {n_samples} sample and {n_features} feature labels were given")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        n_samples: usize,
        n_features: usize,
    },

    #[error("Duplicate {kind} label '{label}'")]
    DuplicateLabel { kind: &'static str, label: String },

    #[error("Missing value for sample '{sample}', feature '{feature}'")]
    Missing { sample: String, feature: String },

    #[error("Value '{value}' for sample '{sample}', feature '{feature}' is not numeric")]
    NotNumeric {
        sample: String,
        feature: String,
        value: String,
    },

    #[error("Value for sample '{sample}', feature '{feature}' is NaN or infinite")]
    NonFinite { sample: String, feature: String },

    #[error("Negative count {value} for sample '{sample}', feature '{feature}'")]
    Negative {
        sample: String,
        feature: String,
        value: f64,
    },

    #[error("Non-integer count {value} for sample '{sample}', feature '{feature}'; enable fractional correction to round counts up")]
    NonInteger {
        sample: String,
        feature: String,
        value: f64,
    },

    #[error("Feature columns differ between tables: {0}")]
    FeatureMismatch(String),

    #[error("Need at least {required} source(s), found {found}")]
    TooFewSources { required: usize, found: usize },
}

/// Represents a count table.
///
/// Counts are non-negative integers. Row labels are sample (or collapsed
/// source) identities, column labels are feature identities; both keep
/// their insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct CountTable {
    /// The core count data matrix (samples x features).
    counts: Array2<u64>,
    sample_ids: IndexSet<String>,
    feature_ids: IndexSet<String>,
}

impl CountTable {
    /// Builds a table from an already integer-valued matrix.
    pub fn new(
        counts: Array2<u64>,
        sample_ids: Vec<String>,
        feature_ids: Vec<String>,
    ) -> Result<Self, InputError> {
        let (rows, cols) = counts.dim();
        if rows != sample_ids.len() || cols != feature_ids.len() {
            return Err(InputError::ShapeMismatch {
                rows,
                cols,
                n_samples: sample_ids.len(),
                n_features: feature_ids.len(),
            });
        }
        Ok(CountTable {
            counts,
            sample_ids: unique_labels(sample_ids, "sample")?,
            feature_ids: unique_labels(feature_ids, "feature")?,
        })
    }

    /// Builds a table from raw floating point values, rejecting anything the
    /// sampler cannot handle.
    ///
    /// NaN, infinite and negative values are always rejected. Fractional
    /// values are rejected unless `apply_fractional_correction` is set, in
    /// which case they are rounded up.
    pub fn from_raw(
        values: ArrayView2<f64>,
        sample_ids: Vec<String>,
        feature_ids: Vec<String>,
        apply_fractional_correction: bool,
    ) -> Result<Self, InputError> {
        let (rows, cols) = values.dim();
        if rows != sample_ids.len() || cols != feature_ids.len() {
            return Err(InputError::ShapeMismatch {
                rows,
                cols,
                n_samples: sample_ids.len(),
                n_features: feature_ids.len(),
            });
        }

        let mut counts = Array2::<u64>::zeros((rows, cols));
        for ((r, c), &value) in values.indexed_iter() {
            counts[[r, c]] = check_and_correct(value, apply_fractional_correction).map_err(
                |kind| kind.into_error(&sample_ids[r], &feature_ids[c], value),
            )?;
        }

        Self::new(counts, sample_ids, feature_ids)
    }

    /// Returns the dimensions of the count table (samples, features).
    pub fn dimensions(&self) -> (usize, usize) {
        self.counts.dim()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.counts.ncols()
    }

    /// Returns a reference to the underlying count matrix.
    pub fn counts_matrix(&self) -> &Array2<u64> {
        &self.counts
    }

    pub fn sample_ids(&self) -> Vec<String> {
        self.sample_ids.iter().cloned().collect()
    }

    pub fn feature_ids(&self) -> Vec<String> {
        self.feature_ids.iter().cloned().collect()
    }

    pub fn sample_id(&self, index: usize) -> Option<&str> {
        self.sample_ids.get_index(index).map(String::as_str)
    }

    /// Counts of row `index`.
    pub fn row(&self, index: usize) -> ArrayView1<u64> {
        self.counts.row(index)
    }

    /// Retrieves the counts for a specific sample.
    pub fn get_sample_counts(&self, sample_id: &str) -> Option<ArrayView1<u64>> {
        self.sample_ids
            .get_index_of(sample_id)
            .map(|idx| self.counts.row(idx))
    }

    /// Per-sample totals.
    pub fn sample_totals(&self) -> Vec<u64> {
        self.counts.sum_axis(Axis(1)).to_vec()
    }

    /// A copy of the table with row `index` removed.
    pub fn without_sample(&self, index: usize) -> CountTable {
        let keep: Vec<usize> = (0..self.n_samples()).filter(|&i| i != index).collect();
        CountTable {
            counts: self.counts.select(Axis(0), &keep),
            sample_ids: keep
                .iter()
                .filter_map(|&i| self.sample_ids.get_index(i).cloned())
                .collect(),
            feature_ids: self.feature_ids.clone(),
        }
    }

    /// Checks that `other` has the same feature columns in the same order.
    pub fn ensure_same_features(&self, other: &CountTable) -> Result<(), InputError> {
        if self.n_features() != other.n_features() {
            return Err(InputError::FeatureMismatch(format!(
                "{} features vs {} features",
                self.n_features(),
                other.n_features()
            )));
        }
        if let Some((a, b)) = self
            .feature_ids
            .iter()
            .zip(other.feature_ids.iter())
            .find(|(a, b)| a != b)
        {
            return Err(InputError::FeatureMismatch(format!(
                "'{}' does not match '{}'",
                a, b
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BadValue {
    NonFinite,
    Negative,
    NonInteger,
}

impl BadValue {
    fn into_error(self, sample: &str, feature: &str, value: f64) -> InputError {
        let sample = sample.to_string();
        let feature = feature.to_string();
        match self {
            BadValue::NonFinite => InputError::NonFinite { sample, feature },
            BadValue::Negative => InputError::Negative {
                sample,
                feature,
                value,
            },
            BadValue::NonInteger => InputError::NonInteger {
                sample,
                feature,
                value,
            },
        }
    }
}

fn check_and_correct(value: f64, apply_fractional_correction: bool) -> Result<u64, BadValue> {
    if !value.is_finite() {
        return Err(BadValue::NonFinite);
    }
    if value < 0.0 {
        return Err(BadValue::Negative);
    }
    if value.fract() != 0.0 {
        if !apply_fractional_correction {
            return Err(BadValue::NonInteger);
        }
        return Ok(value.ceil() as u64);
    }
    Ok(value as u64)
}

fn unique_labels(labels: Vec<String>, kind: &'static str) -> Result<IndexSet<String>, InputError> {
    let mut set = IndexSet::with_capacity(labels.len());
    for label in labels {
        if set.contains(&label) {
            return Err(InputError::DuplicateLabel { kind, label });
        }
        set.insert(label);
    }
    Ok(set)
}
