//! Collation of raw chain draws into mixing proportions and feature tables.

use crate::stats::sampler::ChainDraws;
use log::warn;
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use thiserror::Error;

/// Column label of the residual environment.
pub const UNKNOWN: &str = "Unknown";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollateError {
    #[error("Got {results} chain results for {ids} ids")]
    LengthMismatch { results: usize, ids: usize },

    #[error("Chain result for '{id}' has {found} environments, expected {expected}")]
    EnvironmentMismatch {
        id: String,
        expected: usize,
        found: usize,
    },

    #[error("Held-out index {index} out of range for {n_cols} columns")]
    HeldOutOutOfRange { index: usize, n_cols: usize },

    #[error("Assignment ({env}, {feature}) outside a {n_envs}x{n_features} feature table")]
    AssignmentOutOfRange {
        env: usize,
        feature: usize,
        n_envs: usize,
        n_features: usize,
    },
}

/// A matrix with row and column labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledMatrix<T> {
    pub row_ids: Vec<String>,
    pub col_ids: Vec<String>,
    pub values: Array2<T>,
}

impl<T> LabeledMatrix<T> {
    pub fn get(&self, row_id: &str, col_id: &str) -> Option<&T> {
        let r = self.row_ids.iter().position(|id| id == row_id)?;
        let c = self.col_ids.iter().position(|id| id == col_id)?;
        self.values.get([r, c])
    }
}

/// Counts of each feature (columns) attributed to each environment (rows)
/// for one sink, summed over all draws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub table: LabeledMatrix<u64>,
    pub n_draws: usize,
}

impl FeatureTable {
    /// Average count per draw.
    pub fn per_draw_average(&self) -> Array2<f64> {
        if self.n_draws == 0 {
            return Array2::zeros(self.table.values.dim());
        }
        self.table.values.mapv(|c| c as f64 / self.n_draws as f64)
    }
}

/// Mean and standard deviation of each environment's share of each sink.
/// Rows are sinks, columns are sources followed by [`UNKNOWN`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixingProportions {
    pub means: LabeledMatrix<f64>,
    pub stds: LabeledMatrix<f64>,
}

/// Everything a run produces.
#[derive(Debug, Clone, PartialEq)]
pub struct GibbsResults {
    pub proportions: MixingProportions,
    /// One table per sink, in sink order, when requested.
    pub feature_tables: Option<Vec<FeatureTable>>,
}

fn with_unknown(source_ids: &[String]) -> Vec<String> {
    source_ids
        .iter()
        .cloned()
        .chain(std::iter::once(UNKNOWN.to_string()))
        .collect()
}

/// Mean share and population standard deviation of each environment across
/// the draws of one sink. A sink without sequences gets all zeros.
pub fn proportion_stats(draws: &ChainDraws) -> (Array1<f64>, Array1<f64>) {
    let n_envs = draws.n_envs();
    let total = draws.env_counts.sum();
    if total == 0 || draws.n_draws() == 0 {
        warn!("No sequences were assigned in any draw; reporting zero proportions");
        return (Array1::zeros(n_envs), Array1::zeros(n_envs));
    }

    let means = draws
        .env_counts
        .sum_axis(Axis(0))
        .mapv(|c| c as f64 / total as f64);

    let per_draw_totals = draws.env_counts.sum_axis(Axis(1));
    let fractions = Array2::from_shape_fn(draws.env_counts.dim(), |(d, v)| {
        let draw_total = per_draw_totals[d];
        if draw_total == 0 {
            0.0
        } else {
            draws.env_counts[[d, v]] as f64 / draw_total as f64
        }
    });
    let stds = fractions
        .axis_iter(Axis(1))
        .map(|column| column.iter().population_std_dev())
        .collect::<Array1<f64>>();

    (means, stds)
}

/// Mixing proportions of every sink against the same set of sources.
///
/// `all_draws[i]` must belong to `sink_ids[i]`.
pub fn cumulative_proportions(
    all_draws: &[ChainDraws],
    sink_ids: &[String],
    source_ids: &[String],
) -> Result<MixingProportions, CollateError> {
    let raw = stack_proportions(all_draws, sink_ids, source_ids.len() + 1)?;
    let col_ids = with_unknown(source_ids);
    Ok(MixingProportions {
        means: LabeledMatrix {
            row_ids: sink_ids.to_vec(),
            col_ids: col_ids.clone(),
            values: raw.0,
        },
        stds: LabeledMatrix {
            row_ids: sink_ids.to_vec(),
            col_ids,
            values: raw.1,
        },
    })
}

fn stack_proportions(
    all_draws: &[ChainDraws],
    ids: &[String],
    n_envs: usize,
) -> Result<(Array2<f64>, Array2<f64>), CollateError> {
    if all_draws.len() != ids.len() {
        return Err(CollateError::LengthMismatch {
            results: all_draws.len(),
            ids: ids.len(),
        });
    }

    let mut means = Array2::<f64>::zeros((ids.len(), n_envs));
    let mut stds = Array2::<f64>::zeros((ids.len(), n_envs));
    for (i, (draws, id)) in all_draws.iter().zip(ids).enumerate() {
        if draws.n_envs() != n_envs {
            return Err(CollateError::EnvironmentMismatch {
                id: id.clone(),
                expected: n_envs,
                found: draws.n_envs(),
            });
        }
        let (mean, std) = proportion_stats(draws);
        means.row_mut(i).assign(&mean);
        stds.row_mut(i).assign(&std);
    }
    Ok((means, stds))
}

/// Inserts a zero into every row at that row's excluded column.
///
/// Row `i` of the result equals row `i` of `matrix` with a zero placed at
/// `excluded[i]`; values at and after that column move one column right.
pub fn expand_held_out<T: Copy + Default>(
    matrix: ArrayView2<T>,
    excluded: &[usize],
) -> Result<Array2<T>, CollateError> {
    let (n_rows, n_cols) = matrix.dim();
    if excluded.len() != n_rows {
        return Err(CollateError::LengthMismatch {
            results: n_rows,
            ids: excluded.len(),
        });
    }

    let mut expanded = Array2::<T>::default((n_rows, n_cols + 1));
    for (i, row) in matrix.outer_iter().enumerate() {
        let skip = excluded[i];
        if skip > n_cols {
            return Err(CollateError::HeldOutOutOfRange {
                index: skip,
                n_cols: n_cols + 1,
            });
        }
        for (j, &value) in row.iter().enumerate() {
            let target = if j < skip { j } else { j + 1 };
            expanded[[i, target]] = value;
        }
    }
    Ok(expanded)
}

/// Inserts an all-zero row at `index`.
pub fn insert_zero_row(matrix: ArrayView2<u64>, index: usize) -> Result<Array2<u64>, CollateError> {
    let n_rows = matrix.nrows();
    if index > n_rows {
        return Err(CollateError::HeldOutOutOfRange {
            index,
            n_cols: n_rows + 1,
        });
    }
    let mut expanded = Array2::<u64>::zeros((n_rows + 1, matrix.ncols()));
    expanded
        .slice_mut(s![..index, ..])
        .assign(&matrix.slice(s![..index, ..]));
    expanded
        .slice_mut(s![index + 1.., ..])
        .assign(&matrix.slice(s![index.., ..]));
    Ok(expanded)
}

/// Two-dimensional histogram of (environment, feature) pairs over all draws
/// of one sink.
pub fn single_sink_feature_table(
    draws: &ChainDraws,
    source_ids: &[String],
    feature_ids: &[String],
) -> Result<FeatureTable, CollateError> {
    let n_envs = source_ids.len() + 1;
    let n_features = feature_ids.len();
    let mut data = Array2::<u64>::zeros((n_envs, n_features));

    for (&env, &feature) in draws
        .env_assignments
        .iter()
        .zip(draws.feature_assignments.iter())
    {
        if env >= n_envs || feature >= n_features {
            return Err(CollateError::AssignmentOutOfRange {
                env,
                feature,
                n_envs,
                n_features,
            });
        }
        data[[env, feature]] += 1;
    }

    Ok(FeatureTable {
        table: LabeledMatrix {
            row_ids: with_unknown(source_ids),
            col_ids: feature_ids.to_vec(),
            values: data,
        },
        n_draws: draws.n_draws(),
    })
}

/// Collates the chain output of every sink.
///
/// In standard mode `all_draws[i]` belongs to `sink_ids[i]`. In leave-one-out
/// mode `sink_ids` is ignored: `all_draws[i]` is the run in which
/// `source_ids[i]` was held out and classified against the other sources,
/// and its proportions are re-expanded so the held-out source contributes
/// exactly zero to itself.
pub fn collate_gibbs_results(
    all_draws: &[ChainDraws],
    sink_ids: &[String],
    source_ids: &[String],
    feature_ids: &[String],
    create_feature_tables: bool,
    loo: bool,
) -> Result<GibbsResults, CollateError> {
    if !loo {
        let proportions = cumulative_proportions(all_draws, sink_ids, source_ids)?;
        let feature_tables = if create_feature_tables {
            Some(
                all_draws
                    .iter()
                    .map(|draws| single_sink_feature_table(draws, source_ids, feature_ids))
                    .collect::<Result<Vec<_>, _>>()?,
            )
        } else {
            None
        };
        return Ok(GibbsResults {
            proportions,
            feature_tables,
        });
    }

    let n_sources = source_ids.len();
    let (square_means, square_stds) = stack_proportions(all_draws, source_ids, n_sources)?;
    let diagonal: Vec<usize> = (0..n_sources).collect();
    let col_ids = with_unknown(source_ids);
    let proportions = MixingProportions {
        means: LabeledMatrix {
            row_ids: source_ids.to_vec(),
            col_ids: col_ids.clone(),
            values: expand_held_out(square_means.view(), &diagonal)?,
        },
        stds: LabeledMatrix {
            row_ids: source_ids.to_vec(),
            col_ids: col_ids.clone(),
            values: expand_held_out(square_stds.view(), &diagonal)?,
        },
    };

    let feature_tables = if create_feature_tables {
        let mut tables = Vec::with_capacity(n_sources);
        for (i, draws) in all_draws.iter().enumerate() {
            let remaining: Vec<String> = source_ids
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, id)| id.clone())
                .collect();
            let reduced = single_sink_feature_table(draws, &remaining, feature_ids)?;
            tables.push(FeatureTable {
                table: LabeledMatrix {
                    row_ids: col_ids.clone(),
                    col_ids: feature_ids.to_vec(),
                    values: insert_zero_row(reduced.table.values.view(), i)?,
                },
                n_draws: reduced.n_draws,
            });
        }
        Some(tables)
    } else {
        None
    };

    Ok(GibbsResults {
        proportions,
        feature_tables,
    })
}
