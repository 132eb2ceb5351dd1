//! Bayesian source tracking.
//!
//! [`conditional`] holds the probability model, [`sampler`] runs the Gibbs
//! chains for one sink and [`collate`] turns raw draws into mixing
//! proportions and feature tables.

pub mod collate;
pub mod conditional;
pub mod sampler;

pub use collate::{
    collate_gibbs_results, CollateError, FeatureTable, GibbsResults, LabeledMatrix,
    MixingProportions, UNKNOWN,
};
pub use conditional::{ConditionalProbability, ModelError};
pub use sampler::{gibbs_sampler, ChainDraws, ChainSchedule, Draw};

use crate::config::ConfigError;
use crate::count_table::InputError;
use crate::utils::parallel::ParallelError;
use thiserror::Error;

/// Any failure of a source tracking run.
#[derive(Error, Debug)]
pub enum GibbsError {
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Collation error: {0}")]
    Collate(#[from] CollateError),

    #[error("Worker pool error: {0}")]
    Parallel(#[from] ParallelError),

    /// A sampling task failed; the whole run is abandoned.
    #[error("Gibbs sampling failed for '{sink}'")]
    Task {
        sink: String,
        #[source]
        source: ModelError,
    },
}
