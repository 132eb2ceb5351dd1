//! Run configuration for the Gibbs sampler.

use crate::stats::sampler::ChainSchedule;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be finite and greater than 0, got {value}")]
    NonPositivePrior { name: &'static str, value: f64 },

    #[error("restarts must be at least 1")]
    ZeroRestarts,

    #[error("draws_per_restart must be at least 1")]
    ZeroDrawsPerRestart,

    #[error("delay must be at least 1, otherwise no draw is ever recorded after burn-in")]
    ZeroDelay,

    #[error("jobs must be at least 1")]
    ZeroJobs,
}

/// Hyperparameters and run options for a source tracking run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GibbsConfig {
    /// Prior counts of each feature in the known source environments.
    pub alpha1: f64,
    /// Prior counts of each feature in the Unknown environment, as a
    /// fraction of the sink total.
    pub alpha2: f64,
    /// Pseudo-count added to every environment's sink-side count.
    pub beta: f64,
    /// Number of independent Markov chains per sink.
    pub restarts: usize,
    pub draws_per_restart: usize,
    /// Passes discarded before the first draw.
    pub burnin: usize,
    /// Passes between consecutive draws.
    pub delay: usize,
    /// Build one feature attribution table per sink.
    pub create_feature_tables: bool,
    /// Worker count; 1 runs every sink on the calling thread.
    pub jobs: usize,
    /// Base seed for the per-task generators. Drawn at random when absent.
    pub seed: Option<u64>,
    /// Accepted for command-line compatibility; has no effect on sampling.
    pub sample_with_replacement: bool,
}

impl Default for GibbsConfig {
    fn default() -> Self {
        GibbsConfig {
            alpha1: 0.001,
            alpha2: 0.1,
            beta: 10.0,
            restarts: 10,
            draws_per_restart: 1,
            burnin: 100,
            delay: 1,
            create_feature_tables: false,
            jobs: 1,
            seed: None,
            sample_with_replacement: false,
        }
    }
}

impl GibbsConfig {
    /// Validates every hyperparameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_prior("alpha1", self.alpha1)?;
        check_prior("alpha2", self.alpha2)?;
        check_prior("beta", self.beta)?;
        if self.jobs == 0 {
            return Err(ConfigError::ZeroJobs);
        }
        self.schedule().map(|_| ())
    }

    /// The pass/draw schedule each chain follows.
    pub fn schedule(&self) -> Result<ChainSchedule, ConfigError> {
        ChainSchedule::new(
            self.restarts,
            self.draws_per_restart,
            self.burnin,
            self.delay,
        )
    }
}

/// Rejects priors that are zero, negative, NaN or infinite.
pub fn check_prior(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositivePrior { name, value })
    }
}
