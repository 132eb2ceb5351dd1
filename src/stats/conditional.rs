//! Conditional probability of a sink sequence's environment.
//!
//! The model follows Knights et al., "Bayesian community-wide
//! culture-independent microbial source tracking" (Nature Methods, 2011).
//! For a sequence of feature `ξ` removed from the sink, the unnormalized
//! probability of environment `v` is
//!
//! ```text
//! known v:   (m_ξv + α1) / (m_v + τ·α1) · (n_v + β) / (n - 1 + β·V)
//! unknown:   (m_ξV + α2·n) / (m_V + α2·n·τ) · (n_V + β) / (n - 1 + β·V)
//! ```
//!
//! where `m` are source-side counts, `n_v` the sink sequences currently
//! assigned to `v`, `n` the sink total, `τ` the number of features and `V`
//! the number of environments (sources plus Unknown).
//!
//! Everything that does not change during a chain is computed once by
//! [`ConditionalProbability::precalculate`], which needs the sink total.

use crate::config::{check_prior, ConfigError};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid prior: {0}")]
    InvalidPrior(#[from] ConfigError),

    #[error("Sink total has not been set; call set_sink_total before precalculate")]
    SinkTotalUnset,

    #[error("Probability slice requested before precalculate")]
    NotPrecalculated,

    #[error("Model was precalculated for a sink total of {precalculated}, but the chain holds {found} sequences")]
    SinkTotalMismatch { precalculated: u64, found: u64 },

    #[error("Feature index {index} out of range for {n_features} features")]
    FeatureOutOfRange { index: usize, n_features: usize },

    #[error("Invalid dimensions: expected {expected} {what}, got {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Quantities fixed for the lifetime of one sink's chains.
#[derive(Debug, Clone)]
struct Precalculated {
    sink_total: u64,
    /// `p_tv / (n - 1 + β·V)`, laid out features x sources so the slice for
    /// one feature is contiguous.
    known_source_cp: Array2<f64>,
    denominator_p_v: f64,
    alpha2_n: f64,
    alpha2_n_tau: f64,
}

/// Per-environment sufficient statistics for a fixed set of sources.
///
/// Lifecycle: build with [`new`](Self::new), fix the sink size with
/// [`set_sink_total`](Self::set_sink_total), finalize with
/// [`precalculate`](Self::precalculate), then query with
/// [`probability_slice`](Self::probability_slice). Changing the sink total
/// discards the precalculated state.
#[derive(Debug, Clone)]
pub struct ConditionalProbability {
    alpha1: f64,
    alpha2: f64,
    beta: f64,
    /// Source counts, `m_ξv` (sources x features).
    m_xivs: Array2<f64>,
    /// Row sums of `m_xivs`, `m_v`.
    m_vs: Array1<f64>,
    n_envs: usize,
    n_features: usize,
    sink_total: Option<u64>,
    precalculated: Option<Precalculated>,
}

impl ConditionalProbability {
    pub fn new(
        alpha1: f64,
        alpha2: f64,
        beta: f64,
        source_data: ArrayView2<u64>,
    ) -> Result<Self, ModelError> {
        check_prior("alpha1", alpha1)?;
        check_prior("alpha2", alpha2)?;
        check_prior("beta", beta)?;

        let m_xivs = source_data.mapv(|c| c as f64);
        let m_vs = m_xivs.sum_axis(Axis(1));
        let (n_sources, n_features) = m_xivs.dim();

        Ok(ConditionalProbability {
            alpha1,
            alpha2,
            beta,
            m_xivs,
            m_vs,
            n_envs: n_sources + 1,
            n_features,
            sink_total: None,
            precalculated: None,
        })
    }

    /// Number of environments, including Unknown.
    pub fn n_envs(&self) -> usize {
        self.n_envs
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Index of the Unknown environment (always last).
    pub fn unknown_index(&self) -> usize {
        self.n_envs - 1
    }

    pub fn sink_total(&self) -> Option<u64> {
        self.sink_total
    }

    pub fn is_precalculated(&self) -> bool {
        self.precalculated.is_some()
    }

    /// Records the number of sequences in the sink.
    pub fn set_sink_total(&mut self, n: u64) {
        if self.sink_total != Some(n) {
            self.precalculated = None;
        }
        self.sink_total = Some(n);
    }

    /// Computes every quantity that is static for the current sink total.
    /// Calling it again for the same total is a no-op.
    pub fn precalculate(&mut self) -> Result<(), ModelError> {
        let n = self.sink_total.ok_or(ModelError::SinkTotalUnset)?;
        if self
            .precalculated
            .as_ref()
            .is_some_and(|p| p.sink_total == n)
        {
            return Ok(());
        }

        let tau = self.n_features as f64;
        let denominator_p_v = n as f64 - 1.0 + self.beta * self.n_envs as f64;

        let mut known_source_cp = Array2::<f64>::zeros((self.n_features, self.n_envs - 1));
        for (v, source) in self.m_xivs.outer_iter().enumerate() {
            let row_norm = self.m_vs[v] + tau * self.alpha1;
            for (xi, &m_xiv) in source.iter().enumerate() {
                known_source_cp[[xi, v]] = (m_xiv + self.alpha1) / row_norm / denominator_p_v;
            }
        }

        let alpha2_n = self.alpha2 * n as f64;
        self.precalculated = Some(Precalculated {
            sink_total: n,
            known_source_cp,
            denominator_p_v,
            alpha2_n,
            alpha2_n_tau: alpha2_n * tau,
        });
        Ok(())
    }

    /// Writes the unnormalized joint probability over environments for one
    /// removed sequence of feature `feature` into `out`.
    ///
    /// `env_counts` are the sink sequences per environment with the current
    /// sequence already removed, so they must sum to `n - 1`.
    /// `unknown_feature_count` and `unknown_total` are the sequences of this
    /// feature, and of all features, currently assigned to Unknown.
    pub fn probability_slice(
        &self,
        feature: usize,
        unknown_feature_count: u64,
        unknown_total: u64,
        env_counts: &[u64],
        out: &mut [f64],
    ) -> Result<(), ModelError> {
        let pre = self
            .precalculated
            .as_ref()
            .ok_or(ModelError::NotPrecalculated)?;
        if feature >= self.n_features {
            return Err(ModelError::FeatureOutOfRange {
                index: feature,
                n_features: self.n_features,
            });
        }
        if env_counts.len() != self.n_envs {
            return Err(ModelError::DimensionMismatch {
                what: "environment counts",
                expected: self.n_envs,
                found: env_counts.len(),
            });
        }
        if out.len() != self.n_envs {
            return Err(ModelError::DimensionMismatch {
                what: "output slots",
                expected: self.n_envs,
                found: out.len(),
            });
        }
        let held = env_counts.iter().sum::<u64>() + 1;
        if held != pre.sink_total {
            return Err(ModelError::SinkTotalMismatch {
                precalculated: pre.sink_total,
                found: held,
            });
        }

        let unknown = self.n_envs - 1;
        let known = pre.known_source_cp.row(feature);
        for ((slot, &cp), &count) in out[..unknown]
            .iter_mut()
            .zip(known.iter())
            .zip(env_counts[..unknown].iter())
        {
            *slot = cp * (count as f64 + self.beta);
        }
        out[unknown] = (unknown_feature_count as f64 + pre.alpha2_n)
            * (env_counts[unknown] as f64 + self.beta)
            / ((unknown_total as f64 + pre.alpha2_n_tau) * pre.denominator_p_v);
        Ok(())
    }
}
