//! Collapsed Gibbs sampler for a single sink.
//!
//! Every sequence in the sink is given an environment at random and then
//! repeatedly withdrawn and reassigned according to
//! [`ConditionalProbability::probability_slice`]. After burn-in the chain
//! state is recorded every `delay` passes.

use crate::config::ConfigError;
use crate::stats::conditional::{ConditionalProbability, ModelError};
use log::{debug, warn};
use ndarray::{Array2, ArrayView1};
use rand::seq::SliceRandom;
use rand::Rng;

/// How many chains to grow and when to record their state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSchedule {
    restarts: usize,
    draws_per_restart: usize,
    burnin: usize,
    delay: usize,
}

impl ChainSchedule {
    pub fn new(
        restarts: usize,
        draws_per_restart: usize,
        burnin: usize,
        delay: usize,
    ) -> Result<Self, ConfigError> {
        if restarts == 0 {
            return Err(ConfigError::ZeroRestarts);
        }
        if draws_per_restart == 0 {
            return Err(ConfigError::ZeroDrawsPerRestart);
        }
        if delay == 0 {
            return Err(ConfigError::ZeroDelay);
        }
        Ok(ChainSchedule {
            restarts,
            draws_per_restart,
            burnin,
            delay,
        })
    }

    pub fn restarts(&self) -> usize {
        self.restarts
    }

    pub fn burnin(&self) -> usize {
        self.burnin
    }

    pub fn delay(&self) -> usize {
        self.delay
    }

    /// Passes made by each chain.
    pub fn total_passes(&self) -> usize {
        self.burnin + (self.draws_per_restart - 1) * self.delay + 1
    }

    /// Whether the state after pass `rep` (1-based) is recorded.
    ///
    /// Draws are taken when `(rep - burnin) mod delay == 1`. With `delay == 1`
    /// that congruence degenerates, and only the first pass after burn-in is
    /// recorded.
    pub fn is_checkpoint(&self, rep: usize) -> bool {
        if rep <= self.burnin {
            return false;
        }
        let since_burnin = rep - self.burnin;
        if self.delay == 1 {
            since_burnin == 1
        } else {
            since_burnin % self.delay == 1
        }
    }

    /// Draws actually recorded by each chain.
    pub fn draws_per_restart(&self) -> usize {
        if self.delay == 1 {
            1
        } else {
            self.draws_per_restart
        }
    }

    /// Draws recorded across all restarts.
    pub fn total_draws(&self) -> usize {
        self.restarts * self.draws_per_restart()
    }
}

/// Mutable state of one running chain.
#[derive(Debug, Clone)]
pub struct ChainState {
    /// Current environment of each sequence.
    env_assignments: Vec<usize>,
    /// Feature of each sequence; fixed for the chain's lifetime.
    feature_ids: Vec<usize>,
    env_counts: Vec<u64>,
    /// Sequences of each feature currently assigned to Unknown.
    unknown_counts: Vec<u64>,
    unknown_sum: u64,
    unknown_index: usize,
}

impl ChainState {
    /// Expands `sink` into one entry per sequence: feature `ξ` repeated
    /// `sink[ξ]` times.
    pub fn new(sink: ArrayView1<u64>, n_envs: usize) -> Self {
        let total = sink.sum() as usize;
        let mut feature_ids = Vec::with_capacity(total);
        for (xi, &count) in sink.iter().enumerate() {
            feature_ids.extend(std::iter::repeat(xi).take(count as usize));
        }
        ChainState {
            env_assignments: vec![0; total],
            feature_ids,
            env_counts: vec![0; n_envs],
            unknown_counts: vec![0; sink.len()],
            unknown_sum: 0,
            unknown_index: n_envs - 1,
        }
    }

    pub fn n_sequences(&self) -> usize {
        self.feature_ids.len()
    }

    pub fn env_counts(&self) -> &[u64] {
        &self.env_counts
    }

    pub fn env_assignments(&self) -> &[usize] {
        &self.env_assignments
    }

    pub fn feature_ids(&self) -> &[usize] {
        &self.feature_ids
    }

    pub fn unknown_sum(&self) -> u64 {
        self.unknown_sum
    }

    /// Starts a fresh chain: every sequence gets a uniformly random
    /// environment and all counts are rebuilt from that assignment.
    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let n_envs = self.env_counts.len();
        self.env_counts.fill(0);
        self.unknown_counts.fill(0);
        self.unknown_sum = 0;
        for seq in 0..self.feature_ids.len() {
            let env = rng.random_range(0..n_envs);
            self.env_assignments[seq] = env;
            self.insert(seq, env);
        }
    }

    /// Withdraws sequence `seq` from its environment and returns its feature.
    fn remove(&mut self, seq: usize) -> usize {
        let env = self.env_assignments[seq];
        let feature = self.feature_ids[seq];
        self.env_counts[env] -= 1;
        if env == self.unknown_index {
            self.unknown_counts[feature] -= 1;
            self.unknown_sum -= 1;
        }
        feature
    }

    fn insert(&mut self, seq: usize, env: usize) {
        self.env_assignments[seq] = env;
        self.env_counts[env] += 1;
        if env == self.unknown_index {
            self.unknown_counts[self.feature_ids[seq]] += 1;
            self.unknown_sum += 1;
        }
    }

    /// Remove, resample and reinsert sequence `seq`. `weights` is scratch
    /// space of one slot per environment.
    fn resample<R: Rng + ?Sized>(
        &mut self,
        seq: usize,
        model: &ConditionalProbability,
        weights: &mut [f64],
        rng: &mut R,
    ) -> Result<(), ModelError> {
        let feature = self.remove(seq);
        model.probability_slice(
            feature,
            self.unknown_counts[feature],
            self.unknown_sum,
            &self.env_counts,
            weights,
        )?;
        let env = sample_index(weights, rng);
        self.insert(seq, env);
        Ok(())
    }
}

/// One recorded state of a chain.
#[derive(Debug, Clone, Copy)]
pub struct Draw<'a> {
    /// Sequences per environment.
    pub env_counts: ArrayView1<'a, u64>,
    /// Environment of each sequence.
    pub env_assignments: ArrayView1<'a, usize>,
    /// Feature of each sequence, aligned with `env_assignments`.
    pub feature_assignments: ArrayView1<'a, usize>,
}

/// All draws of every restart for one sink, as three row-aligned arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainDraws {
    /// draws x environments
    pub env_counts: Array2<u64>,
    /// draws x sequences
    pub env_assignments: Array2<usize>,
    /// draws x sequences
    pub feature_assignments: Array2<usize>,
}

impl ChainDraws {
    fn with_capacity(n_draws: usize, n_envs: usize, n_sequences: usize) -> Self {
        ChainDraws {
            env_counts: Array2::zeros((n_draws, n_envs)),
            env_assignments: Array2::zeros((n_draws, n_sequences)),
            feature_assignments: Array2::zeros((n_draws, n_sequences)),
        }
    }

    pub fn n_draws(&self) -> usize {
        self.env_counts.nrows()
    }

    pub fn n_envs(&self) -> usize {
        self.env_counts.ncols()
    }

    pub fn n_sequences(&self) -> usize {
        self.env_assignments.ncols()
    }

    pub fn draw(&self, index: usize) -> Draw<'_> {
        Draw {
            env_counts: self.env_counts.row(index),
            env_assignments: self.env_assignments.row(index),
            feature_assignments: self.feature_assignments.row(index),
        }
    }

    pub fn draws(&self) -> impl Iterator<Item = Draw<'_>> {
        (0..self.n_draws()).map(move |i| self.draw(i))
    }

    fn record(&mut self, index: usize, state: &ChainState) {
        for (slot, &count) in self
            .env_counts
            .row_mut(index)
            .iter_mut()
            .zip(state.env_counts())
        {
            *slot = count;
        }
        for ((env_slot, feature_slot), (&env, &feature)) in self
            .env_assignments
            .row_mut(index)
            .iter_mut()
            .zip(self.feature_assignments.row_mut(index).iter_mut())
            .zip(state.env_assignments().iter().zip(state.feature_ids()))
        {
            *env_slot = env;
            *feature_slot = feature;
        }
    }
}

/// Picks an index with probability proportional to `weights`.
fn sample_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> usize {
    let total: f64 = weights.iter().sum();
    let mut target = rng.random::<f64>() * total;
    for (i, &w) in weights.iter().enumerate() {
        if target < w {
            return i;
        }
        target -= w;
    }
    // rounding can leave `target` marginally above the last weight
    weights.len() - 1
}

/// Runs `schedule.restarts()` independent chains for `sink` and returns every
/// recorded draw.
///
/// The model's sink total is set and precalculated here, so the same model
/// can be reused across sinks by one task.
pub fn gibbs_sampler<R: Rng + ?Sized>(
    sink: ArrayView1<u64>,
    model: &mut ConditionalProbability,
    schedule: &ChainSchedule,
    rng: &mut R,
) -> Result<ChainDraws, ModelError> {
    if sink.len() != model.n_features() {
        return Err(ModelError::DimensionMismatch {
            what: "sink features",
            expected: model.n_features(),
            found: sink.len(),
        });
    }

    let n_envs = model.n_envs();
    let mut state = ChainState::new(sink, n_envs);
    let n_sequences = state.n_sequences();
    model.set_sink_total(n_sequences as u64);
    model.precalculate()?;

    if n_sequences == 0 {
        warn!("Sink has no sequences; every draw will be empty");
    }

    let total_passes = schedule.total_passes();
    let mut draws = ChainDraws::with_capacity(schedule.total_draws(), n_envs, n_sequences);
    let mut order: Vec<usize> = (0..n_sequences).collect();
    let mut weights = vec![0.0; n_envs];
    let mut draw_count = 0;

    for restart in 0..schedule.restarts() {
        debug!(
            "Restart {}/{}: {} sequences, {} passes",
            restart + 1,
            schedule.restarts(),
            n_sequences,
            total_passes
        );
        state.randomize(rng);

        for rep in 1..=total_passes {
            order.shuffle(rng);
            for &seq in &order {
                state.resample(seq, model, &mut weights, rng)?;
            }

            if schedule.is_checkpoint(rep) {
                draws.record(draw_count, &state);
                draw_count += 1;
            }
        }
    }

    Ok(draws)
}
