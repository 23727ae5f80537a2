//! Weighted-coin outcome sampling.
//!
//! `OutcomeSampler` is the seam between trial logic and randomness. The
//! production sampler draws from the thread RNG and is not reproducible;
//! `SeededSampler` and `ScriptedSampler` give deterministic outcomes.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::errors::ExperimentError;

/// Draws a biased boolean for a reward probability.
pub trait OutcomeSampler: Send {
    /// Returns `true` with exactly `probability`.
    fn sample(&mut self, probability: f64) -> Result<bool, ExperimentError>;
}

fn check_probability(probability: f64) -> Result<(), ExperimentError> {
    if (0.0..=1.0).contains(&probability) {
        Ok(())
    } else {
        Err(ExperimentError::InvalidArgument(format!(
            "probability {} outside [0, 1]",
            probability
        )))
    }
}

/// Unseeded sampler over the thread-local RNG.
#[derive(Debug, Default)]
pub struct ThreadSampler;

impl OutcomeSampler for ThreadSampler {
    fn sample(&mut self, probability: f64) -> Result<bool, ExperimentError> {
        check_probability(probability)?;
        // gen::<f64>() is uniform on [0, 1), so p = 1 always succeeds and p = 0 never does.
        Ok(rand::thread_rng().r#gen::<f64>() < probability)
    }
}

/// Reproducible sampler for tests and `--seed` runs.
#[derive(Debug)]
pub struct SeededSampler {
    rng: StdRng,
}

impl SeededSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl OutcomeSampler for SeededSampler {
    fn sample(&mut self, probability: f64) -> Result<bool, ExperimentError> {
        check_probability(probability)?;
        Ok(self.rng.r#gen::<f64>() < probability)
    }
}

/// Replays a fixed queue of outcomes, then falls back to a constant.
#[derive(Debug, Default)]
pub struct ScriptedSampler {
    queue: VecDeque<bool>,
    fallback: bool,
    draws: usize,
}

impl ScriptedSampler {
    pub fn new(outcomes: impl IntoIterator<Item = bool>) -> Self {
        Self {
            queue: outcomes.into_iter().collect(),
            fallback: false,
            draws: 0,
        }
    }

    /// A sampler that always returns `outcome`.
    pub fn always(outcome: bool) -> Self {
        Self {
            queue: VecDeque::new(),
            fallback: outcome,
            draws: 0,
        }
    }

    /// Number of outcomes drawn so far.
    pub fn draws(&self) -> usize {
        self.draws
    }
}

impl OutcomeSampler for ScriptedSampler {
    fn sample(&mut self, probability: f64) -> Result<bool, ExperimentError> {
        check_probability(probability)?;
        self.draws += 1;
        Ok(self.queue.pop_front().unwrap_or(self.fallback))
    }
}
