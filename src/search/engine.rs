//! Simulated annealing engine
//!
//! Runs one search to completion: a linear cooling schedule, a fixed number
//! of mutation attempts per round, and Metropolis acceptance for
//! non-improving candidates. Deterministic for a fixed seed and
//! deterministic callbacks.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::search::{CancelToken, Objective};

// ─────────────────────────────────────────────────────────────────
// Schedule & Report
// ─────────────────────────────────────────────────────────────────

/// Annealing parameters for one search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnealingSchedule {
    /// Starting temperature; the loop runs while the temperature is >= 0
    pub initial_temperature: f64,

    /// Amount subtracted from the temperature after each round
    pub cooling_rate: f64,

    /// Mutation attempts per round
    pub num_mutations: u32,
}

/// Outcome of one completed search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReport {
    /// Best key recorded during the run
    pub best_key: Value,

    /// Fitness of the best key; `None` if no evaluation ever ran
    pub best_fitness: Option<f64>,

    /// Annealing rounds completed
    pub rounds: u64,

    /// Fitness evaluations performed
    pub evaluations: u64,
}

// ─────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────

/// Simulated annealing search engine.
///
/// One instance runs one task's search and owns that search's state
/// exclusively; nothing here is shared between workers.
pub struct SearchEngine {
    schedule: AnnealingSchedule,
    rng: StdRng,
}

impl SearchEngine {
    /// Create an engine seeded from the OS
    pub fn new(schedule: AnnealingSchedule) -> Self {
        Self {
            schedule,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Create an engine with a fixed seed (reproducible runs)
    pub fn with_seed(schedule: AnnealingSchedule, seed: u64) -> Self {
        Self {
            schedule,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Run the search from `initial_key` to completion.
    ///
    /// The temperature trajectory is `T, T - c, T - 2c, ...`, stopping at
    /// the first value below zero. A negative initial temperature therefore
    /// runs zero rounds and reports no fitness; callers treat that as an
    /// empty result. Cancellation is checked once per round boundary.
    pub fn run(
        &mut self,
        initial_key: Value,
        objective: &dyn Objective,
        cancel: &CancelToken,
    ) -> Result<SearchReport> {
        let mut temperature = self.schedule.initial_temperature;
        let mut current_key = initial_key.clone();
        let mut current_fitness: Option<f64> = None;
        let mut best_key = initial_key;
        let mut best_fitness: Option<f64> = None;
        let mut rounds: u64 = 0;
        let mut evaluations: u64 = 0;

        while temperature >= 0.0 {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let round_start = Instant::now();

            for _ in 0..self.schedule.num_mutations {
                let candidate_key = objective.mutate(&current_key)?;
                let candidate_fitness = objective.fitness(&candidate_key)?;
                evaluations += 1;

                let Some(fitness) = current_fitness else {
                    // First evaluation seeds both current and best.
                    current_fitness = Some(candidate_fitness);
                    best_fitness = Some(candidate_fitness);
                    current_key = candidate_key.clone();
                    best_key = candidate_key;
                    continue;
                };

                let delta = candidate_fitness - fitness;
                if delta > 0.0 {
                    // Strict improvement over the current state is recorded
                    // as the new best. Later accepted-but-worse moves leave
                    // the best untouched.
                    best_fitness = Some(candidate_fitness);
                    best_key = candidate_key.clone();
                    current_fitness = Some(candidate_fitness);
                    current_key = candidate_key;
                } else if temperature > 0.0 {
                    // Metropolis criterion. At temperature zero a
                    // non-improving candidate is never accepted, which also
                    // keeps the exponent finite.
                    let probability = (delta / temperature).exp();
                    if probability > self.rng.random::<f64>() {
                        current_fitness = Some(candidate_fitness);
                        current_key = candidate_key;
                    }
                }
            }

            let elapsed = round_start.elapsed().as_secs_f64();
            let keys_per_sec = if elapsed > 0.0 {
                f64::from(self.schedule.num_mutations) / elapsed
            } else {
                f64::INFINITY
            };
            debug!(
                temperature,
                cooling_rate = self.schedule.cooling_rate,
                fitness = ?current_fitness,
                key = %current_key,
                keys_per_sec,
                "Annealing round complete"
            );

            rounds += 1;
            temperature -= self.schedule.cooling_rate;
        }

        Ok(SearchReport {
            best_key,
            best_fitness,
            rounds,
            evaluations,
        })
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
