use std::f64::consts::PI;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

use super::types::{MonteCarloResult, MonteCarloYear, PercentileValue};

pub const DEFAULT_SIMULATIONS: u32 = 1_000;
pub const MAX_SIMULATIONS: u32 = 100_000;
pub const MAX_YEARS: u32 = 100;
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonteCarloConfig {
    pub initial_value: f64,
    pub annual_contribution: f64,
    /// Arithmetic mean annual return.
    pub expected_return: f64,
    pub volatility: f64,
    pub years: u32,
    pub simulations: u32,
    pub percentiles: Vec<f64>,
    pub seed: u64,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            initial_value: 0.0,
            annual_contribution: 0.0,
            expected_return: 0.05,
            volatility: 0.15,
            years: 30,
            simulations: DEFAULT_SIMULATIONS,
            percentiles: vec![10.0, 25.0, 50.0, 75.0, 90.0],
            seed: DEFAULT_SEED,
        }
    }
}

impl MonteCarloConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.simulations == 0 || self.simulations > MAX_SIMULATIONS {
            return Err(EngineError::InvalidInput(format!(
                "simulations must be between 1 and {MAX_SIMULATIONS}"
            )));
        }
        if self.years > MAX_YEARS {
            return Err(EngineError::InvalidInput(format!(
                "years must be {MAX_YEARS} or fewer"
            )));
        }
        if !self.initial_value.is_finite() || !self.annual_contribution.is_finite() {
            return Err(EngineError::InvalidInput(
                "initial value and contribution must be finite".to_string(),
            ));
        }
        if !self.expected_return.is_finite() || self.expected_return <= -1.0 {
            return Err(EngineError::InvalidInput(
                "expected return must be finite and above -100%".to_string(),
            ));
        }
        if !self.volatility.is_finite() || self.volatility < 0.0 {
            return Err(EngineError::InvalidInput(
                "volatility must be finite and non-negative".to_string(),
            ));
        }
        if let Some(p) = self
            .percentiles
            .iter()
            .find(|p| !p.is_finite() || **p < 0.0 || **p > 100.0)
        {
            return Err(EngineError::InvalidInput(format!(
                "percentile {p} must be between 0 and 100"
            )));
        }
        Ok(())
    }

    fn log_normal_params(&self) -> (f64, f64) {
        let sigma = self.volatility.max(0.0);
        let mu = (1.0 + self.expected_return).max(1e-9).ln() - sigma * sigma / 2.0;
        (mu, sigma)
    }
}

struct NormalSampler {
    rng: ChaCha8Rng,
    cached_normal: Option<f64>,
}

impl NormalSampler {
    fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            cached_normal: None,
        }
    }

    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.rng.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        self.cached_normal = Some(r * theta.sin());
        r * theta.cos()
    }
}

fn simulate_paths(config: &MonteCarloConfig) -> Vec<Vec<f64>> {
    let paths = config.simulations as usize;
    let (mu, sigma) = config.log_normal_params();
    let start = config.initial_value.max(0.0);

    let mut by_year = vec![vec![0.0; paths]; config.years as usize + 1];
    let mut sampler = NormalSampler::new(config.seed);

    for path in 0..paths {
        let mut value = start;
        by_year[0][path] = value;
        for year in 1..=config.years as usize {
            let annual_return = (mu + sigma * sampler.standard_normal()).exp() - 1.0;
            value = (value * (1.0 + annual_return) + config.annual_contribution).max(0.0);
            by_year[year][path] = value;
        }
    }
    by_year
}

/// Value at `floor(p / 100 * n)` of an ascending slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((p / 100.0) * sorted.len() as f64).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

pub fn run_monte_carlo(config: &MonteCarloConfig) -> MonteCarloResult {
    if config.simulations == 0 {
        return MonteCarloResult::default();
    }

    let years = simulate_paths(config)
        .into_iter()
        .enumerate()
        .map(|(year, mut values)| {
            values.sort_by(|a, b| a.total_cmp(b));
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            MonteCarloYear {
                year: year as u32,
                percentiles: config
                    .percentiles
                    .iter()
                    .map(|&p| PercentileValue {
                        percentile: p,
                        value: percentile(&values, p),
                    })
                    .collect(),
                mean,
            }
        })
        .collect::<Vec<_>>();

    tracing::debug!(
        simulations = config.simulations,
        years = config.years,
        seed = config.seed,
        "monte carlo run complete"
    );
    MonteCarloResult {
        simulations: config.simulations,
        years,
    }
}

/// Share of paths at or above `target` in `at_year` (the final year when
/// `None`; later years are clamped to the horizon).
pub fn compute_success_probability(
    config: &MonteCarloConfig,
    target: f64,
    at_year: Option<u32>,
) -> f64 {
    if config.simulations == 0 {
        return 0.0;
    }
    let year = at_year.unwrap_or(config.years).min(config.years) as usize;
    let by_year = simulate_paths(config);
    let values = &by_year[year];
    let hits = values.iter().filter(|v| **v >= target).count();
    hits as f64 / values.len() as f64
}
