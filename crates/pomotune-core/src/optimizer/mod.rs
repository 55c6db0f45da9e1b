//! Surrogate optimizer proposing the next parameters to try.
//!
//! The optimizer is stateless: every call to [`SurrogateOptimizer::propose`]
//! receives the full list of scored observations for one target and
//! rebuilds its surrogate from scratch.
//!
//! ## Sign convention
//!
//! Focus scores are maximized, while the surrogate and the acquisition
//! function work on costs to be minimized. Scores are negated exactly once,
//! on entry to [`SurrogateOptimizer::propose`], and the best observation is
//! negated back before it is reported. Nothing outside this module ever sees
//! a cost.
//!
//! ## Phases
//!
//! - Fewer than `n_initial_points` observations: the k-th point of a seeded
//!   Latin hypercube design is returned, no model is fitted.
//! - Afterwards: a Gaussian process is fitted to the costs and the candidate
//!   with the highest Expected Improvement is returned.

pub mod acquisition;
pub mod design;
pub mod gp;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, OptimizerError};
use crate::space::ParameterSpace;

use self::acquisition::expected_improvement;
use self::gp::GaussianProcess;

/// Share of acquisition candidates drawn around the best observation.
const LOCAL_CANDIDATE_SHARE: f64 = 0.2;
/// Standard deviation of local perturbations, in unit-cube coordinates.
const LOCAL_CANDIDATE_SPREAD: f64 = 0.05;

/// Configuration for the surrogate optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Observations answered from the initial design before the surrogate is used
    #[serde(default = "default_n_initial_points")]
    pub n_initial_points: usize,

    /// Random candidates scored by the acquisition function per proposal
    #[serde(default = "default_n_candidates")]
    pub n_candidates: usize,

    /// Exploration margin of Expected Improvement (standardized units)
    #[serde(default = "default_xi")]
    pub xi: f64,

    /// Observation noise variance (standardized units)
    #[serde(default = "default_noise")]
    pub noise: f64,

    /// Matern length scales tried when fitting, in unit-cube coordinates
    #[serde(default = "default_length_scales")]
    pub length_scales: Vec<f64>,

    /// Seed for the initial design and candidate sampling
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_n_initial_points() -> usize {
    10
}
fn default_n_candidates() -> usize {
    2000
}
fn default_xi() -> f64 {
    0.01
}
fn default_noise() -> f64 {
    1e-2
}
fn default_length_scales() -> Vec<f64> {
    vec![0.1, 0.2, 0.5, 1.0, 2.0]
}
fn default_seed() -> u64 {
    42
}

impl OptimizerConfig {
    /// Reject settings the surrogate cannot work with.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: format!("optimizer.{key}"),
            message: message.to_string(),
        };

        if self.n_initial_points == 0 {
            return Err(invalid("n_initial_points", "must be at least 1"));
        }
        if self.n_candidates == 0 {
            return Err(invalid("n_candidates", "must be at least 1"));
        }
        if !self.xi.is_finite() || self.xi < 0.0 {
            return Err(invalid("xi", "must be a finite number >= 0"));
        }
        if !self.noise.is_finite() || self.noise < 0.0 {
            return Err(invalid("noise", "must be a finite number >= 0"));
        }
        if self.length_scales.is_empty() {
            return Err(invalid("length_scales", "must list at least one length scale"));
        }
        if self.length_scales.iter().any(|l| !l.is_finite() || *l <= 0.0) {
            return Err(invalid("length_scales", "every length scale must be finite and > 0"));
        }
        Ok(())
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            n_initial_points: default_n_initial_points(),
            n_candidates: default_n_candidates(),
            xi: default_xi(),
            noise: default_noise(),
            length_scales: default_length_scales(),
            seed: default_seed(),
        }
    }
}

/// A scored trial, in focus-score orientation (higher is better).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub parameters: Vec<f64>,
    pub outcome: f64,
}

impl Observation {
    pub fn new(parameters: Vec<f64>, outcome: f64) -> Self {
        Self {
            parameters,
            outcome,
        }
    }
}

/// Best observation so far, reported as a focus score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestTrial {
    pub parameters: Vec<f64>,
    pub score: f64,
}

/// How a proposal was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposalSource {
    /// Point `index` of the space-filling initial design
    InitialDesign { index: usize },
    /// Maximizer of Expected Improvement under the fitted surrogate
    Surrogate {
        expected_improvement: f64,
        predicted_score: f64,
        predicted_std: f64,
        length_scale: f64,
    },
}

/// Next parameters to try.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub parameters: Vec<f64>,
    pub source: ProposalSource,
    pub best: Option<BestTrial>,
}

/// Stateless sequential model-based optimizer.
#[derive(Debug, Clone, Default)]
pub struct SurrogateOptimizer {
    config: OptimizerConfig,
}

impl SurrogateOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Propose the next parameter vector for `space` given every scored
    /// observation so far.
    ///
    /// # Errors
    ///
    /// [`OptimizerError::DimensionMismatch`] when an observation's arity does
    /// not match the space, [`OptimizerError::NonFiniteOutcome`] for NaN or
    /// infinite scores, [`OptimizerError::FitFailed`] when the surrogate
    /// cannot be fitted.
    pub fn propose(
        &self,
        space: &ParameterSpace,
        observations: &[Observation],
    ) -> Result<Proposal, OptimizerError> {
        for (index, obs) in observations.iter().enumerate() {
            space.check_arity(&obs.parameters)?;
            if !obs.outcome.is_finite() {
                return Err(OptimizerError::NonFiniteOutcome { index });
            }
        }

        // The only place scores become costs.
        let costs: Vec<f64> = observations.iter().map(|o| -o.outcome).collect();
        let best = best_trial(observations, &costs);

        let n_initial = self.config.n_initial_points.max(1);
        if observations.len() < n_initial {
            return Ok(self.initial_design(space, observations.len(), n_initial, best));
        }

        self.surrogate(space, observations, &costs, best)
    }

    fn initial_design(
        &self,
        space: &ParameterSpace,
        index: usize,
        n_initial: usize,
        best: Option<BestTrial>,
    ) -> Proposal {
        let design = design::latin_hypercube(n_initial, space.arity(), self.config.seed);
        let mut parameters = space.from_unit(&design[index]);
        space.snap(&mut parameters);

        tracing::debug!(target_name = %space.target(), index, "proposal from initial design");
        Proposal {
            parameters,
            source: ProposalSource::InitialDesign { index },
            best,
        }
    }

    fn surrogate(
        &self,
        space: &ParameterSpace,
        observations: &[Observation],
        costs: &[f64],
        best: Option<BestTrial>,
    ) -> Result<Proposal, OptimizerError> {
        let inputs: Vec<Vec<f64>> = observations
            .iter()
            .map(|o| space.to_unit(&o.parameters))
            .collect();
        let model = GaussianProcess::fit_best(
            &inputs,
            costs,
            &self.config.length_scales,
            self.config.noise,
        )?;

        let best_cost = costs.iter().copied().fold(f64::INFINITY, f64::min);
        let best_cost_std = model.standardize(best_cost);
        let anchor = best
            .as_ref()
            .map(|b| space.to_unit(&b.parameters))
            .unwrap_or_else(|| vec![0.5; space.arity()]);

        let mut rng = Pcg64::seed_from_u64(candidate_seed(self.config.seed, observations.len()));
        let n_candidates = self.config.n_candidates.max(1);
        let n_local = (n_candidates as f64 * LOCAL_CANDIDATE_SHARE) as usize;

        let mut chosen: Option<(f64, Vec<f64>, Vec<f64>)> = None;
        for i in 0..n_candidates {
            let unit: Vec<f64> = if i < n_local {
                anchor
                    .iter()
                    .map(|&a| (a + gaussian(&mut rng) * LOCAL_CANDIDATE_SPREAD).clamp(0.0, 1.0))
                    .collect()
            } else {
                (0..space.arity()).map(|_| rng.gen::<f64>()).collect()
            };

            // Score candidates where they will actually land after snapping.
            let mut parameters = space.from_unit(&unit);
            space.snap(&mut parameters);
            let unit = space.to_unit(&parameters);

            let prediction = model.predict_standardized(&unit);
            let ei = expected_improvement(
                prediction.mean,
                prediction.std,
                best_cost_std,
                self.config.xi,
            );
            if !ei.is_finite() {
                continue;
            }
            if chosen.as_ref().map_or(true, |(best_ei, _, _)| ei > *best_ei) {
                chosen = Some((ei, parameters, unit));
            }
        }

        let (ei, parameters, unit) = chosen.ok_or_else(|| {
            OptimizerError::FitFailed("acquisition function was not finite at any candidate".into())
        })?;

        let prediction = model.predict(&unit);
        tracing::debug!(
            target_name = %space.target(),
            observations = observations.len(),
            expected_improvement = ei,
            length_scale = model.length_scale(),
            "proposal from surrogate"
        );

        Ok(Proposal {
            parameters,
            source: ProposalSource::Surrogate {
                expected_improvement: ei,
                // Back to score orientation.
                predicted_score: -prediction.mean,
                predicted_std: prediction.std,
                length_scale: model.length_scale(),
            },
            best,
        })
    }
}

/// Lowest cost wins; reported back as a focus score.
fn best_trial(observations: &[Observation], costs: &[f64]) -> Option<BestTrial> {
    costs
        .iter()
        .enumerate()
        .fold(None, |acc: Option<(usize, f64)>, (i, &c)| match acc {
            Some((_, best)) if best <= c => acc,
            _ => Some((i, c)),
        })
        .map(|(i, cost)| BestTrial {
            parameters: observations[i].parameters.clone(),
            score: -cost,
        })
}

fn candidate_seed(seed: u64, observations: usize) -> u64 {
    seed ^ (observations as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Standard normal sample via the Box-Muller transform.
fn gaussian<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-10);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
