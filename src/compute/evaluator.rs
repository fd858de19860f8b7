//! Full rule evaluation.
//!
//! The discovery loop treats evaluation as an external collaborator behind
//! the [`Evaluator`] trait. [`LifeEvaluator`] is the reference implementation:
//! it runs the rule on seeded random grids and derives attractor, entropy,
//! sensitivity and functional measurements from the trajectories.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::LifeGrid;
use crate::schema::{EvaluationConfig, MetricBundle, RuleNotation};

/// Settings for one evaluation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSettings {
    pub grid_size: usize,
    pub steps: usize,
    pub seed: u64,
    pub noise: f64,
    /// Independent initial conditions.
    pub runs: usize,
}

impl EvaluationSettings {
    pub fn from_config(config: &EvaluationConfig, seed: u64) -> Self {
        Self {
            grid_size: config.grid_size,
            steps: config.steps,
            seed,
            noise: config.noise,
            runs: config.seeds,
        }
    }
}

/// Evaluation errors.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Invalid evaluation settings: {0}")]
    InvalidSettings(String),
    #[error("Evaluation of {rule} failed: {reason}")]
    Failed { rule: RuleNotation, reason: String },
}

/// Measures a rule. Implementations must be deterministic for fixed settings.
pub trait Evaluator {
    fn evaluate(
        &self,
        rule: &RuleNotation,
        settings: &EvaluationSettings,
    ) -> Result<MetricBundle, EvaluationError>;
}

impl<E: Evaluator + ?Sized> Evaluator for &E {
    fn evaluate(
        &self,
        rule: &RuleNotation,
        settings: &EvaluationSettings,
    ) -> Result<MetricBundle, EvaluationError> {
        (**self).evaluate(rule, settings)
    }
}

// ============================================================================
// Reference evaluator
// ============================================================================

const INITIAL_DENSITY: f64 = 0.3;
const MAX_PERIOD: usize = 100;
/// Extra steps a final state must hold to count as stable.
const STABILITY_WINDOW: usize = 5;

/// Simulation-based evaluator for Life-like rules.
#[derive(Debug, Clone, Default)]
pub struct LifeEvaluator;

impl LifeEvaluator {
    pub fn new() -> Self {
        Self
    }
}

/// Measurements from one seeded run.
#[derive(Debug, Clone)]
struct RunMeasurement {
    memory: f64,
    entropy: f64,
    sensitivity: f64,
    activity: f64,
    final_density: f64,
    /// Hash of the final state if it is a fixed point.
    stable_state: Option<u64>,
    attractor: u64,
    robustness: f64,
}

impl Evaluator for LifeEvaluator {
    fn evaluate(
        &self,
        rule: &RuleNotation,
        settings: &EvaluationSettings,
    ) -> Result<MetricBundle, EvaluationError> {
        if settings.grid_size < 3 {
            return Err(EvaluationError::InvalidSettings(format!(
                "grid size {} is below 3",
                settings.grid_size
            )));
        }
        if settings.runs == 0 || settings.steps < 2 {
            return Err(EvaluationError::InvalidSettings(
                "need at least one run and two steps".to_string(),
            ));
        }

        let runs: Vec<RunMeasurement> = (0..settings.runs as u64)
            .into_par_iter()
            .map(|i| measure_run(rule, settings, settings.seed.wrapping_add(i)))
            .collect();

        Ok(aggregate(&runs))
    }
}

fn state_hash(grid: &LifeGrid) -> u64 {
    let mut hasher = DefaultHasher::new();
    grid.cells().hash(&mut hasher);
    hasher.finish()
}

fn measure_run(rule: &RuleNotation, settings: &EvaluationSettings, seed: u64) -> RunMeasurement {
    let mut rng = StdRng::seed_from_u64(seed);
    let initial = LifeGrid::random(settings.grid_size, INITIAL_DENSITY, &mut rng);

    let mut grid = initial.clone();
    let mut history = Vec::with_capacity(settings.steps + 1);
    history.push(state_hash(&grid));
    for _ in 0..settings.steps {
        grid.step(rule);
        history.push(state_hash(&grid));
    }

    // Twin trajectory from a perturbed start.
    let mut twin = initial.clone();
    twin.perturb(settings.noise, &mut rng);
    twin.run(rule, settings.steps);
    let sensitivity = grid.hamming_fraction(&twin);

    let memory = memory_score(&history);
    let final_density = grid.density();
    let entropy = binary_entropy(final_density);
    let attractor = history[history.len() - 1];

    let mut next = grid.clone();
    let mut stable = true;
    for _ in 0..STABILITY_WINDOW {
        next.step(rule);
        if next.cells() != grid.cells() {
            stable = false;
            break;
        }
    }

    RunMeasurement {
        memory,
        entropy,
        sensitivity,
        activity: final_density,
        final_density,
        stable_state: stable.then_some(attractor),
        attractor,
        robustness: checkerboard_robustness(rule, settings, &mut rng),
    }
}

/// Fraction of window steps a noisy checkerboard stays frozen after settling.
fn checkerboard_robustness(rule: &RuleNotation, settings: &EvaluationSettings, rng: &mut StdRng) -> f64 {
    let n = settings.grid_size;
    let mut grid = LifeGrid::new(n);
    for y in 0..n {
        for x in 0..n {
            grid.set(x, y, (x + y) % 2 == 0);
        }
    }
    grid.perturb(settings.noise.max(0.1), rng);
    grid.run(rule, settings.steps);

    let mut frozen = 0;
    for _ in 0..STABILITY_WINDOW {
        let before = grid.clone();
        grid.step(rule);
        if grid.cells() == before.cells() {
            frozen += 1;
        }
    }
    frozen as f64 / STABILITY_WINDOW as f64
}

/// Shannon entropy in bits of a binary state with the given live fraction.
fn binary_entropy(p: f64) -> f64 {
    if p <= 0.0 || p >= 1.0 {
        return 0.0;
    }
    -(p * p.log2() + (1.0 - p) * (1.0 - p).log2())
}

/// Smallest period and the first step from which the tail repeats with it.
fn detect_cycle(history: &[u64]) -> Option<(usize, usize)> {
    let n = history.len();
    for period in 1..=MAX_PERIOD.min(n / 2) {
        let repeats = (n - period..n).all(|i| history[i] == history[i - period]);
        if repeats {
            let mut start = n - 2 * period;
            while start > 0 && history[start - 1] == history[start - 1 + period] {
                start -= 1;
            }
            return Some((start, period));
        }
    }
    None
}

/// Attractor score: high for quick convergence to short cycles.
fn memory_score(history: &[u64]) -> f64 {
    let n = history.len();
    if n < 2 {
        return 0.0;
    }

    let (stability, period_penalty, transient) = match detect_cycle(history) {
        Some((transient, period)) => {
            let stability = 1.0 - transient as f64 / n as f64;
            let penalty = (period as f64 / MAX_PERIOD as f64).min(1.0);
            (stability, penalty, transient)
        }
        None => {
            let unique: HashSet<u64> = history.iter().copied().collect();
            let stability = if (unique.len() as f64) < n as f64 * 0.5 { 0.5 } else { 0.0 };
            (stability, 1.0, n)
        }
    };

    let convergence = 1.0 - (transient as f64 / n as f64).min(1.0);
    (stability * (1.0 - period_penalty * 0.5) * (0.5 + 0.5 * convergence)).clamp(0.0, 1.0)
}

#[inline]
fn bell(x: f64, center: f64, width: f64) -> f64 {
    (-(x - center).powi(2) / (2.0 * width * width)).exp()
}

/// Geometric mean of bell terms around moderate entropy, sensitivity,
/// memory and activity.
fn edge_score(entropy: f64, sensitivity: f64, memory: f64, activity: f64) -> f64 {
    let product = bell(entropy, 0.5, 0.2)
        * bell(sensitivity, 0.3, 0.15)
        * bell(memory, 0.5, 0.25)
        * bell(activity, 0.3, 0.2);
    product.powf(0.25).clamp(0.0, 1.0)
}

fn basin_score(diversity: f64) -> f64 {
    if diversity < 0.2 {
        diversity * 2.0
    } else if diversity > 0.8 {
        (1.0 - diversity) * 5.0
    } else {
        diversity
    }
}

fn aggregate(runs: &[RunMeasurement]) -> MetricBundle {
    let n = runs.len() as f64;
    let mean = |f: fn(&RunMeasurement) -> f64| runs.iter().map(f).sum::<f64>() / n;

    let memory_score = mean(|r| r.memory);
    let entropy = mean(|r| r.entropy);
    let edge_score = runs
        .iter()
        .map(|r| edge_score(r.entropy, r.sensitivity, r.memory, r.activity))
        .sum::<f64>()
        / n;
    let final_density = mean(|r| r.final_density);
    let robustness_score = mean(|r| r.robustness);

    let distinct_stable: HashSet<u64> = runs.iter().filter_map(|r| r.stable_state).collect();
    let capacity_score = distinct_stable.len() as f64 / n;

    let attractors: HashSet<u64> = runs.iter().map(|r| r.attractor).collect();
    let basin_diversity = attractors.len() as f64 / n;

    let functional_score =
        0.4 * capacity_score + 0.35 * robustness_score + 0.25 * basin_score(basin_diversity);

    let trivial_reason = if final_density < 0.01 {
        Some("dead".to_string())
    } else if final_density > 0.99 {
        Some("saturated".to_string())
    } else {
        None
    };

    MetricBundle {
        memory_score,
        edge_score,
        entropy,
        functional_score,
        capacity_score,
        robustness_score,
        basin_diversity,
        final_density,
        trivial: trivial_reason.is_some(),
        trivial_reason,
    }
}
