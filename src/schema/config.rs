//! Configuration types for the rule discovery loop.
//!
//! Every field carries a serde default so a partial JSON file (or `{}`) is a
//! valid configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{Metric, ModuleProfile};

/// Top-level configuration for the discovery loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Seed for evaluation grids and the candidate generator.
    #[serde(default = "default_evaluation_seed")]
    pub evaluation_seed: u64,
    /// Maximum number of Hall of Fame entries.
    #[serde(default = "default_hof_max_size")]
    pub hof_max_size: usize,
    /// Full evaluation settings passed to the evaluator.
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    /// Candidate generation settings.
    #[serde(default)]
    pub search: SearchConfig,
    /// Promotion policy and thresholds.
    #[serde(default)]
    pub promotion: PromotionConfig,
    /// Cheap pre-evaluation screen.
    #[serde(default)]
    pub hard_filter: HardFilterConfig,
    /// Strategy bandit settings.
    #[serde(default)]
    pub bandit: BanditConfig,
    /// Promise scorer settings.
    #[serde(default)]
    pub meta_model: MetaModelConfig,
    /// Where persisted state lives.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            evaluation_seed: default_evaluation_seed(),
            hof_max_size: default_hof_max_size(),
            evaluation: EvaluationConfig::default(),
            search: SearchConfig::default(),
            promotion: PromotionConfig::default(),
            hard_filter: HardFilterConfig::default(),
            bandit: BanditConfig::default(),
            meta_model: MetaModelConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

fn default_evaluation_seed() -> u64 {
    42
}
fn default_hof_max_size() -> usize {
    20
}

/// Full evaluation settings; the loop adds the seed per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Square grid edge length in cells.
    #[serde(default = "default_eval_grid_size")]
    pub grid_size: usize,
    /// Simulation steps per run.
    #[serde(default = "default_eval_steps")]
    pub steps: usize,
    /// Fraction of cells flipped when probing recall.
    #[serde(default = "default_noise")]
    pub noise: f64,
    /// Independent initial conditions per rule.
    #[serde(default = "default_eval_seeds")]
    pub seeds: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            grid_size: default_eval_grid_size(),
            steps: default_eval_steps(),
            noise: default_noise(),
            seeds: default_eval_seeds(),
        }
    }
}

fn default_eval_grid_size() -> usize {
    32
}
fn default_eval_steps() -> usize {
    120
}
fn default_noise() -> f64 {
    0.05
}
fn default_eval_seeds() -> usize {
    4
}

// ============================================================================
// Search
// ============================================================================

/// Strategy arms the bandit chooses between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Highest predicted promise first.
    Exploitation,
    /// Predictions closest to 0.5 first.
    Curiosity,
    /// Round-robin over structural size buckets.
    Diversity,
    /// Uniform sample of the pool.
    Random,
    /// Curated neighborhood of historically fertile rules.
    StableBias,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::Exploitation,
        Strategy::Curiosity,
        Strategy::Diversity,
        Strategy::Random,
        Strategy::StableBias,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Exploitation => "exploitation",
            Strategy::Curiosity => "curiosity",
            Strategy::Diversity => "diversity",
            Strategy::Random => "random",
            Strategy::StableBias => "stable_bias",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configured batch strategy; `Mixed` lets the bandit decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyChoice {
    Exploitation,
    Curiosity,
    Diversity,
    Random,
    StableBias,
    #[default]
    Mixed,
}

impl StrategyChoice {
    /// The fixed strategy, or `None` when the bandit picks.
    pub fn fixed(self) -> Option<Strategy> {
        match self {
            StrategyChoice::Exploitation => Some(Strategy::Exploitation),
            StrategyChoice::Curiosity => Some(Strategy::Curiosity),
            StrategyChoice::Diversity => Some(Strategy::Diversity),
            StrategyChoice::Random => Some(Strategy::Random),
            StrategyChoice::StableBias => Some(Strategy::StableBias),
            StrategyChoice::Mixed => None,
        }
    }
}

/// Candidate generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Candidates scored before batch selection.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Candidates sent to evaluation per iteration.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub strategy: StrategyChoice,
    /// Multiplier applied once per prior evaluation of a candidate.
    #[serde(default = "default_reevaluation_penalty")]
    pub reevaluation_penalty: f64,
    /// Prior assigned to curated stable-bias rules.
    #[serde(default = "default_stable_prior")]
    pub stable_prior: f64,
    /// Prior assigned to constrained random stable-bias rules.
    #[serde(default = "default_stable_fill_prior")]
    pub stable_fill_prior: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            batch_size: default_batch_size(),
            strategy: StrategyChoice::default(),
            reevaluation_penalty: default_reevaluation_penalty(),
            stable_prior: default_stable_prior(),
            stable_fill_prior: default_stable_fill_prior(),
        }
    }
}

fn default_pool_size() -> usize {
    200
}
fn default_batch_size() -> usize {
    30
}
fn default_reevaluation_penalty() -> f64 {
    0.85
}
fn default_stable_prior() -> f64 {
    0.7
}
fn default_stable_fill_prior() -> f64 {
    0.6
}

// ============================================================================
// Promotion
// ============================================================================

/// Which promotion policy decides Hall of Fame membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromotionPolicy {
    /// Adaptive thresholds, per-profile quotas and a diversity filter.
    #[default]
    ThresholdQuota,
    /// Non-dominated front over configured objectives.
    Pareto,
}

/// Which historical composites feed the adaptive percentile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPopulation {
    /// Every record with a composite, archived rules included.
    #[default]
    AllRecords,
    /// Skip records currently in the Hall of Fame.
    ExcludeHallOfFame,
}

/// Minimum per-metric values required alongside the adaptive composite test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricFloors {
    #[serde(default = "default_memory_floor")]
    pub memory_score: f64,
    #[serde(default = "default_edge_floor")]
    pub edge_score: f64,
    #[serde(default)]
    pub entropy: f64,
}

impl Default for MetricFloors {
    fn default() -> Self {
        Self {
            memory_score: default_memory_floor(),
            edge_score: default_edge_floor(),
            entropy: 0.0,
        }
    }
}

fn default_memory_floor() -> f64 {
    0.01
}
fn default_edge_floor() -> f64 {
    0.05
}

/// Absolute thresholds used when adaptive thresholds are unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedThresholds {
    #[serde(default = "default_fixed_memory")]
    pub memory_score: f64,
    #[serde(default = "default_fixed_edge")]
    pub edge_score: f64,
    #[serde(default = "default_fixed_entropy")]
    pub entropy: f64,
}

impl Default for FixedThresholds {
    fn default() -> Self {
        Self {
            memory_score: default_fixed_memory(),
            edge_score: default_fixed_edge(),
            entropy: default_fixed_entropy(),
        }
    }
}

fn default_fixed_memory() -> f64 {
    0.70
}
fn default_fixed_edge() -> f64 {
    0.20
}
fn default_fixed_entropy() -> f64 {
    0.30
}

/// Pareto policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParetoConfig {
    #[serde(default = "default_pareto_objectives")]
    pub objectives: Vec<Metric>,
    /// Fail on an objective no rule carries instead of dropping it.
    #[serde(default = "default_pareto_strict")]
    pub strict: bool,
}

impl Default for ParetoConfig {
    fn default() -> Self {
        Self {
            objectives: default_pareto_objectives(),
            strict: default_pareto_strict(),
        }
    }
}

fn default_pareto_objectives() -> Vec<Metric> {
    vec![
        Metric::FunctionalScore,
        Metric::MemoryScore,
        Metric::EdgeScore,
        Metric::Entropy,
    ]
}
fn default_pareto_strict() -> bool {
    true
}

/// Hall of Fame promotion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionConfig {
    #[serde(default)]
    pub policy: PromotionPolicy,
    /// Use a percentile of historical composites instead of fixed thresholds.
    #[serde(default = "default_adaptive")]
    pub adaptive_thresholds: bool,
    /// Percentile (0-100) of historical composites a candidate must reach.
    #[serde(default = "default_composite_percentile")]
    pub composite_percentile: f64,
    /// Historical composites needed before the percentile is trusted.
    #[serde(default = "default_min_history")]
    pub min_history: usize,
    /// Optional per-metric percentiles a candidate must also reach.
    #[serde(default)]
    pub metric_percentiles: BTreeMap<Metric, f64>,
    #[serde(default)]
    pub threshold_population: ThresholdPopulation,
    /// Functional score that bypasses the composite percentile.
    #[serde(default = "default_functional_bypass")]
    pub functional_bypass: f64,
    #[serde(default)]
    pub floors: MetricFloors,
    #[serde(default)]
    pub fixed_thresholds: FixedThresholds,
    /// Minimum rule distance between any two archived rules.
    #[serde(default = "default_diversity_threshold")]
    pub diversity_threshold: u32,
    /// Maximum archived rules per module profile. Missing profiles are unlimited.
    #[serde(default = "default_profile_quotas")]
    pub profile_quotas: BTreeMap<ModuleProfile, usize>,
    #[serde(default)]
    pub pareto: ParetoConfig,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            policy: PromotionPolicy::default(),
            adaptive_thresholds: default_adaptive(),
            composite_percentile: default_composite_percentile(),
            min_history: default_min_history(),
            metric_percentiles: BTreeMap::new(),
            threshold_population: ThresholdPopulation::default(),
            functional_bypass: default_functional_bypass(),
            floors: MetricFloors::default(),
            fixed_thresholds: FixedThresholds::default(),
            diversity_threshold: default_diversity_threshold(),
            profile_quotas: default_profile_quotas(),
            pareto: ParetoConfig::default(),
        }
    }
}

fn default_adaptive() -> bool {
    true
}
fn default_composite_percentile() -> f64 {
    85.0
}
fn default_min_history() -> usize {
    5
}
fn default_functional_bypass() -> f64 {
    0.30
}
fn default_diversity_threshold() -> u32 {
    2
}
fn default_profile_quotas() -> BTreeMap<ModuleProfile, usize> {
    ModuleProfile::ALL
        .into_iter()
        .map(|p| {
            let quota = match p {
                ModuleProfile::AttractorDominant | ModuleProfile::Generic => 2,
                _ => 4,
            };
            (p, quota)
        })
        .collect()
}

// ============================================================================
// Hard filter, bandit, meta-model, storage
// ============================================================================

/// Cheap density screen run before full evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardFilterConfig {
    #[serde(default = "default_filter_enabled")]
    pub enabled: bool,
    #[serde(default = "default_filter_grid")]
    pub grid_size: usize,
    #[serde(default = "default_filter_steps")]
    pub steps: usize,
    #[serde(default = "default_filter_seeds")]
    pub seeds: usize,
    /// First seed; run `i` uses `base_seed + i`.
    #[serde(default = "default_filter_base_seed")]
    pub base_seed: u64,
    /// Fraction of live cells in the random initial grid.
    #[serde(default = "default_initial_density")]
    pub initial_density: f64,
    /// Mean final density below this is quasi-death.
    #[serde(default = "default_min_density")]
    pub min_density: f64,
    /// Mean final density above this is saturation.
    #[serde(default = "default_max_density")]
    pub max_density: f64,
}

impl Default for HardFilterConfig {
    fn default() -> Self {
        Self {
            enabled: default_filter_enabled(),
            grid_size: default_filter_grid(),
            steps: default_filter_steps(),
            seeds: default_filter_seeds(),
            base_seed: default_filter_base_seed(),
            initial_density: default_initial_density(),
            min_density: default_min_density(),
            max_density: default_max_density(),
        }
    }
}

fn default_filter_enabled() -> bool {
    true
}
fn default_filter_grid() -> usize {
    32
}
fn default_filter_steps() -> usize {
    50
}
fn default_filter_seeds() -> usize {
    2
}
fn default_filter_base_seed() -> u64 {
    42
}
fn default_initial_density() -> f64 {
    0.3
}
fn default_min_density() -> f64 {
    0.05
}
fn default_max_density() -> f64 {
    0.95
}

/// UCB1 settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditConfig {
    /// Exploration constant `c`.
    #[serde(default = "default_exploration")]
    pub exploration: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            exploration: default_exploration(),
        }
    }
}

fn default_exploration() -> f64 {
    1.4
}

/// Promise scorer training settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaModelConfig {
    /// Below this many records the scorer stays neutral.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Records required before a held-out split is used.
    #[serde(default = "default_holdout_min_samples")]
    pub holdout_min_samples: usize,
    /// Fraction of records held out for accuracy.
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    /// L2 penalty on weights.
    #[serde(default = "default_l2")]
    pub l2: f64,
}

impl Default for MetaModelConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            holdout_min_samples: default_holdout_min_samples(),
            test_fraction: default_test_fraction(),
            learning_rate: default_learning_rate(),
            epochs: default_epochs(),
            l2: default_l2(),
        }
    }
}

fn default_min_samples() -> usize {
    5
}
fn default_holdout_min_samples() -> usize {
    9
}
fn default_test_fraction() -> f64 {
    0.2
}
fn default_learning_rate() -> f64 {
    0.5
}
fn default_epochs() -> usize {
    500
}
fn default_l2() -> f64 {
    1e-2
}

/// Persistence keys and location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for the JSON file repository.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default = "default_memory_key")]
    pub memory_key: String,
    #[serde(default = "default_hof_key")]
    pub hof_key: String,
    #[serde(default = "default_bandit_key")]
    pub bandit_key: String,
    /// Prefix under which exploration logs are written and read back.
    #[serde(default = "default_scans_prefix")]
    pub scans_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            memory_key: default_memory_key(),
            hof_key: default_hof_key(),
            bandit_key: default_bandit_key(),
            scans_prefix: default_scans_prefix(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("results")
}
fn default_memory_key() -> String {
    "meta_memory".to_string()
}
fn default_hof_key() -> String {
    "hof_rules".to_string()
}
fn default_bandit_key() -> String {
    "bandit_stats".to_string()
}
fn default_scans_prefix() -> String {
    "scans".to_string()
}

// ============================================================================
// Validation
// ============================================================================

/// Discovery configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryConfigError {
    #[error("Hall of Fame size must be at least 1")]
    EmptyArchive,
    #[error("Batch size must be non-zero and not exceed pool size ({batch} > {pool})")]
    InvalidBatch { batch: usize, pool: usize },
    #[error("Grid size must be at least 3 (got {0})")]
    GridTooSmall(usize),
    #[error("Invalid probability for {name}: {value}")]
    InvalidProbability { name: &'static str, value: f64 },
    #[error("Percentile must be within 0..=100 (got {0})")]
    InvalidPercentile(f64),
    #[error("Density bounds are inverted: min {min} > max {max}")]
    InvalidDensityBounds { min: f64, max: f64 },
    #[error("Exploration constant must be finite and non-negative (got {0})")]
    InvalidExploration(f64),
    #[error("Pareto policy needs at least one objective")]
    NoObjectives,
    #[error("Hard filter needs at least one seed")]
    NoFilterSeeds,
}

impl DiscoveryConfig {
    /// Validate discovery configuration.
    pub fn validate(&self) -> Result<(), DiscoveryConfigError> {
        if self.hof_max_size == 0 {
            return Err(DiscoveryConfigError::EmptyArchive);
        }

        let search = &self.search;
        if search.batch_size == 0 || search.batch_size > search.pool_size {
            return Err(DiscoveryConfigError::InvalidBatch {
                batch: search.batch_size,
                pool: search.pool_size,
            });
        }

        for grid in [self.evaluation.grid_size, self.hard_filter.grid_size] {
            if grid < 3 {
                return Err(DiscoveryConfigError::GridTooSmall(grid));
            }
        }

        let check_probability = |value: f64, name: &'static str| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(DiscoveryConfigError::InvalidProbability { name, value })
            }
        };

        check_probability(self.evaluation.noise, "evaluation.noise")?;
        check_probability(search.reevaluation_penalty, "search.reevaluation_penalty")?;
        check_probability(search.stable_prior, "search.stable_prior")?;
        check_probability(search.stable_fill_prior, "search.stable_fill_prior")?;
        check_probability(self.hard_filter.initial_density, "hard_filter.initial_density")?;
        check_probability(self.hard_filter.min_density, "hard_filter.min_density")?;
        check_probability(self.hard_filter.max_density, "hard_filter.max_density")?;
        check_probability(self.meta_model.test_fraction, "meta_model.test_fraction")?;

        if self.hard_filter.min_density > self.hard_filter.max_density {
            return Err(DiscoveryConfigError::InvalidDensityBounds {
                min: self.hard_filter.min_density,
                max: self.hard_filter.max_density,
            });
        }
        if self.hard_filter.enabled && self.hard_filter.seeds == 0 {
            return Err(DiscoveryConfigError::NoFilterSeeds);
        }

        let percentiles = std::iter::once(self.promotion.composite_percentile)
            .chain(self.promotion.metric_percentiles.values().copied());
        for pct in percentiles {
            if !(0.0..=100.0).contains(&pct) {
                return Err(DiscoveryConfigError::InvalidPercentile(pct));
            }
        }

        let c = self.bandit.exploration;
        if !c.is_finite() || c < 0.0 {
            return Err(DiscoveryConfigError::InvalidExploration(c));
        }

        if self.promotion.policy == PromotionPolicy::Pareto
            && self.promotion.pareto.objectives.is_empty()
        {
            return Err(DiscoveryConfigError::NoObjectives);
        }

        Ok(())
    }
}
