//! Records produced and persisted by the discovery loop.
//!
//! Everything here is plain serde data: metric bundles from the evaluator,
//! the per-rule memory records, Hall of Fame entries, bandit state and the
//! per-iteration summary.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RuleNotation, Strategy};

// ============================================================================
// Metrics
// ============================================================================

/// Named functional metrics reported by an evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    MemoryScore,
    EdgeScore,
    Entropy,
    FunctionalScore,
    CapacityScore,
    RobustnessScore,
    BasinDiversity,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::MemoryScore,
        Metric::EdgeScore,
        Metric::Entropy,
        Metric::FunctionalScore,
        Metric::CapacityScore,
        Metric::RobustnessScore,
        Metric::BasinDiversity,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::MemoryScore => "memory_score",
            Metric::EdgeScore => "edge_score",
            Metric::Entropy => "entropy",
            Metric::FunctionalScore => "functional_score",
            Metric::CapacityScore => "capacity_score",
            Metric::RobustnessScore => "robustness_score",
            Metric::BasinDiversity => "basin_diversity",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Weights of the default composite score.
pub const COMPOSITE_WEIGHTS: (f64, f64, f64) = (0.5, 0.3, 0.2);

/// Fixed-weight composite of memory, edge and entropy.
#[inline]
pub fn composite_score(memory: f64, edge: f64, entropy: f64) -> f64 {
    let (wm, we, wh) = COMPOSITE_WEIGHTS;
    wm * memory + we * edge + wh * entropy
}

/// Measurements of one rule under one evaluation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetricBundle {
    pub memory_score: f64,
    pub edge_score: f64,
    pub entropy: f64,
    pub functional_score: f64,
    pub capacity_score: f64,
    pub robustness_score: f64,
    pub basin_diversity: f64,
    pub final_density: f64,
    #[serde(default)]
    pub trivial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trivial_reason: Option<String>,
}

impl MetricBundle {
    pub fn composite(&self) -> f64 {
        composite_score(self.memory_score, self.edge_score, self.entropy)
    }

    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::MemoryScore => self.memory_score,
            Metric::EdgeScore => self.edge_score,
            Metric::Entropy => self.entropy,
            Metric::FunctionalScore => self.functional_score,
            Metric::CapacityScore => self.capacity_score,
            Metric::RobustnessScore => self.robustness_score,
            Metric::BasinDiversity => self.basin_diversity,
        }
    }

    /// Every metric as a populated score set.
    pub fn to_scores(&self) -> ScoreSet {
        let mut scores = ScoreSet::default();
        for metric in Metric::ALL {
            scores.set(metric, self.get(metric));
        }
        scores
    }
}

/// Optional per-metric scores with an open extension map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScoreSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entropy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functional_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robustness_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basin_diversity: Option<f64>,
    /// Metrics this crate does not know about, kept as-is.
    #[serde(flatten)]
    pub extra: BTreeMap<String, f64>,
}

impl ScoreSet {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::MemoryScore => self.memory_score,
            Metric::EdgeScore => self.edge_score,
            Metric::Entropy => self.entropy,
            Metric::FunctionalScore => self.functional_score,
            Metric::CapacityScore => self.capacity_score,
            Metric::RobustnessScore => self.robustness_score,
            Metric::BasinDiversity => self.basin_diversity,
        }
    }

    pub fn set(&mut self, metric: Metric, value: f64) {
        let slot = match metric {
            Metric::MemoryScore => &mut self.memory_score,
            Metric::EdgeScore => &mut self.edge_score,
            Metric::Entropy => &mut self.entropy,
            Metric::FunctionalScore => &mut self.functional_score,
            Metric::CapacityScore => &mut self.capacity_score,
            Metric::RobustnessScore => &mut self.robustness_score,
            Metric::BasinDiversity => &mut self.basin_diversity,
        };
        *slot = Some(value);
    }

    /// Overwrite every metric present in `other`, leave the rest untouched.
    pub fn merge(&mut self, other: &ScoreSet) {
        for metric in Metric::ALL {
            if let Some(value) = other.get(metric) {
                self.set(metric, value);
            }
        }
        for (name, value) in &other.extra {
            self.extra.insert(name.clone(), *value);
        }
    }

    /// Composite score, if memory, edge and entropy are all known.
    pub fn composite(&self) -> Option<f64> {
        Some(composite_score(
            self.memory_score?,
            self.edge_score?,
            self.entropy?,
        ))
    }

    pub fn is_empty(&self) -> bool {
        Metric::ALL.iter().all(|m| self.get(*m).is_none()) && self.extra.is_empty()
    }
}

// ============================================================================
// Memory store
// ============================================================================

/// Provenance and bookkeeping for a memory record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub source: String,
    pub discovered_date: String,
    #[serde(default)]
    pub times_evaluated: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Everything known about one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub notation: RuleNotation,
    pub born: Vec<u8>,
    pub survive: Vec<u8>,
    #[serde(default)]
    pub scores: ScoreSet,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    pub metadata: RecordMetadata,
}

impl MemoryRecord {
    pub fn new(notation: RuleNotation, source: &str, discovered_date: &str) -> Self {
        Self {
            notation,
            born: notation.born.to_vec(),
            survive: notation.survive.to_vec(),
            scores: ScoreSet::default(),
            labels: BTreeSet::new(),
            metadata: RecordMetadata {
                source: source.to_string(),
                discovered_date: discovered_date.to_string(),
                times_evaluated: 0,
                last_seen: None,
            },
        }
    }

    /// Overwrite scores per metric and union labels. Metadata is untouched.
    pub fn enrich<'a, I>(&mut self, scores: &ScoreSet, labels: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        self.scores.merge(scores);
        self.labels.extend(labels.into_iter().cloned());
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }
}

// ============================================================================
// Hall of Fame
// ============================================================================

/// How a rule earned its Hall of Fame place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Champion,
    Validated,
    Promising,
    AdaptiveCandidate,
    FixedThreshold,
    Pareto,
    /// Baseline forced into an empty archive.
    Bootstrap,
}

impl Tier {
    pub fn name(self) -> &'static str {
        match self {
            Tier::Champion => "champion",
            Tier::Validated => "validated",
            Tier::Promising => "promising",
            Tier::AdaptiveCandidate => "adaptive_candidate",
            Tier::FixedThreshold => "fixed_threshold",
            Tier::Pareto => "pareto",
            Tier::Bootstrap => "bootstrap",
        }
    }

    /// Labels that mark a rule as judged interesting.
    pub fn is_promotion_label(label: &str) -> bool {
        matches!(
            label,
            "champion" | "validated" | "promising" | "adaptive_candidate" | "fixed_threshold"
                | "pareto"
        )
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Functional role inferred from capacity, robustness, basin diversity and entropy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleProfile {
    StableMemory,
    RobustMemory,
    DiverseMemory,
    ChaoticProbe,
    SensitiveDetector,
    AttractorDominant,
    Generic,
}

impl ModuleProfile {
    pub const ALL: [ModuleProfile; 7] = [
        ModuleProfile::StableMemory,
        ModuleProfile::RobustMemory,
        ModuleProfile::DiverseMemory,
        ModuleProfile::ChaoticProbe,
        ModuleProfile::SensitiveDetector,
        ModuleProfile::AttractorDominant,
        ModuleProfile::Generic,
    ];

    /// Decision table, first match wins.
    pub fn infer(capacity: f64, robustness: f64, basin_diversity: f64, entropy: f64) -> Self {
        if capacity > 0.6 && robustness > 0.6 {
            ModuleProfile::StableMemory
        } else if robustness > 0.7 && capacity > 0.3 {
            ModuleProfile::RobustMemory
        } else if capacity > 0.5 && basin_diversity > 0.5 {
            ModuleProfile::DiverseMemory
        } else if entropy > 0.7 && capacity < 0.3 {
            ModuleProfile::ChaoticProbe
        } else if robustness < 0.3 && entropy > 0.5 {
            ModuleProfile::SensitiveDetector
        } else if basin_diversity < 0.2 && robustness > 0.5 {
            ModuleProfile::AttractorDominant
        } else {
            ModuleProfile::Generic
        }
    }

    pub fn from_metrics(metrics: &MetricBundle) -> Self {
        Self::infer(
            metrics.capacity_score,
            metrics.robustness_score,
            metrics.basin_diversity,
            metrics.entropy,
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ModuleProfile::StableMemory => "stable_memory",
            ModuleProfile::RobustMemory => "robust_memory",
            ModuleProfile::DiverseMemory => "diverse_memory",
            ModuleProfile::ChaoticProbe => "chaotic_probe",
            ModuleProfile::SensitiveDetector => "sensitive_detector",
            ModuleProfile::AttractorDominant => "attractor_dominant",
            ModuleProfile::Generic => "generic",
        }
    }

    pub fn suggested_use(self) -> &'static str {
        match self {
            ModuleProfile::StableMemory => {
                "Robust discrete state storage, suited to long-term memory"
            }
            ModuleProfile::RobustMemory => "Noise-tolerant memory for perturbed environments",
            ModuleProfile::DiverseMemory => "Varied basins, suited to storing many patterns",
            ModuleProfile::ChaoticProbe => "Complex dynamics for exploration or hashing",
            ModuleProfile::SensitiveDetector => "Perturbation-sensitive sensor or amplifier",
            ModuleProfile::AttractorDominant => "Strong convergence to attractors, classification",
            ModuleProfile::Generic => "General use, mixed profile",
        }
    }
}

impl fmt::Display for ModuleProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An archived rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallOfFameEntry {
    pub notation: RuleNotation,
    pub born: Vec<u8>,
    pub survive: Vec<u8>,
    pub tier: Tier,
    pub module_profile: ModuleProfile,
    pub suggested_use: String,
    pub composite_score: f64,
    #[serde(default)]
    pub promotion_reason: String,
    pub discovered_by: String,
    pub discovered_date: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub scores: ScoreSet,
}

impl HallOfFameEntry {
    /// Build an entry from a freshly evaluated rule.
    pub fn from_metrics(
        notation: RuleNotation,
        metrics: &MetricBundle,
        tier: Tier,
        reason: String,
        discovered_by: &str,
        discovered_date: &str,
    ) -> Self {
        let profile = ModuleProfile::from_metrics(metrics);
        Self {
            notation,
            born: notation.born.to_vec(),
            survive: notation.survive.to_vec(),
            tier,
            module_profile: profile,
            suggested_use: profile.suggested_use().to_string(),
            composite_score: metrics.composite(),
            promotion_reason: reason,
            discovered_by: discovered_by.to_string(),
            discovered_date: discovered_date.to_string(),
            tags: BTreeSet::new(),
            scores: metrics.to_scores(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

// ============================================================================
// Bandit state
// ============================================================================

/// Reward statistics for one strategy arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ArmStats {
    pub pulls: u64,
    pub total_reward: f64,
    pub avg_reward: f64,
}

impl ArmStats {
    pub fn record(&mut self, reward: f64) {
        self.pulls += 1;
        self.total_reward += reward;
        self.avg_reward = self.total_reward / self.pulls as f64;
    }
}

/// Persisted bandit statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BanditState {
    pub total_pulls: u64,
    pub arms: BTreeMap<String, ArmStats>,
}

// ============================================================================
// Iteration summary
// ============================================================================

/// Outcome of one discovery iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    /// Candidates produced by the generator.
    pub candidates_tested: usize,
    /// Candidates that passed the hard filter and evaluated without error.
    pub results_obtained: usize,
    /// Rules promoted by the active policy (bootstrap excluded).
    pub new_rules_added: usize,
    /// 1 when the empty archive was seeded with a baseline.
    pub bootstrapped: usize,
    pub total_memory_rules: usize,
    pub total_hof_rules: usize,
    pub strategy_used: Strategy,
    /// Held-out accuracy of the promise scorer, 0 when untrained.
    pub meta_model_accuracy: f64,
    /// Where this iteration's exploration log was written.
    pub log_location: String,
    pub filtered_out: usize,
    pub evaluation_failures: usize,
    pub removed_rules: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_weights() {
        let bundle = MetricBundle {
            memory_score: 1.0,
            edge_score: 1.0,
            entropy: 1.0,
            ..Default::default()
        };
        assert!((bundle.composite() - 1.0).abs() < 1e-12);

        let bundle = MetricBundle {
            memory_score: 0.4,
            edge_score: 0.2,
            entropy: 0.5,
            ..Default::default()
        };
        assert!((bundle.composite() - 0.36).abs() < 1e-12);
    }

    #[test]
    fn test_score_merge_overwrites_only_present() {
        let mut a = ScoreSet {
            memory_score: Some(0.1),
            edge_score: Some(0.2),
            ..Default::default()
        };
        let b = ScoreSet {
            edge_score: Some(0.9),
            entropy: Some(0.5),
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.memory_score, Some(0.1));
        assert_eq!(a.edge_score, Some(0.9));
        assert_eq!(a.entropy, Some(0.5));
        assert!(a.composite().is_some());
    }

    #[test]
    fn test_score_extra_roundtrip() {
        let json = r#"{"memory_score":0.5,"lyapunov":0.25}"#;
        let scores: ScoreSet = serde_json::from_str(json).unwrap();
        assert_eq!(scores.memory_score, Some(0.5));
        assert_eq!(scores.extra.get("lyapunov"), Some(&0.25));

        let back = serde_json::to_value(&scores).unwrap();
        assert_eq!(back["lyapunov"], 0.25);
        assert!(back.get("edge_score").is_none());
    }

    #[test]
    fn test_profile_decision_table() {
        assert_eq!(ModuleProfile::infer(0.7, 0.7, 0.0, 0.0), ModuleProfile::StableMemory);
        assert_eq!(ModuleProfile::infer(0.4, 0.8, 0.0, 0.0), ModuleProfile::RobustMemory);
        assert_eq!(ModuleProfile::infer(0.6, 0.1, 0.6, 0.0), ModuleProfile::DiverseMemory);
        assert_eq!(ModuleProfile::infer(0.1, 0.5, 0.5, 0.8), ModuleProfile::ChaoticProbe);
        assert_eq!(ModuleProfile::infer(0.4, 0.2, 0.5, 0.6), ModuleProfile::SensitiveDetector);
        assert_eq!(ModuleProfile::infer(0.4, 0.6, 0.1, 0.1), ModuleProfile::AttractorDominant);
        assert_eq!(ModuleProfile::infer(0.4, 0.4, 0.4, 0.4), ModuleProfile::Generic);
    }

    #[test]
    fn test_bootstrap_is_not_a_promotion_label() {
        assert!(Tier::is_promotion_label("champion"));
        assert!(Tier::is_promotion_label(Tier::AdaptiveCandidate.name()));
        assert!(!Tier::is_promotion_label(Tier::Bootstrap.name()));
        assert!(!Tier::is_promotion_label("hof"));
    }

    #[test]
    fn test_arm_stats_average() {
        let mut arm = ArmStats::default();
        arm.record(1.0);
        arm.record(0.0);
        arm.record(2.0);
        assert_eq!(arm.pulls, 3);
        assert!((arm.avg_reward - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_memory_record_serialization() {
        let mut record = MemoryRecord::new(RuleNotation::life(), "test", "2024-01-01");
        record.scores.memory_score = Some(0.8);
        record.labels.insert("evaluated".to_string());
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"notation\":\"B3/S23\""));
        assert!(json.contains("\"born\":[3]"));
        let back: MemoryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
