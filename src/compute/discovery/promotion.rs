//! Hall of Fame promotion policies.
//!
//! The default policy admits a rule when its composite clears an adaptive
//! percentile of historical composites (or its functional score clears a
//! bypass floor), every metric clears its floor, its module profile still has
//! quota and no archived rule is too close. The Pareto policy instead keeps
//! the non-dominated front. Either way an empty archive is seeded with the
//! best evaluated rule.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use super::archive::{Admission, HallOfFame};
use super::generator::CandidateSource;
use super::pareto::{self, ParetoError};
use crate::schema::{
    HallOfFameEntry, MemoryRecord, Metric, MetricBundle, ModuleProfile, PromotionConfig,
    PromotionPolicy, RuleNotation, ThresholdPopulation, Tier,
};

/// A successfully evaluated candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedCandidate {
    pub rule: RuleNotation,
    pub source: CandidateSource,
    pub metrics: MetricBundle,
}

/// Linear-interpolated percentile (0-100) of unsorted values.
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

/// Thresholds in force for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Thresholds {
    /// Percentile-derived composite threshold plus per-metric floors.
    Adaptive {
        composite: f64,
        /// Per-metric percentile thresholds, if configured.
        metrics: BTreeMap<Metric, f64>,
        /// Number of historical composites the percentile was taken over.
        population: usize,
    },
    /// Absolute memory, edge and entropy minimums.
    Fixed,
}

/// Why a candidate was or was not admitted.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Promoted { tier: Tier, profile: ModuleProfile },
    Trivial,
    BelowThreshold,
    QuotaFull { profile: ModuleProfile, quota: usize },
    TooSimilar { nearest: RuleNotation, distance: u32 },
    ArchiveFull,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Promoted { tier, profile } => write!(f, "promoted as {tier} ({profile})"),
            Decision::Trivial => f.write_str("trivial dynamics"),
            Decision::BelowThreshold => f.write_str("below thresholds"),
            Decision::QuotaFull { profile, quota } => {
                write!(f, "quota full for {profile} ({quota})")
            }
            Decision::TooSimilar { nearest, distance } => {
                write!(f, "too similar to {nearest} (distance {distance})")
            }
            Decision::ArchiveFull => f.write_str("archive full of stronger rules"),
        }
    }
}

/// What one promotion pass changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromotionOutcome {
    /// Rules admitted by the active policy.
    pub promoted: Vec<RuleNotation>,
    /// Baseline forced into an empty archive.
    pub bootstrapped: Option<RuleNotation>,
    /// Members evicted or dropped from the front.
    pub removed: Vec<RuleNotation>,
    pub decisions: Vec<(RuleNotation, Decision)>,
}

/// Decides Hall of Fame admission and eviction.
#[derive(Debug, Clone)]
pub struct PromotionEngine {
    config: PromotionConfig,
}

impl PromotionEngine {
    pub fn new(config: PromotionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PromotionConfig {
        &self.config
    }

    /// Thresholds from memory as it stands before this batch is recorded.
    pub fn compute_thresholds(&self, memory: &[MemoryRecord], hof: &HallOfFame) -> Thresholds {
        if !self.config.adaptive_thresholds {
            return Thresholds::Fixed;
        }

        let population: Vec<&MemoryRecord> = memory
            .iter()
            .filter(|r| match self.config.threshold_population {
                ThresholdPopulation::AllRecords => true,
                ThresholdPopulation::ExcludeHallOfFame => !hof.contains(&r.notation),
            })
            .collect();

        let composites: Vec<f64> = population.iter().filter_map(|r| r.scores.composite()).collect();
        if composites.len() < self.config.min_history {
            log::debug!(
                "{} historical composites, below {}; using fixed thresholds",
                composites.len(),
                self.config.min_history
            );
            return Thresholds::Fixed;
        }

        let Some(composite) = percentile(&composites, self.config.composite_percentile) else {
            return Thresholds::Fixed;
        };

        let metrics = self
            .config
            .metric_percentiles
            .iter()
            .filter_map(|(&metric, &pct)| {
                let values: Vec<f64> = population.iter().filter_map(|r| r.scores.get(metric)).collect();
                percentile(&values, pct).map(|v| (metric, v))
            })
            .collect();

        Thresholds::Adaptive {
            composite,
            metrics,
            population: composites.len(),
        }
    }

    /// Whether a bundle clears the thresholds; returns the admission reason.
    fn qualifies(&self, metrics: &MetricBundle, thresholds: &Thresholds) -> Option<(Tier, String)> {
        match thresholds {
            Thresholds::Adaptive {
                composite: threshold,
                metrics: metric_thresholds,
                ..
            } => {
                let floors = &self.config.floors;
                let floors_ok = metrics.memory_score >= floors.memory_score
                    && metrics.edge_score >= floors.edge_score
                    && metrics.entropy >= floors.entropy;
                let percentiles_ok = metric_thresholds
                    .iter()
                    .all(|(&m, &t)| metrics.get(m) >= t);

                let composite = metrics.composite();
                let composite_ok = composite >= *threshold;
                let bypass_ok = metrics.functional_score >= self.config.functional_bypass;

                if !(floors_ok && percentiles_ok && (composite_ok || bypass_ok)) {
                    return None;
                }
                let profile = ModuleProfile::from_metrics(metrics);
                let reason = if composite_ok {
                    format!("adaptive ({profile}, composite={composite:.3})")
                } else {
                    format!(
                        "functional bypass ({profile}, functional={:.3})",
                        metrics.functional_score
                    )
                };
                Some((Tier::AdaptiveCandidate, reason))
            }
            Thresholds::Fixed => {
                let fixed = &self.config.fixed_thresholds;
                let ok = metrics.memory_score >= fixed.memory_score
                    && metrics.edge_score >= fixed.edge_score
                    && metrics.entropy >= fixed.entropy;
                ok.then(|| (Tier::FixedThreshold, "fixed thresholds".to_string()))
            }
        }
    }

    /// Run the configured policy, then bootstrap an empty archive.
    pub fn promote(
        &self,
        evaluated: &[EvaluatedCandidate],
        thresholds: &Thresholds,
        hof: &mut HallOfFame,
        date: &str,
    ) -> Result<PromotionOutcome, ParetoError> {
        let mut outcome = match self.config.policy {
            PromotionPolicy::ThresholdQuota => self.promote_threshold(evaluated, thresholds, hof, date),
            PromotionPolicy::Pareto => self.promote_pareto(evaluated, hof, date)?,
        };
        outcome.bootstrapped = self.bootstrap(evaluated, hof, date);
        Ok(outcome)
    }

    fn promote_threshold(
        &self,
        evaluated: &[EvaluatedCandidate],
        thresholds: &Thresholds,
        hof: &mut HallOfFame,
        date: &str,
    ) -> PromotionOutcome {
        let mut outcome = PromotionOutcome::default();

        for candidate in evaluated {
            let decision = self.decide(candidate, thresholds, hof, date, &mut outcome);
            match &decision {
                Decision::Promoted { .. } => {
                    log::info!("promoted {}: {decision}", candidate.rule);
                    outcome.promoted.push(candidate.rule);
                }
                Decision::QuotaFull { .. } | Decision::TooSimilar { .. } => {
                    log::info!("not promoting {}: {decision}", candidate.rule);
                }
                _ => log::debug!("not promoting {}: {decision}", candidate.rule),
            }
            outcome.decisions.push((candidate.rule, decision));
        }

        outcome
    }

    fn decide(
        &self,
        candidate: &EvaluatedCandidate,
        thresholds: &Thresholds,
        hof: &mut HallOfFame,
        date: &str,
        outcome: &mut PromotionOutcome,
    ) -> Decision {
        let metrics = &candidate.metrics;
        if metrics.trivial {
            return Decision::Trivial;
        }
        let Some((tier, reason)) = self.qualifies(metrics, thresholds) else {
            return Decision::BelowThreshold;
        };

        let profile = ModuleProfile::from_metrics(metrics);
        if let Some(&quota) = self.config.profile_quotas.get(&profile) {
            // A re-evaluated member does not count against its own quota.
            let own = hof
                .get(&candidate.rule)
                .is_some_and(|e| e.module_profile == profile);
            let used = hof.profile_count(profile) - usize::from(own);
            if used >= quota {
                return Decision::QuotaFull { profile, quota };
            }
        }

        if let Some((nearest, distance)) = hof.nearest(&candidate.rule)
            && distance < self.config.diversity_threshold
        {
            return Decision::TooSimilar {
                nearest: nearest.notation,
                distance,
            };
        }

        let tag = match tier {
            Tier::FixedThreshold => "fixed",
            _ => "adaptive",
        };
        let entry = HallOfFameEntry::from_metrics(
            candidate.rule,
            metrics,
            tier,
            reason,
            candidate.source.name(),
            date,
        )
        .with_tags(["automated", tag]);

        match hof.add(entry) {
            Admission::Rejected => Decision::ArchiveFull,
            Admission::Evicted(old) => {
                log::info!("evicted {old} to make room for {}", candidate.rule);
                outcome.removed.push(old);
                Decision::Promoted { tier, profile }
            }
            Admission::Inserted | Admission::Replaced => Decision::Promoted { tier, profile },
        }
    }

    fn promote_pareto(
        &self,
        evaluated: &[EvaluatedCandidate],
        hof: &mut HallOfFame,
        date: &str,
    ) -> Result<PromotionOutcome, ParetoError> {
        let candidates: Vec<HallOfFameEntry> = evaluated
            .iter()
            .filter(|c| !c.metrics.trivial)
            .map(|c| {
                HallOfFameEntry::from_metrics(
                    c.rule,
                    &c.metrics,
                    Tier::Pareto,
                    "pareto front".to_string(),
                    c.source.name(),
                    date,
                )
                .with_tags(["automated", "pareto"])
            })
            .collect();

        let selection = pareto::select(
            hof.entries(),
            candidates,
            &self.config.pareto,
            hof.max_size(),
            self.config.diversity_threshold,
        )?;

        let promoted: HashSet<RuleNotation> = selection.promoted.iter().copied().collect();
        let decisions = evaluated
            .iter()
            .map(|c| {
                let decision = if c.metrics.trivial {
                    Decision::Trivial
                } else if promoted.contains(&c.rule) {
                    Decision::Promoted {
                        tier: Tier::Pareto,
                        profile: ModuleProfile::from_metrics(&c.metrics),
                    }
                } else {
                    Decision::BelowThreshold
                };
                (c.rule, decision)
            })
            .collect();

        log::info!(
            "pareto front over {:?}: {} promoted, {} removed",
            selection.objectives,
            selection.promoted.len(),
            selection.removed.len()
        );

        hof.replace_all(selection.kept);
        Ok(PromotionOutcome {
            promoted: selection.promoted,
            bootstrapped: None,
            removed: selection.removed,
            decisions,
        })
    }

    /// Seed an empty archive with the best-composite evaluated rule.
    pub fn bootstrap(
        &self,
        evaluated: &[EvaluatedCandidate],
        hof: &mut HallOfFame,
        date: &str,
    ) -> Option<RuleNotation> {
        if !hof.is_empty() {
            return None;
        }
        let best = evaluated.iter().reduce(|best, c| {
            if c.metrics.composite() > best.metrics.composite() {
                c
            } else {
                best
            }
        })?;

        let entry = HallOfFameEntry::from_metrics(
            best.rule,
            &best.metrics,
            Tier::Bootstrap,
            "bootstrap baseline".to_string(),
            best.source.name(),
            date,
        )
        .with_tags(["automated", "bootstrap"]);

        hof.add(entry);
        log::info!(
            "bootstrapped empty Hall of Fame with {} (composite={:.3})",
            best.rule,
            best.metrics.composite()
        );
        Some(best.rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FixedThresholds, ScoreSet};

    const DATE: &str = "2024-01-01";

    fn bundle(memory: f64, edge: f64, entropy: f64) -> MetricBundle {
        MetricBundle {
            memory_score: memory,
            edge_score: edge,
            entropy,
            ..Default::default()
        }
    }

    fn evaluated(notation: &str, metrics: MetricBundle) -> EvaluatedCandidate {
        EvaluatedCandidate {
            rule: notation.parse().unwrap(),
            source: CandidateSource::Random,
            metrics,
        }
    }

    fn history(composites: &[f64]) -> Vec<MemoryRecord> {
        composites
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let born = (i % 9) as u8;
                let survive = ((i / 9) % 9) as u8;
                let rule = RuleNotation::from_counts(&[born], &[survive]).unwrap();
                let mut r = MemoryRecord::new(rule, "test", DATE);
                r.scores = ScoreSet {
                    memory_score: Some(c),
                    edge_score: Some(c),
                    entropy: Some(c),
                    ..Default::default()
                };
                r
            })
            .collect()
    }

    #[test]
    fn test_percentile_interpolation() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&v, 0.0), Some(1.0));
        assert_eq!(percentile(&v, 100.0), Some(5.0));
        assert_eq!(percentile(&v, 50.0), Some(3.0));
        assert!((percentile(&v, 85.0).unwrap() - 4.4).abs() < 1e-12);
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_fixed_below_min_history() {
        let engine = PromotionEngine::new(PromotionConfig::default());
        let t = engine.compute_thresholds(&history(&[0.1, 0.2, 0.3, 0.4]), &HallOfFame::new(20));
        assert_eq!(t, Thresholds::Fixed);
    }

    #[test]
    fn test_adaptive_threshold() {
        let engine = PromotionEngine::new(PromotionConfig::default());
        let t = engine.compute_thresholds(&history(&[0.1, 0.2, 0.3, 0.4, 0.5]), &HallOfFame::new(20));
        match t {
            Thresholds::Adaptive {
                composite,
                population,
                ..
            } => {
                assert!((composite - 0.44).abs() < 1e-9);
                assert_eq!(population, 5);
            }
            Thresholds::Fixed => panic!("expected adaptive thresholds"),
        }
    }

    #[test]
    fn test_threshold_population_excludes_hof() {
        let memory = history(&[0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.9, 0.9]);
        let mut hof = HallOfFame::new(20);
        for record in &memory[6..] {
            let entry = HallOfFameEntry::from_metrics(
                record.notation,
                &bundle(0.9, 0.9, 0.9),
                Tier::AdaptiveCandidate,
                String::new(),
                "test",
                DATE,
            );
            hof.add(entry);
        }

        let all = PromotionEngine::new(PromotionConfig::default()).compute_thresholds(&memory, &hof);
        let excluded = PromotionEngine::new(PromotionConfig {
            threshold_population: ThresholdPopulation::ExcludeHallOfFame,
            ..Default::default()
        })
        .compute_thresholds(&memory, &hof);

        let value = |t: &Thresholds| match t {
            Thresholds::Adaptive { composite, .. } => *composite,
            Thresholds::Fixed => f64::NAN,
        };
        assert!(value(&all) > value(&excluded));
        assert!((value(&excluded) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_fixed_threshold_promotion() {
        let engine = PromotionEngine::new(PromotionConfig {
            adaptive_thresholds: false,
            fixed_thresholds: FixedThresholds::default(),
            ..Default::default()
        });
        let mut hof = HallOfFame::new(20);
        let batch = vec![
            evaluated("B3/S23", bundle(0.8, 0.3, 0.4)),
            evaluated("B5678/S45678", bundle(0.8, 0.1, 0.4)),
        ];
        let out = engine.promote(&batch, &Thresholds::Fixed, &mut hof, DATE).unwrap();
        assert_eq!(out.promoted, vec![RuleNotation::life()]);
        assert_eq!(out.bootstrapped, None);
        assert_eq!(hof.entries()[0].tier, Tier::FixedThreshold);
        assert_eq!(out.decisions[1].1, Decision::BelowThreshold);
    }

    #[test]
    fn test_functional_bypass() {
        let engine = PromotionEngine::new(PromotionConfig::default());
        let thresholds = Thresholds::Adaptive {
            composite: 0.9,
            metrics: BTreeMap::new(),
            population: 10,
        };
        let mut metrics = bundle(0.2, 0.2, 0.2);
        metrics.functional_score = 0.35;
        let mut hof = HallOfFame::new(20);
        let out = engine
            .promote(&[evaluated("B3/S23", metrics)], &thresholds, &mut hof, DATE)
            .unwrap();
        assert_eq!(out.promoted.len(), 1);
        assert!(hof.entries()[0].promotion_reason.starts_with("functional bypass"));
    }

    #[test]
    fn test_floors_block_promotion() {
        let engine = PromotionEngine::new(PromotionConfig::default());
        let thresholds = Thresholds::Adaptive {
            composite: 0.0,
            metrics: BTreeMap::new(),
            population: 10,
        };
        // Edge below its 0.05 floor.
        let mut hof = HallOfFame::new(20);
        hof.add(HallOfFameEntry::from_metrics(
            "B1/S1".parse().unwrap(),
            &bundle(0.5, 0.5, 0.5),
            Tier::Validated,
            String::new(),
            "test",
            DATE,
        ));
        let out = engine
            .promote(&[evaluated("B3/S23", bundle(0.9, 0.01, 0.9))], &thresholds, &mut hof, DATE)
            .unwrap();
        assert!(out.promoted.is_empty());
        assert_eq!(out.decisions[0].1, Decision::BelowThreshold);
    }

    #[test]
    fn test_quota_and_diversity() {
        let mut config = PromotionConfig::default();
        config.profile_quotas.insert(ModuleProfile::Generic, 1);
        let engine = PromotionEngine::new(config);
        let thresholds = Thresholds::Adaptive {
            composite: 0.0,
            metrics: BTreeMap::new(),
            population: 10,
        };

        let mut hof = HallOfFame::new(20);
        let batch = vec![
            evaluated("B3/S23", bundle(0.4, 0.4, 0.4)),
            evaluated("B36/S23", bundle(0.4, 0.4, 0.4)),
        ];
        let out = engine.promote(&batch, &thresholds, &mut hof, DATE).unwrap();
        assert_eq!(out.promoted, vec![RuleNotation::life()]);
        assert!(matches!(out.decisions[1].1, Decision::QuotaFull { quota: 1, .. }));

        let mut config = PromotionConfig::default();
        config.profile_quotas.clear();
        let engine = PromotionEngine::new(config);
        let mut hof = HallOfFame::new(20);
        let out = engine.promote(&batch, &thresholds, &mut hof, DATE).unwrap();
        assert!(matches!(
            out.decisions[1].1,
            Decision::TooSimilar { distance: 1, .. }
        ));
        assert_eq!(hof.len(), 1);
    }

    #[test]
    fn test_diversity_invariant_holds() {
        let engine = PromotionEngine::new(PromotionConfig {
            profile_quotas: BTreeMap::new(),
            ..Default::default()
        });
        let thresholds = Thresholds::Adaptive {
            composite: 0.0,
            metrics: BTreeMap::new(),
            population: 10,
        };
        let mut hof = HallOfFame::new(20);
        let batch: Vec<_> = RuleNotation::life()
            .neighbors()
            .into_iter()
            .chain(std::iter::once(RuleNotation::life()))
            .map(|r| EvaluatedCandidate {
                rule: r,
                source: CandidateSource::Mutation,
                metrics: bundle(0.4, 0.4, 0.4),
            })
            .collect();
        engine.promote(&batch, &thresholds, &mut hof, DATE).unwrap();

        let entries = hof.entries();
        for (i, a) in entries.iter().enumerate() {
            for b in &entries[i + 1..] {
                assert!(a.notation.distance(&b.notation) >= 2);
            }
        }
    }

    #[test]
    fn test_bootstrap_law() {
        let engine = PromotionEngine::new(PromotionConfig::default());
        let mut hof = HallOfFame::new(20);
        let mut trivial = bundle(0.0, 0.0, 0.0);
        trivial.trivial = true;
        let batch = vec![
            evaluated("B/S", trivial),
            evaluated("B3/S23", bundle(0.1, 0.1, 0.1)),
        ];
        let out = engine.promote(&batch, &Thresholds::Fixed, &mut hof, DATE).unwrap();
        assert!(out.promoted.is_empty());
        assert_eq!(out.bootstrapped, Some(RuleNotation::life()));
        assert_eq!(hof.len(), 1);
        assert_eq!(hof.entries()[0].tier, Tier::Bootstrap);
        assert!(hof.entries()[0].tags.contains("bootstrap"));

        // Never bootstraps from nothing, nor into a non-empty archive.
        let mut empty = HallOfFame::new(20);
        assert_eq!(engine.bootstrap(&[], &mut empty, DATE), None);
        assert_eq!(engine.bootstrap(&batch, &mut hof, DATE), None);
    }

    #[test]
    fn test_pareto_policy() {
        let engine = PromotionEngine::new(PromotionConfig {
            policy: PromotionPolicy::Pareto,
            ..Default::default()
        });
        let mut hof = HallOfFame::new(20);
        let mut strong = bundle(0.9, 0.9, 0.9);
        strong.functional_score = 0.9;
        let batch = vec![
            evaluated("B3/S23", strong),
            evaluated("B5678/S1", bundle(0.1, 0.1, 0.1)),
        ];
        let out = engine.promote(&batch, &Thresholds::Fixed, &mut hof, DATE).unwrap();
        assert_eq!(out.promoted, vec![RuleNotation::life()]);
        assert_eq!(out.bootstrapped, None);
        assert_eq!(hof.entries()[0].tier, Tier::Pareto);
    }
}
