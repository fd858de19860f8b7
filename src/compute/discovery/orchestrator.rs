//! One discovery iteration, end to end.

use std::collections::BTreeSet;

use chrono::Utc;

use super::bandit::StrategyBandit;
use super::generator::{Candidate, CandidateGenerator};
use super::memory::{
    ExplorationLog, LABEL_ERROR, LogResult, MemoryStore, RejectedRule, evaluation_labels,
};
use super::meta_model::MetaScorer;
use super::pareto::ParetoError;
use super::promotion::{EvaluatedCandidate, PromotionEngine};
use super::store::{Repository, StoreError};
use crate::compute::{EvaluationError, EvaluationSettings, Evaluator, HardFilter};
use crate::schema::{DiscoveryConfig, DiscoveryConfigError, IterationSummary, MetricBundle};

/// Errors that abort an iteration.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] DiscoveryConfigError),
    #[error("Persistence failed: {0}")]
    Store(#[from] StoreError),
    #[error("Pareto promotion failed: {0}")]
    Pareto(#[from] ParetoError),
}

/// Drives the discovery loop over a repository and an evaluator.
pub struct DiscoveryLoop<E: Evaluator> {
    config: DiscoveryConfig,
    repo: Box<dyn Repository>,
    evaluator: E,
    store: MemoryStore,
    bandit: StrategyBandit,
    filter: HardFilter,
    promotion: PromotionEngine,
}

impl<E: Evaluator> DiscoveryLoop<E> {
    /// Validate the configuration and restore bandit state.
    pub fn new(
        config: DiscoveryConfig,
        repo: Box<dyn Repository>,
        evaluator: E,
    ) -> Result<Self, DiscoveryError> {
        config.validate()?;
        let bandit = StrategyBandit::load(&config.bandit, repo.as_ref(), &config.storage.bandit_key)?;
        Ok(Self {
            store: MemoryStore::new(config.storage.clone(), config.hof_max_size),
            filter: HardFilter::new(config.hard_filter.clone()),
            promotion: PromotionEngine::new(config.promotion.clone()),
            bandit,
            config,
            repo,
            evaluator,
        })
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn bandit(&self) -> &StrategyBandit {
        &self.bandit
    }

    pub fn repository(&self) -> &dyn Repository {
        self.repo.as_ref()
    }

    /// Run `iterations` iterations, stopping at the first fatal error.
    pub fn run(&mut self, iterations: usize) -> Result<Vec<IterationSummary>, DiscoveryError> {
        (0..iterations).map(|_| self.run_iteration()).collect()
    }

    /// aggregate, train, choose strategy, generate, filter, evaluate,
    /// promote, persist, reward.
    pub fn run_iteration(&mut self) -> Result<IterationSummary, DiscoveryError> {
        let date = Utc::now().format("%Y-%m-%d").to_string();

        self.store.aggregate(self.repo.as_ref())?;
        let iteration = self.store.next_iteration(self.repo.as_ref())?;
        let seed = self.config.evaluation_seed.wrapping_add(iteration as u64);

        // Promise scorer
        let mut scorer = MetaScorer::new(self.config.meta_model.clone(), seed);
        let meta_model_accuracy = match scorer.train(self.store.records()) {
            Ok(stats) => stats.test_accuracy,
            Err(e) => {
                log::info!("{e}; scoring candidates neutrally");
                0.0
            }
        };

        let strategy = match self.config.search.strategy.fixed() {
            Some(strategy) => strategy,
            None => self.bandit.select(),
        };
        log::info!("iteration {iteration}: strategy {strategy}");

        let mut generator = CandidateGenerator::new(self.config.search.clone(), seed);
        let candidates = generator.generate(strategy, self.store.records(), &scorer);
        let candidates_tested = candidates.len();

        let mut log = ExplorationLog::new(iteration, strategy);

        // Hard filter
        let mut survivors: Vec<Candidate> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let verdict = self.filter.screen(&candidate.rule);
            if verdict.passed() {
                survivors.push(candidate);
            } else {
                log.rejected.push(RejectedRule {
                    notation: candidate.rule,
                    source: candidate.source,
                    verdict,
                });
            }
        }
        let filtered_out = log.rejected.len();

        // Thresholds see memory as it was before this batch.
        let thresholds = self
            .promotion
            .compute_thresholds(self.store.records(), self.store.hall_of_fame());

        // Evaluation
        let settings = EvaluationSettings::from_config(&self.config.evaluation, self.config.evaluation_seed);
        let outcomes: Vec<(Candidate, Result<MetricBundle, EvaluationError>)> = survivors
            .into_iter()
            .map(|c| {
                let result = self.evaluator.evaluate(&c.rule, &settings);
                (c, result)
            })
            .collect();

        let evaluated: Vec<EvaluatedCandidate> = outcomes
            .iter()
            .filter_map(|(c, result)| {
                result.as_ref().ok().map(|metrics| EvaluatedCandidate {
                    rule: c.rule,
                    source: c.source,
                    metrics: metrics.clone(),
                })
            })
            .collect();
        let evaluation_failures = outcomes.len() - evaluated.len();

        // Promotion
        let outcome = self.promotion.promote(
            &evaluated,
            &thresholds,
            self.store.hall_of_fame_mut(),
            &date,
        )?;

        // Record
        for (candidate, result) in &outcomes {
            match result {
                Ok(metrics) => {
                    self.store
                        .record_evaluation(candidate.rule, candidate.source, metrics, &date);
                }
                Err(e) => {
                    log::warn!("evaluation of {} failed: {e}", candidate.rule);
                    self.store.record_failure(candidate.rule, candidate.source, &date);
                }
            }
        }
        self.store.release_from_hall_of_fame(&outcome.removed);
        self.store.mirror_hall_of_fame();

        // Logs carry what this evaluation found; archive labels live in the HoF.
        for (candidate, result) in outcomes {
            let (scores, labels, error) = match result {
                Ok(metrics) => (metrics.to_scores(), evaluation_labels(&metrics), None),
                Err(e) => (
                    Default::default(),
                    BTreeSet::from([LABEL_ERROR.to_string()]),
                    Some(e.to_string()),
                ),
            };
            log.results.push(LogResult {
                notation: candidate.rule,
                source: candidate.source,
                predicted_score: candidate.predicted_score,
                scores,
                labels,
                error,
            });
        }

        // Persist
        self.store.save(self.repo.as_mut())?;
        let log_location = self.store.write_log(self.repo.as_mut(), &log)?;

        let bootstrapped = usize::from(outcome.bootstrapped.is_some());
        let mean_composite = if evaluated.is_empty() {
            0.0
        } else {
            evaluated.iter().map(|c| c.metrics.composite()).sum::<f64>() / evaluated.len() as f64
        };
        let reward = (outcome.promoted.len() + bootstrapped) as f64 + mean_composite;
        self.bandit.update_and_save(
            strategy,
            reward,
            self.repo.as_mut(),
            &self.config.storage.bandit_key,
        )?;

        let summary = IterationSummary {
            candidates_tested,
            results_obtained: evaluated.len(),
            new_rules_added: outcome.promoted.len(),
            bootstrapped,
            total_memory_rules: self.store.len(),
            total_hof_rules: self.store.hall_of_fame().len(),
            strategy_used: strategy,
            meta_model_accuracy,
            log_location,
            filtered_out,
            evaluation_failures,
            removed_rules: outcome.removed.len(),
        };

        log::info!(
            "iteration {iteration} done: {} tested, {} filtered, {} evaluated, {} failed, {} promoted{}, \
             Hall of Fame {} / memory {}, reward {reward:.3}",
            summary.candidates_tested,
            summary.filtered_out,
            summary.results_obtained,
            summary.evaluation_failures,
            summary.new_rules_added,
            if bootstrapped > 0 { " (+bootstrap)" } else { "" },
            summary.total_hof_rules,
            summary.total_memory_rules,
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::LifeEvaluator;
    use crate::compute::discovery::store::{InMemoryRepository, JsonFileRepository};
    use std::cell::Cell;
    use std::io;
    use std::rc::Rc;

    use serde_json::Value;

    use crate::compute::discovery::HallOfFame;
    use crate::compute::discovery::store::save_typed;
    use crate::schema::{
        HallOfFameEntry, PromotionPolicy, RuleNotation, ScoreSet, Strategy, StrategyChoice, Tier,
    };

    /// In-memory repository whose writes can be switched off.
    struct FlakyRepository {
        inner: InMemoryRepository,
        fail_saves: Rc<Cell<bool>>,
    }

    impl Repository for FlakyRepository {
        fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
            self.inner.load(key)
        }

        fn save(&mut self, key: &str, value: &Value) -> Result<(), StoreError> {
            if self.fail_saves.get() {
                return Err(StoreError::Io {
                    path: key.into(),
                    source: io::Error::other("disk full"),
                });
            }
            self.inner.save(key, value)
        }

        fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.inner.keys(prefix)
        }

        fn location(&self, key: &str) -> String {
            self.inner.location(key)
        }
    }

    /// Deterministic metrics derived from the rule's shape.
    struct ShapeEvaluator;

    impl Evaluator for ShapeEvaluator {
        fn evaluate(
            &self,
            rule: &RuleNotation,
            _settings: &EvaluationSettings,
        ) -> Result<MetricBundle, EvaluationError> {
            let b = rule.born.len() as f64 / 9.0;
            let s = rule.survive.len() as f64 / 9.0;
            Ok(MetricBundle {
                memory_score: s,
                edge_score: 1.0 - b,
                entropy: (b + s) / 2.0,
                functional_score: s * (1.0 - b),
                final_density: 0.3,
                ..Default::default()
            })
        }
    }

    struct FailingEvaluator;

    impl Evaluator for FailingEvaluator {
        fn evaluate(
            &self,
            rule: &RuleNotation,
            _settings: &EvaluationSettings,
        ) -> Result<MetricBundle, EvaluationError> {
            Err(EvaluationError::Failed {
                rule: *rule,
                reason: "simulated crash".to_string(),
            })
        }
    }

    fn small_config(strategy: StrategyChoice, batch_size: usize) -> DiscoveryConfig {
        let mut config = DiscoveryConfig::default();
        config.search.pool_size = 40;
        config.search.batch_size = batch_size;
        config.search.strategy = strategy;
        config.evaluation.grid_size = 16;
        config.evaluation.steps = 40;
        config.evaluation.seeds = 2;
        config.hard_filter.grid_size = 16;
        config.hard_filter.steps = 30;
        config
    }

    #[test]
    fn test_first_iteration_scenario() {
        let config = small_config(StrategyChoice::Random, 4);
        let mut discovery =
            DiscoveryLoop::new(config, Box::new(InMemoryRepository::new()), LifeEvaluator::new())
                .unwrap();
        let summary = discovery.run_iteration().unwrap();

        assert_eq!(summary.candidates_tested, 4);
        assert!(summary.results_obtained <= 4);
        assert_eq!(summary.results_obtained + summary.filtered_out, 4);
        assert_eq!(summary.evaluation_failures, 0);
        if summary.results_obtained >= 1 {
            assert!(summary.total_hof_rules >= 1);
        }
        assert_eq!(summary.total_memory_rules, summary.results_obtained);
        assert_eq!(summary.strategy_used, Strategy::Random);
        assert_eq!(summary.meta_model_accuracy, 0.0);
        assert!(summary.log_location.starts_with("memory://scans/iter_0000_"));
    }

    #[test]
    fn test_bootstrap_and_persistence() {
        let mut config = small_config(StrategyChoice::Random, 5);
        config.hard_filter.enabled = false;
        let mut discovery =
            DiscoveryLoop::new(config, Box::new(InMemoryRepository::new()), ShapeEvaluator).unwrap();
        let summary = discovery.run_iteration().unwrap();

        assert_eq!(summary.results_obtained, 5);
        assert!(summary.total_hof_rules >= 1);
        assert_eq!(summary.total_memory_rules, 5);
        assert_eq!(discovery.bandit().arm(Strategy::Random).pulls, 1);

        let repo = discovery.repository();
        assert!(repo.load("meta_memory").unwrap().is_some());
        assert!(repo.load("hof_rules").unwrap().is_some());
        assert!(repo.load("bandit_stats").unwrap().is_some());
        assert_eq!(repo.keys("scans/").unwrap().len(), 1);
    }

    #[test]
    fn test_failures_are_recorded_not_fatal() {
        let mut config = small_config(StrategyChoice::Random, 3);
        config.hard_filter.enabled = false;
        let mut discovery =
            DiscoveryLoop::new(config, Box::new(InMemoryRepository::new()), FailingEvaluator)
                .unwrap();
        let summary = discovery.run_iteration().unwrap();

        assert_eq!(summary.candidates_tested, 3);
        assert_eq!(summary.results_obtained, 0);
        assert_eq!(summary.evaluation_failures, 3);
        assert_eq!(summary.total_hof_rules, 0);
        assert_eq!(summary.bootstrapped, 0);
        assert!(discovery.store().records().iter().all(|r| r.has_label("error")));
    }

    #[test]
    fn test_mixed_iterations_keep_archive_diverse() {
        let mut config = small_config(StrategyChoice::Mixed, 8);
        config.hard_filter.enabled = false;
        config.promotion.adaptive_thresholds = true;
        config.promotion.min_history = 5;
        let diversity = config.promotion.diversity_threshold;
        let mut discovery =
            DiscoveryLoop::new(config, Box::new(InMemoryRepository::new()), ShapeEvaluator).unwrap();
        let summaries = discovery.run(6).unwrap();

        assert_eq!(summaries.len(), 6);
        assert_eq!(discovery.bandit().total_pulls(), 6);
        // Every arm is tried once before any is repeated.
        let first: Vec<_> = summaries.iter().take(5).map(|s| s.strategy_used).collect();
        assert_eq!(first, Strategy::ALL.to_vec());

        let hof = discovery.store().hall_of_fame();
        assert!(hof.len() >= 1);
        assert!(hof.len() <= 20);
        let entries = hof.entries();
        for (i, a) in entries.iter().enumerate() {
            for b in &entries[i + 1..] {
                assert!(a.notation.distance(&b.notation) >= diversity);
            }
        }
        // Memory only grows.
        let totals: Vec<_> = summaries.iter().map(|s| s.total_memory_rules).collect();
        assert!(totals.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_json_repository_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config(StrategyChoice::Random, 4);
        config.hard_filter.enabled = false;
        config.storage.root = dir.path().to_path_buf();

        let first = {
            let repo = JsonFileRepository::new(&config.storage.root);
            let mut discovery =
                DiscoveryLoop::new(config.clone(), Box::new(repo), ShapeEvaluator).unwrap();
            discovery.run_iteration().unwrap()
        };
        assert!(dir.path().join("meta_memory.json").exists());
        assert!(dir.path().join("hof_rules.json").exists());
        assert!(dir.path().join("bandit_stats.json").exists());

        let repo = JsonFileRepository::new(&config.storage.root);
        let mut discovery = DiscoveryLoop::new(config, Box::new(repo), ShapeEvaluator).unwrap();
        assert_eq!(discovery.bandit().total_pulls(), 1);
        let second = discovery.run_iteration().unwrap();
        assert!(second.total_memory_rules >= first.total_memory_rules);
        assert!(second.log_location.contains("iter_0001_"));
        assert!(second.total_hof_rules >= 1);
    }

    #[test]
    fn test_log_results_carry_evaluation_labels_only() {
        let mut config = small_config(StrategyChoice::Random, 5);
        config.hard_filter.enabled = false;
        let mut discovery =
            DiscoveryLoop::new(config, Box::new(InMemoryRepository::new()), ShapeEvaluator).unwrap();
        let summary = discovery.run_iteration().unwrap();
        assert!(summary.total_hof_rules >= 1);

        let repo = discovery.repository();
        let keys = repo.keys("scans/").unwrap();
        let log: ExplorationLog =
            serde_json::from_value(repo.load(&keys[0]).unwrap().unwrap()).unwrap();
        assert_eq!(log.results.len(), 5);
        for result in &log.results {
            assert!(result.labels.contains("evaluated"));
            assert!(!result.labels.contains("hof"));
            assert!(!result.labels.contains("bootstrap"));
        }
    }

    #[test]
    fn test_store_failure_aborts_iteration() {
        let fail_saves = Rc::new(Cell::new(false));
        let repo = FlakyRepository {
            inner: InMemoryRepository::new(),
            fail_saves: Rc::clone(&fail_saves),
        };
        let mut config = small_config(StrategyChoice::Random, 4);
        config.hard_filter.enabled = false;
        let mut discovery = DiscoveryLoop::new(config, Box::new(repo), ShapeEvaluator).unwrap();
        discovery.run_iteration().unwrap();

        let keys = ["meta_memory", "hof_rules", "bandit_stats"];
        let snapshot: Vec<Option<Value>> = keys
            .iter()
            .map(|k| discovery.repository().load(k).unwrap())
            .collect();
        assert!(snapshot.iter().all(Option::is_some));

        fail_saves.set(true);
        let result = discovery.run_iteration();
        assert!(matches!(result, Err(DiscoveryError::Store(StoreError::Io { .. }))));

        let after: Vec<Option<Value>> = keys
            .iter()
            .map(|k| discovery.repository().load(k).unwrap())
            .collect();
        assert_eq!(after, snapshot);
        assert_eq!(discovery.repository().keys("scans/").unwrap().len(), 1);
    }

    #[test]
    fn test_pareto_without_objectives_aborts_iteration() {
        let mut repo = InMemoryRepository::new();
        let mut entry = HallOfFameEntry::from_metrics(
            RuleNotation::life(),
            &MetricBundle::default(),
            Tier::Bootstrap,
            "bootstrap baseline".to_string(),
            "random",
            "2024-01-01",
        );
        entry.scores = ScoreSet::default();
        let hof = HallOfFame::from_entries(20, vec![entry]);
        save_typed(&mut repo, "hof_rules", &hof.to_document()).unwrap();

        let mut config = small_config(StrategyChoice::Random, 3);
        config.hard_filter.enabled = false;
        config.promotion.policy = PromotionPolicy::Pareto;
        let mut discovery = DiscoveryLoop::new(config, Box::new(repo), FailingEvaluator).unwrap();

        let result = discovery.run_iteration();
        assert!(matches!(result, Err(DiscoveryError::Pareto(_))));
        assert!(discovery.repository().keys("scans/").unwrap().is_empty());
        assert!(discovery.repository().load("bandit_stats").unwrap().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = DiscoveryConfig::default();
        config.search.batch_size = 0;
        let result = DiscoveryLoop::new(config, Box::new(InMemoryRepository::new()), ShapeEvaluator);
        assert!(matches!(result, Err(DiscoveryError::Config(_))));
    }
}
