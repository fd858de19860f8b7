//! Aggregated rule memory and its Hall of Fame mirror.
//!
//! The store merges three sources in priority order: the persisted memory
//! document, the persisted Hall of Fame (each member labelled `hof`, its tier
//! and its tags), then the `results` of every exploration log. Merging is
//! per-metric overwrite plus label union, so aggregating twice without new
//! sources changes nothing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::archive::{HallOfFame, HallOfFameDocument};
use super::generator::CandidateSource;
use super::store::{Repository, StoreError, load_typed, save_typed};
use crate::compute::FilterVerdict;
use crate::schema::{
    HallOfFameEntry, MemoryRecord, MetricBundle, RuleNotation, ScoreSet, StorageConfig, Strategy,
};

/// Label added to every successfully evaluated record.
pub const LABEL_EVALUATED: &str = "evaluated";
/// Label added when evaluation failed.
pub const LABEL_ERROR: &str = "error";
/// Label added to evaluated rules with trivial dynamics.
pub const LABEL_TRIVIAL: &str = "trivial";
/// Label mirrored onto Hall of Fame members.
pub const LABEL_HOF: &str = "hof";

// ============================================================================
// Documents
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMeta {
    pub updated: DateTime<Utc>,
    pub count: usize,
}

/// On-disk form of the memory store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    pub meta: MemoryMeta,
    #[serde(default)]
    pub rules: Vec<MemoryRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMeta {
    pub iteration: usize,
    pub created: DateTime<Utc>,
    pub strategy: Strategy,
}

/// One evaluated (or failed) candidate in an exploration log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogResult {
    pub notation: RuleNotation,
    pub source: CandidateSource,
    pub predicted_score: f64,
    #[serde(default)]
    pub scores: ScoreSet,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A candidate screened out before evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRule {
    pub notation: RuleNotation,
    pub source: CandidateSource,
    pub verdict: FilterVerdict,
}

/// Raw record of one iteration, written under the scans prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationLog {
    pub meta: LogMeta,
    #[serde(default)]
    pub results: Vec<LogResult>,
    /// Kept for audit; never ingested.
    #[serde(default)]
    pub rejected: Vec<RejectedRule>,
}

impl ExplorationLog {
    pub fn new(iteration: usize, strategy: Strategy) -> Self {
        Self {
            meta: LogMeta {
                iteration,
                created: Utc::now(),
                strategy,
            },
            results: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

/// Record counts overall and per label.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MemoryStatistics {
    pub total: usize,
    pub labels: BTreeMap<String, usize>,
}

/// Labels an evaluation contributes on its own: `evaluated`, plus `trivial`.
pub fn evaluation_labels(metrics: &MetricBundle) -> BTreeSet<String> {
    let mut labels = BTreeSet::from([LABEL_EVALUATED.to_string()]);
    if metrics.trivial {
        labels.insert(LABEL_TRIVIAL.to_string());
    }
    labels
}

fn hall_of_fame_labels(entry: &HallOfFameEntry) -> BTreeSet<String> {
    let mut labels = entry.tags.clone();
    labels.insert(LABEL_HOF.to_string());
    labels.insert(entry.tier.name().to_string());
    labels
}

// ============================================================================
// Store
// ============================================================================

/// Owns every memory record and the Hall of Fame.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    storage: StorageConfig,
    records: Vec<MemoryRecord>,
    index: HashMap<RuleNotation, usize>,
    hof: HallOfFame,
}

impl MemoryStore {
    pub fn new(storage: StorageConfig, hof_max_size: usize) -> Self {
        Self {
            storage,
            records: Vec::new(),
            index: HashMap::new(),
            hof: HallOfFame::new(hof_max_size),
        }
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    /// Records in first-seen order.
    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, rule: &RuleNotation) -> Option<&MemoryRecord> {
        self.index.get(rule).map(|&i| &self.records[i])
    }

    pub fn hall_of_fame(&self) -> &HallOfFame {
        &self.hof
    }

    /// Write access for one promotion pass.
    pub fn hall_of_fame_mut(&mut self) -> &mut HallOfFame {
        &mut self.hof
    }

    /// Existing record for `rule`, or a fresh one with the given provenance.
    fn record_mut(&mut self, rule: RuleNotation, source: &str, date: &str) -> &mut MemoryRecord {
        let i = match self.index.get(&rule) {
            Some(&i) => i,
            None => {
                self.records.push(MemoryRecord::new(rule, source, date));
                self.index.insert(rule, self.records.len() - 1);
                self.records.len() - 1
            }
        };
        &mut self.records[i]
    }

    /// Merge one record; metadata of an existing record is left alone.
    fn merge_record(&mut self, record: MemoryRecord) {
        match self.index.get(&record.notation) {
            Some(&i) => self.records[i].enrich(&record.scores, &record.labels),
            None => {
                self.index.insert(record.notation, self.records.len());
                self.records.push(record);
            }
        }
    }

    /// Pull every persisted source into the store.
    pub fn aggregate(&mut self, repo: &dyn Repository) -> Result<(), StoreError> {
        if let Some(doc) = load_typed::<MemoryDocument>(repo, &self.storage.memory_key)? {
            for record in doc.rules {
                self.merge_record(record);
            }
        }

        if let Some(doc) = load_typed::<HallOfFameDocument>(repo, &self.storage.hof_key)? {
            self.hof = HallOfFame::from_document(self.hof.max_size(), doc);
        }
        self.ingest_hall_of_fame();

        let prefix = format!("{}/", self.storage.scans_prefix);
        let mut ingested = 0;
        for key in repo.keys(&prefix)? {
            let log = match load_typed::<ExplorationLog>(repo, &key) {
                Ok(Some(log)) => log,
                Ok(None) => continue,
                Err(StoreError::Json { source, .. }) => {
                    log::warn!("skipping malformed exploration log '{key}': {source}");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let date = log.meta.created.format("%Y-%m-%d").to_string();
            for mut result in log.results {
                // Membership comes from the archive document only.
                result.labels.remove(LABEL_HOF);
                let record = self.record_mut(result.notation, result.source.name(), &date);
                record.enrich(&result.scores, &result.labels);
                ingested += 1;
            }
        }

        log::debug!(
            "aggregated {} records ({} log results, {} Hall of Fame members)",
            self.records.len(),
            ingested,
            self.hof.len()
        );
        Ok(())
    }

    /// Merge archived scores and labels, ranked above persisted memory.
    fn ingest_hall_of_fame(&mut self) {
        let entries = self.hof.entries().to_vec();
        for entry in entries {
            let labels = hall_of_fame_labels(&entry);
            let record = self.record_mut(entry.notation, "hof", &entry.discovered_date);
            record.enrich(&entry.scores, &labels);
        }
    }

    /// Label every Hall of Fame member's record with `hof`, its tier and its tags.
    ///
    /// Scores are left alone so a fresh evaluation is never overwritten by
    /// the values archived at promotion time.
    pub fn mirror_hall_of_fame(&mut self) {
        let entries = self.hof.entries().to_vec();
        for entry in entries {
            let labels = hall_of_fame_labels(&entry);
            let record = self.record_mut(entry.notation, "hof", &entry.discovered_date);
            record.labels.extend(labels);
        }
    }

    /// Drop the `hof` label from rules that left the archive. Tier labels stay.
    pub fn release_from_hall_of_fame(&mut self, rules: &[RuleNotation]) {
        for rule in rules {
            if let Some(&i) = self.index.get(rule) {
                self.records[i].labels.remove(LABEL_HOF);
            }
        }
    }

    /// Store a successful evaluation.
    pub fn record_evaluation(
        &mut self,
        rule: RuleNotation,
        source: CandidateSource,
        metrics: &MetricBundle,
        date: &str,
    ) -> &MemoryRecord {
        let labels = evaluation_labels(metrics);
        let record = self.record_mut(rule, source.name(), date);
        record.enrich(&metrics.to_scores(), &labels);
        record.metadata.times_evaluated += 1;
        record.metadata.last_seen = Some(Utc::now());
        record
    }

    /// Note a failed evaluation.
    pub fn record_failure(&mut self, rule: RuleNotation, source: CandidateSource, date: &str) {
        let record = self.record_mut(rule, source.name(), date);
        record.labels.insert(LABEL_ERROR.to_string());
        record.metadata.times_evaluated += 1;
        record.metadata.last_seen = Some(Utc::now());
    }

    pub fn to_document(&self) -> MemoryDocument {
        MemoryDocument {
            meta: MemoryMeta {
                updated: Utc::now(),
                count: self.records.len(),
            },
            rules: self.records.clone(),
        }
    }

    /// Persist memory and the Hall of Fame.
    pub fn save(&self, repo: &mut dyn Repository) -> Result<(), StoreError> {
        save_typed(repo, &self.storage.memory_key, &self.to_document())?;
        save_typed(repo, &self.storage.hof_key, &self.hof.to_document())?;
        log::debug!(
            "saved {} records and {} Hall of Fame members",
            self.records.len(),
            self.hof.len()
        );
        Ok(())
    }

    /// Index of the next iteration, from the logs already written.
    pub fn next_iteration(&self, repo: &dyn Repository) -> Result<usize, StoreError> {
        Ok(repo.keys(&format!("{}/", self.storage.scans_prefix))?.len())
    }

    /// Write an exploration log; returns its location.
    pub fn write_log(
        &self,
        repo: &mut dyn Repository,
        log: &ExplorationLog,
    ) -> Result<String, StoreError> {
        let key = format!(
            "{}/iter_{:04}_{}",
            self.storage.scans_prefix,
            log.meta.iteration,
            log.meta.created.format("%Y%m%d_%H%M%S")
        );
        save_typed(repo, &key, log)?;
        Ok(repo.location(&key))
    }

    pub fn statistics(&self) -> MemoryStatistics {
        let mut labels = BTreeMap::new();
        for record in &self.records {
            for label in &record.labels {
                *labels.entry(label.clone()).or_insert(0) += 1;
            }
        }
        MemoryStatistics {
            total: self.records.len(),
            labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::discovery::store::InMemoryRepository;
    use crate::schema::Tier;

    const DATE: &str = "2024-01-01";

    fn store() -> MemoryStore {
        MemoryStore::new(StorageConfig::default(), 20)
    }

    fn metrics(memory: f64) -> MetricBundle {
        MetricBundle {
            memory_score: memory,
            edge_score: 0.2,
            entropy: 0.4,
            ..Default::default()
        }
    }

    fn sample_log(iteration: usize) -> ExplorationLog {
        let mut log = ExplorationLog::new(iteration, Strategy::Random);
        log.results.push(LogResult {
            notation: "B36/S23".parse().unwrap(),
            source: CandidateSource::Random,
            predicted_score: 0.5,
            scores: metrics(0.6).to_scores(),
            labels: [LABEL_EVALUATED.to_string()].into(),
            error: None,
        });
        log.rejected.push(RejectedRule {
            notation: "B/S".parse().unwrap(),
            source: CandidateSource::Random,
            verdict: FilterVerdict {
                mean_density: Some(0.0),
                reason: Some(crate::compute::RejectReason::QuasiDeath),
            },
        });
        log
    }

    #[test]
    fn test_record_evaluation_and_failure() {
        let mut store = store();
        let life = RuleNotation::life();
        store.record_evaluation(life, CandidateSource::Random, &metrics(0.5), DATE);
        store.record_evaluation(life, CandidateSource::Mutation, &metrics(0.7), DATE);
        store.record_failure("B2/S".parse().unwrap(), CandidateSource::Random, DATE);

        let record = store.get(&life).unwrap();
        assert_eq!(record.metadata.times_evaluated, 2);
        assert_eq!(record.metadata.source, "random");
        assert_eq!(record.scores.memory_score, Some(0.7));
        assert!(record.has_label(LABEL_EVALUATED));
        assert!(record.metadata.last_seen.is_some());

        let failed = store.get(&"B2/S".parse().unwrap()).unwrap();
        assert!(failed.has_label(LABEL_ERROR));
        assert!(failed.scores.is_empty());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_save_and_aggregate_roundtrip() {
        let mut repo = InMemoryRepository::new();
        let mut store = store();
        store.record_evaluation(RuleNotation::life(), CandidateSource::Random, &metrics(0.5), DATE);
        store.hall_of_fame_mut().add(
            HallOfFameEntry::from_metrics(
                RuleNotation::life(),
                &metrics(0.5),
                Tier::Bootstrap,
                "bootstrap baseline".to_string(),
                "random",
                DATE,
            )
            .with_tags(["bootstrap"]),
        );
        store.save(&mut repo).unwrap();

        let mut restored = MemoryStore::new(StorageConfig::default(), 20);
        restored.aggregate(&repo).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.hall_of_fame().len(), 1);
        let record = restored.get(&RuleNotation::life()).unwrap();
        assert_eq!(record.metadata.times_evaluated, 1);
        assert!(record.has_label(LABEL_HOF));
        assert!(record.has_label("bootstrap"));
    }

    #[test]
    fn test_aggregate_ingests_results_not_rejected() {
        let mut repo = InMemoryRepository::new();
        let store = store();
        store.write_log(&mut repo, &sample_log(0)).unwrap();

        let mut fresh = MemoryStore::new(StorageConfig::default(), 20);
        fresh.aggregate(&repo).unwrap();
        assert_eq!(fresh.len(), 1);
        let record = fresh.get(&"B36/S23".parse().unwrap()).unwrap();
        assert_eq!(record.scores.memory_score, Some(0.6));
        assert_eq!(record.metadata.source, "random");
        assert!(fresh.get(&"B/S".parse().unwrap()).is_none());
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let mut repo = InMemoryRepository::new();
        let mut store = store();
        store.record_evaluation(RuleNotation::life(), CandidateSource::Random, &metrics(0.5), DATE);
        store.save(&mut repo).unwrap();
        store.write_log(&mut repo, &sample_log(0)).unwrap();

        let mut agg = MemoryStore::new(StorageConfig::default(), 20);
        agg.aggregate(&repo).unwrap();
        let first = agg.records().to_vec();
        agg.aggregate(&repo).unwrap();
        assert_eq!(agg.records(), first.as_slice());
    }

    #[test]
    fn test_malformed_log_skipped() {
        let mut repo = InMemoryRepository::new();
        repo.save("scans/iter_0000_bad", &serde_json::json!({"nope": true}))
            .unwrap();
        let mut agg = store();
        agg.aggregate(&repo).unwrap();
        assert!(agg.is_empty());
        assert_eq!(agg.next_iteration(&repo).unwrap(), 1);
    }

    fn archived(rule: RuleNotation, memory: f64) -> HallOfFameEntry {
        HallOfFameEntry::from_metrics(
            rule,
            &metrics(memory),
            Tier::Bootstrap,
            "bootstrap baseline".to_string(),
            "random",
            DATE,
        )
    }

    #[test]
    fn test_evicted_member_stays_released_after_aggregate() {
        let mut repo = InMemoryRepository::new();
        let mut store = store();
        let rule: RuleNotation = "B3/S23".parse().unwrap();
        store.record_evaluation(rule, CandidateSource::Random, &metrics(0.5), DATE);
        store.hall_of_fame_mut().add(archived(rule, 0.5));
        store.mirror_hall_of_fame();

        // A log written while the rule was archived.
        let mut log = ExplorationLog::new(0, Strategy::Random);
        log.results.push(LogResult {
            notation: rule,
            source: CandidateSource::Random,
            predicted_score: 0.5,
            scores: metrics(0.5).to_scores(),
            labels: store.get(&rule).unwrap().labels.clone(),
            error: None,
        });
        store.write_log(&mut repo, &log).unwrap();

        store.hall_of_fame_mut().remove(&rule);
        store.release_from_hall_of_fame(&[rule]);
        store.save(&mut repo).unwrap();

        let mut restored = MemoryStore::new(StorageConfig::default(), 20);
        restored.aggregate(&repo).unwrap();
        let record = restored.get(&rule).unwrap();
        assert!(!restored.hall_of_fame().contains(&rule));
        assert!(!record.has_label(LABEL_HOF));
        assert!(record.has_label(LABEL_EVALUATED));
    }

    #[test]
    fn test_mirror_keeps_fresh_scores() {
        let mut store = store();
        let rule = RuleNotation::life();
        store.record_evaluation(rule, CandidateSource::Random, &metrics(0.9), DATE);
        store.hall_of_fame_mut().add(archived(rule, 0.9));
        store.record_evaluation(rule, CandidateSource::Mutation, &metrics(0.1), DATE);
        store.mirror_hall_of_fame();

        let record = store.get(&rule).unwrap();
        assert_eq!(record.scores.memory_score, Some(0.1));
        assert!(record.has_label(LABEL_HOF));
        assert!(record.has_label("bootstrap"));
    }

    #[test]
    fn test_evaluation_labels() {
        let mut trivial = metrics(0.0);
        assert_eq!(evaluation_labels(&trivial).len(), 1);
        trivial.trivial = true;
        let labels = evaluation_labels(&trivial);
        assert!(labels.contains(LABEL_EVALUATED));
        assert!(labels.contains(LABEL_TRIVIAL));
    }

    #[test]
    fn test_statistics() {
        let mut store = store();
        store.record_evaluation(RuleNotation::life(), CandidateSource::Random, &metrics(0.5), DATE);
        let mut trivial = metrics(0.0);
        trivial.trivial = true;
        store.record_evaluation("B/S".parse().unwrap(), CandidateSource::Random, &trivial, DATE);
        store.record_failure("B2/S".parse().unwrap(), CandidateSource::Random, DATE);

        let stats = store.statistics();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.labels[LABEL_EVALUATED], 2);
        assert_eq!(stats.labels[LABEL_TRIVIAL], 1);
        assert_eq!(stats.labels[LABEL_ERROR], 1);
    }
}
