//! Candidate pool construction and per-strategy batch selection.

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::prelude::*;
use rand::seq::index;
use serde::{Deserialize, Serialize};

use super::meta_model::MetaScorer;
use crate::schema::{MemoryRecord, NeighborSet, RuleNotation, SearchConfig, Strategy};

/// Curated neighborhood of Life used by the stable-bias arm.
const STABLE_CURATED: [(&[u8], &[u8]); 10] = [
    (&[3], &[2, 3]),
    (&[2, 3], &[2, 3]),
    (&[3], &[2]),
    (&[3], &[3]),
    (&[1, 3], &[2, 3]),
    (&[2, 3], &[3]),
    (&[3], &[1, 2, 3]),
    (&[3], &[2, 3, 4]),
    (&[0, 3], &[2, 3]),
    (&[1, 2], &[2, 3]),
];

/// Random draws allowed per requested candidate before giving up.
const MAX_DRAWS_PER_SLOT: usize = 50;

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateSource {
    /// Distance-1 mutation of a known rule, untrained scorer.
    Mutation,
    /// Uniform random fill.
    Random,
    /// Curated or constrained stable-bias draw.
    StableBias,
    /// Mutation of a known rule scored by a trained scorer.
    MetaModel,
}

impl CandidateSource {
    pub fn name(self) -> &'static str {
        match self {
            CandidateSource::Mutation => "mutation",
            CandidateSource::Random => "random",
            CandidateSource::StableBias => "stable-bias",
            CandidateSource::MetaModel => "meta-model",
        }
    }
}

/// A proposed rule for this iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub rule: RuleNotation,
    pub source: CandidateSource,
    pub predicted_score: f64,
    pub penalty_adjusted_score: f64,
}

/// Builds candidate batches from memory, the scorer and a seeded RNG.
#[derive(Debug)]
pub struct CandidateGenerator {
    config: SearchConfig,
    rng: StdRng,
}

impl CandidateGenerator {
    pub fn new(config: SearchConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Full batch for `strategy`.
    pub fn generate(
        &mut self,
        strategy: Strategy,
        memory: &[MemoryRecord],
        scorer: &MetaScorer,
    ) -> Vec<Candidate> {
        let batch_size = self.config.batch_size;
        if strategy == Strategy::StableBias {
            return self.stable_bias(memory, batch_size);
        }
        let pool = self.build_pool(memory, scorer);
        self.select_batch(pool, strategy, batch_size)
    }

    fn penalized(&self, score: f64, times_evaluated: u32) -> f64 {
        score * self.config.reevaluation_penalty.powi(times_evaluated as i32)
    }

    /// Mutation neighborhoods of known rules, then random fill, up to `pool_size`.
    pub fn build_pool(&mut self, memory: &[MemoryRecord], scorer: &MetaScorer) -> Vec<Candidate> {
        let pool_size = self.config.pool_size;
        let times = evaluation_counts(memory);

        let mut base: Vec<&MemoryRecord> = memory.iter().collect();
        base.sort_by_key(|r| r.metadata.times_evaluated);

        let mutation_source = if scorer.is_trained() {
            CandidateSource::MetaModel
        } else {
            CandidateSource::Mutation
        };

        let mut pool = Vec::with_capacity(pool_size);
        let mut seen = HashSet::new();

        'outer: for record in base {
            for rule in record.notation.neighbors() {
                if pool.len() >= pool_size {
                    break 'outer;
                }
                if !seen.insert(rule) {
                    continue;
                }
                let predicted = scorer.predict_proba(&rule);
                let k = times.get(&rule).copied().unwrap_or(0);
                pool.push(Candidate {
                    rule,
                    source: mutation_source,
                    predicted_score: predicted,
                    penalty_adjusted_score: self.penalized(predicted, k),
                });
            }
        }

        let mut draws = 0;
        while pool.len() < pool_size && draws < pool_size * MAX_DRAWS_PER_SLOT {
            draws += 1;
            let born = random_set(&mut self.rng, 1..=4, 9);
            let survive = random_set(&mut self.rng, 1..=4, 9);
            let rule = RuleNotation::new(born, survive);
            if !seen.insert(rule) {
                continue;
            }
            let predicted = scorer.predict_proba(&rule);
            let k = times.get(&rule).copied().unwrap_or(0);
            pool.push(Candidate {
                rule,
                source: CandidateSource::Random,
                predicted_score: predicted,
                penalty_adjusted_score: self.penalized(predicted, k),
            });
        }

        pool
    }

    /// Curated Life neighborhood first, then constrained random draws.
    ///
    /// Born sets hold one or two values from {0,1,2,3}; survive sets contain
    /// 2 or 3 plus up to two extras from 0..5. Candidates are ordered by
    /// penalized prior so heavily re-tested rules sink.
    pub fn stable_bias(&mut self, memory: &[MemoryRecord], count: usize) -> Vec<Candidate> {
        let times = evaluation_counts(memory);
        let target = self.config.pool_size.max(count);
        let mut out = Vec::with_capacity(target);
        let mut seen = HashSet::new();

        let mut push = |rule: RuleNotation, prior: f64, out: &mut Vec<Candidate>| {
            if seen.insert(rule) {
                let k = times.get(&rule).copied().unwrap_or(0);
                out.push(Candidate {
                    rule,
                    source: CandidateSource::StableBias,
                    predicted_score: prior,
                    penalty_adjusted_score: prior
                        * self.config.reevaluation_penalty.powi(k as i32),
                });
            }
        };

        for (born, survive) in STABLE_CURATED {
            if out.len() >= target {
                break;
            }
            if let Ok(rule) = RuleNotation::from_counts(born, survive) {
                push(rule, self.config.stable_prior, &mut out);
            }
        }

        let mut draws = 0;
        while out.len() < target && draws < target * MAX_DRAWS_PER_SLOT {
            draws += 1;
            let born_size = self.rng.gen_range(1..=2);
            let mut born = NeighborSet::empty();
            for i in index::sample(&mut self.rng, 4, born_size) {
                born.insert(i as u8);
            }

            let anchor: u8 = if self.rng.gen_bool(0.5) { 2 } else { 3 };
            let mut survive = NeighborSet::empty();
            survive.insert(anchor);
            let others: Vec<u8> = (0..5).filter(|&v| v != anchor).collect();
            let extras = self.rng.gen_range(0..=2);
            for &v in others.choose_multiple(&mut self.rng, extras) {
                survive.insert(v);
            }

            push(RuleNotation::new(born, survive), self.config.stable_fill_prior, &mut out);
        }

        // Stable sort keeps curated order among equal scores.
        out.sort_by(|a, b| b.penalty_adjusted_score.total_cmp(&a.penalty_adjusted_score));
        out.truncate(count);
        out
    }

    /// Pick `batch_size` candidates from the pool according to `strategy`.
    pub fn select_batch(
        &mut self,
        mut pool: Vec<Candidate>,
        strategy: Strategy,
        batch_size: usize,
    ) -> Vec<Candidate> {
        let selected = match strategy {
            Strategy::Exploitation | Strategy::StableBias => {
                pool.sort_by(|a, b| b.penalty_adjusted_score.total_cmp(&a.penalty_adjusted_score));
                pool
            }
            Strategy::Curiosity => {
                pool.sort_by(|a, b| {
                    let da = (a.penalty_adjusted_score - 0.5).abs();
                    let db = (b.penalty_adjusted_score - 0.5).abs();
                    da.total_cmp(&db)
                });
                pool
            }
            Strategy::Diversity => diversity_round_robin(pool, batch_size),
            Strategy::Random => {
                let k = batch_size.min(pool.len());
                index::sample(&mut self.rng, pool.len(), k)
                    .into_iter()
                    .map(|i| pool[i].clone())
                    .collect()
            }
        };

        let mut seen = HashSet::new();
        selected
            .into_iter()
            .filter(|c| seen.insert(c.rule))
            .take(batch_size)
            .collect()
    }
}

/// Known evaluation count per rule.
fn evaluation_counts(memory: &[MemoryRecord]) -> HashMap<RuleNotation, u32> {
    memory
        .iter()
        .map(|r| (r.notation, r.metadata.times_evaluated))
        .collect()
}

/// Uniformly sized random subset of `0..universe`.
fn random_set(rng: &mut StdRng, sizes: std::ops::RangeInclusive<usize>, universe: usize) -> NeighborSet {
    let size = rng.gen_range(sizes);
    let mut set = NeighborSet::empty();
    for i in index::sample(rng, universe, size) {
        set.insert(i as u8);
    }
    set
}

/// Round-robin over born-set size buckets, smallest bucket first.
fn diversity_round_robin(pool: Vec<Candidate>, batch_size: usize) -> Vec<Candidate> {
    let mut buckets: BTreeMap<usize, std::collections::VecDeque<Candidate>> = BTreeMap::new();
    for candidate in pool {
        buckets
            .entry(candidate.rule.born.len())
            .or_default()
            .push_back(candidate);
    }

    let mut selected = Vec::with_capacity(batch_size);
    while selected.len() < batch_size && !buckets.is_empty() {
        buckets.retain(|_, bucket| !bucket.is_empty());
        for bucket in buckets.values_mut() {
            if let Some(candidate) = bucket.pop_front() {
                selected.push(candidate);
                if selected.len() >= batch_size {
                    break;
                }
            }
        }
        buckets.retain(|_, bucket| !bucket.is_empty());
    }
    selected
}
