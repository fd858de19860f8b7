//! Promise scorer: class-balanced logistic regression over rule features.
//!
//! Trained from scratch every iteration on the aggregated memory. Until
//! enough records exist it stays untrained and scores every rule 0.5.

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use super::features::{FEATURE_COUNT, FeatureVector, extract_features};
use crate::schema::{MemoryRecord, MetaModelConfig, RuleNotation, Tier};

/// Memory score at or above which a record is a positive example.
pub const POSITIVE_MEMORY: f64 = 0.7;
/// Edge score at or above which a record is a positive example.
pub const POSITIVE_EDGE: f64 = 0.35;

/// Whether a memory record counts as a positive training example.
pub fn is_positive(record: &MemoryRecord) -> bool {
    record
        .scores
        .memory_score
        .is_some_and(|m| m >= POSITIVE_MEMORY)
        || record.scores.edge_score.is_some_and(|e| e >= POSITIVE_EDGE)
        || record.labels.iter().any(|l| Tier::is_promotion_label(l))
}

/// Training outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrainStats {
    pub n_samples: usize,
    pub train_accuracy: f64,
    pub test_accuracy: f64,
    pub positives: usize,
    pub negatives: usize,
    /// Whether `test_accuracy` comes from a held-out split.
    pub held_out: bool,
}

/// Scorer training errors. Both are recoverable: the scorer stays neutral.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("Insufficient training data: {have} records, need {need}")]
    InsufficientTrainingData { have: usize, need: usize },
}

/// Fitted model parameters.
#[derive(Debug, Clone)]
struct Fitted {
    mean: FeatureVector,
    scale: FeatureVector,
    weights: FeatureVector,
    bias: f64,
}

impl Fitted {
    fn standardize(&self, x: &FeatureVector) -> FeatureVector {
        let mut z = [0.0; FEATURE_COUNT];
        for i in 0..FEATURE_COUNT {
            z[i] = (x[i] - self.mean[i]) / self.scale[i];
        }
        z
    }

    fn proba(&self, x: &FeatureVector) -> f64 {
        let z = self.standardize(x);
        let logit: f64 = self.bias + z.iter().zip(&self.weights).map(|(a, w)| a * w).sum::<f64>();
        sigmoid(logit)
    }
}

#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Predicts the probability that a rule is worth evaluating.
#[derive(Debug, Clone)]
pub struct MetaScorer {
    config: MetaModelConfig,
    seed: u64,
    fitted: Option<Fitted>,
    stats: Option<TrainStats>,
}

impl MetaScorer {
    pub fn new(config: MetaModelConfig, seed: u64) -> Self {
        Self {
            config,
            seed,
            fitted: None,
            stats: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn stats(&self) -> Option<&TrainStats> {
        self.stats.as_ref()
    }

    /// Probability in `[0, 1]`; 0.5 while untrained.
    pub fn predict_proba(&self, rule: &RuleNotation) -> f64 {
        match &self.fitted {
            Some(fitted) => fitted.proba(&extract_features(rule)).clamp(0.0, 1.0),
            None => 0.5,
        }
    }

    /// Fit on the given records, replacing any previous fit.
    pub fn train(&mut self, records: &[MemoryRecord]) -> Result<TrainStats, TrainError> {
        self.fitted = None;
        self.stats = None;

        let n = records.len();
        if n < self.config.min_samples {
            return Err(TrainError::InsufficientTrainingData {
                have: n,
                need: self.config.min_samples,
            });
        }

        let xs: Vec<FeatureVector> = records.iter().map(|r| extract_features(&r.notation)).collect();
        let ys: Vec<bool> = records.iter().map(is_positive).collect();
        let positives = ys.iter().filter(|&&y| y).count();
        let negatives = n - positives;

        let (train_idx, test_idx, held_out) = self.split(&ys, positives, negatives);

        let fitted = self.fit(&xs, &ys, &train_idx);
        let accuracy = |idx: &[usize]| {
            let correct = idx
                .iter()
                .filter(|&&i| (fitted.proba(&xs[i]) >= 0.5) == ys[i])
                .count();
            correct as f64 / idx.len().max(1) as f64
        };

        let stats = TrainStats {
            n_samples: n,
            train_accuracy: accuracy(&train_idx),
            test_accuracy: accuracy(&test_idx),
            positives,
            negatives,
            held_out,
        };

        log::debug!(
            "meta scorer trained on {n} records ({positives}+/{negatives}-), test accuracy {:.3}",
            stats.test_accuracy
        );

        self.fitted = Some(fitted);
        self.stats = Some(stats.clone());
        Ok(stats)
    }

    /// Stratified held-out split, or train = test = all when too small.
    fn split(
        &self,
        ys: &[bool],
        positives: usize,
        negatives: usize,
    ) -> (Vec<usize>, Vec<usize>, bool) {
        let all: Vec<usize> = (0..ys.len()).collect();
        let fraction = self.config.test_fraction;
        if ys.len() < self.config.holdout_min_samples
            || positives < 2
            || negatives < 2
            || fraction <= 0.0
            || fraction >= 0.5
        {
            return (all.clone(), all, false);
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut train = Vec::new();
        let mut test = Vec::new();
        for class in [true, false] {
            let mut idx: Vec<usize> = all.iter().copied().filter(|&i| ys[i] == class).collect();
            idx.shuffle(&mut rng);
            let n_test = ((idx.len() as f64 * fraction).round() as usize).clamp(1, idx.len() - 1);
            test.extend_from_slice(&idx[..n_test]);
            train.extend_from_slice(&idx[n_test..]);
        }
        train.sort_unstable();
        test.sort_unstable();
        (train, test, true)
    }

    /// Batch gradient descent on class-weighted log loss with L2.
    fn fit(&self, xs: &[FeatureVector], ys: &[bool], idx: &[usize]) -> Fitted {
        let n = idx.len() as f64;

        let mut mean = [0.0; FEATURE_COUNT];
        for &i in idx {
            for (m, x) in mean.iter_mut().zip(&xs[i]) {
                *m += x / n;
            }
        }
        let mut scale = [0.0; FEATURE_COUNT];
        for &i in idx {
            for (j, s) in scale.iter_mut().enumerate() {
                *s += (xs[i][j] - mean[j]).powi(2) / n;
            }
        }
        for s in scale.iter_mut() {
            *s = if *s > 1e-12 { s.sqrt() } else { 1.0 };
        }

        let pos = idx.iter().filter(|&&i| ys[i]).count() as f64;
        let neg = n - pos;
        let class_weight = |y: bool| {
            let count = if y { pos } else { neg };
            if count > 0.0 { n / (2.0 * count) } else { 0.0 }
        };

        let mut fitted = Fitted {
            mean,
            scale,
            weights: [0.0; FEATURE_COUNT],
            bias: 0.0,
        };
        let zs: Vec<FeatureVector> = idx.iter().map(|&i| fitted.standardize(&xs[i])).collect();
        let total_weight: f64 = idx.iter().map(|&i| class_weight(ys[i])).sum();
        let lr = self.config.learning_rate;

        for _ in 0..self.config.epochs {
            let mut grad_w = [0.0; FEATURE_COUNT];
            let mut grad_b = 0.0;
            for (z, &i) in zs.iter().zip(idx) {
                let logit =
                    fitted.bias + z.iter().zip(&fitted.weights).map(|(a, w)| a * w).sum::<f64>();
                let err = class_weight(ys[i]) * (sigmoid(logit) - if ys[i] { 1.0 } else { 0.0 });
                for (g, a) in grad_w.iter_mut().zip(z) {
                    *g += err * a;
                }
                grad_b += err;
            }
            for (w, g) in fitted.weights.iter_mut().zip(&grad_w) {
                *w -= lr * (g / total_weight + self.config.l2 * *w);
            }
            fitted.bias -= lr * grad_b / total_weight;
        }

        fitted
    }
}
