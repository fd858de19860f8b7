//! Structural features of a rule, used by the promise scorer.

use crate::schema::RuleNotation;

pub const FEATURE_COUNT: usize = 11;

/// Feature names in vector order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "born_count",
    "survive_count",
    "born_density",
    "survive_density",
    "total_density",
    "born_survive_overlap",
    "born_range",
    "survive_range",
    "parity_alignment",
    "low_neighbor_bias",
    "high_neighbor_bias",
];

pub type FeatureVector = [f64; FEATURE_COUNT];

/// Fraction of odd values in a non-empty set.
fn odd_fraction(values: &[u8]) -> f64 {
    values.iter().filter(|&&v| v % 2 == 1).count() as f64 / values.len() as f64
}

fn range(values: &[u8]) -> f64 {
    match (values.first(), values.last()) {
        (Some(lo), Some(hi)) => f64::from(hi - lo) / 8.0,
        _ => 0.0,
    }
}

/// Extract the feature vector of a rule. Pure and total.
pub fn extract_features(rule: &RuleNotation) -> FeatureVector {
    let born = rule.born.to_vec();
    let survive = rule.survive.to_vec();
    let b = born.len() as f64;
    let s = survive.len() as f64;

    let parity_alignment = if born.is_empty() || survive.is_empty() {
        0.0
    } else {
        1.0 - (odd_fraction(&born) - odd_fraction(&survive)).abs()
    };

    let low_neighbor_bias = if born.is_empty() {
        0.0
    } else {
        born.iter().filter(|&&v| v <= 2).count() as f64 / b
    };
    let high_neighbor_bias = if survive.is_empty() {
        0.0
    } else {
        survive.iter().filter(|&&v| v >= 5).count() as f64 / s
    };

    [
        b,
        s,
        b / 9.0,
        s / 9.0,
        (b + s) / 18.0,
        rule.born.intersection_len(rule.survive) as f64 / 9.0,
        range(&born),
        range(&survive),
        parity_alignment,
        low_neighbor_bias,
        high_neighbor_bias,
    ]
}
