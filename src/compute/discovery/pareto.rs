//! Pareto-front archive selection.
//!
//! Self-contained alternative to threshold promotion: the archive becomes
//! the non-dominated set of (current members ∪ new candidates), truncated
//! and thinned for diversity.

use std::collections::HashSet;

use crate::schema::{HallOfFameEntry, Metric, ParetoConfig, RuleNotation};

/// Pareto selection errors.
#[derive(Debug, thiserror::Error)]
pub enum ParetoError {
    #[error("Objective '{0}' is not carried by any rule")]
    MissingObjective(Metric),
    #[error("No valid objectives remaining")]
    NoObjectives,
}

/// Result of one Pareto selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ParetoSelection {
    /// New archive membership.
    pub kept: Vec<HallOfFameEntry>,
    /// Kept rules absent from the prior archive.
    pub promoted: Vec<RuleNotation>,
    /// Prior members absent from the new archive.
    pub removed: Vec<RuleNotation>,
    /// Objectives actually used.
    pub objectives: Vec<Metric>,
}

/// `a` dominates `b`: no worse on every objective and better on at least one.
pub fn dominates(a: &[f64], b: &[f64]) -> bool {
    let mut strictly_better = false;
    for (x, y) in a.iter().zip(b) {
        if x < y {
            return false;
        }
        if x > y {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Indices of the non-dominated points.
pub fn pareto_front(points: &[Vec<f64>]) -> Vec<usize> {
    (0..points.len())
        .filter(|&i| {
            !points
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && dominates(other, &points[i]))
        })
        .collect()
}

/// Drop objectives no member carries; strict mode refuses instead.
pub fn resolve_objectives(
    members: &[HallOfFameEntry],
    objectives: &[Metric],
    strict: bool,
) -> Result<Vec<Metric>, ParetoError> {
    let mut resolved = Vec::with_capacity(objectives.len());
    for &metric in objectives {
        let carried = members.iter().any(|m| m.scores.get(metric).is_some());
        if carried {
            resolved.push(metric);
        } else if strict {
            return Err(ParetoError::MissingObjective(metric));
        } else {
            log::warn!("objective '{metric}' missing from every rule, skipping");
        }
    }
    if resolved.is_empty() {
        return Err(ParetoError::NoObjectives);
    }
    Ok(resolved)
}

fn objective_values(entry: &HallOfFameEntry, objectives: &[Metric]) -> Vec<f64> {
    objectives
        .iter()
        .map(|&m| entry.scores.get(m).unwrap_or(0.0))
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len().max(1) as f64
}

/// Select the new archive from the current members and fresh candidates.
///
/// A candidate for a rule already archived replaces the archived entry.
pub fn select(
    current: &[HallOfFameEntry],
    candidates: Vec<HallOfFameEntry>,
    config: &ParetoConfig,
    max_size: usize,
    diversity_threshold: u32,
) -> Result<ParetoSelection, ParetoError> {
    let mut pool: Vec<HallOfFameEntry> = current.to_vec();
    for candidate in candidates {
        match pool.iter().position(|e| e.notation == candidate.notation) {
            Some(i) => pool[i] = candidate,
            None => pool.push(candidate),
        }
    }

    let prior: HashSet<RuleNotation> = current.iter().map(|e| e.notation).collect();
    if pool.is_empty() {
        return Ok(ParetoSelection {
            kept: Vec::new(),
            promoted: Vec::new(),
            removed: Vec::new(),
            objectives: Vec::new(),
        });
    }

    let objectives = resolve_objectives(&pool, &config.objectives, config.strict)?;
    let points: Vec<Vec<f64>> = pool.iter().map(|e| objective_values(e, &objectives)).collect();

    // Front members ranked by mean objective value.
    let mut front: Vec<(usize, f64)> = pareto_front(&points)
        .into_iter()
        .map(|i| (i, mean(&points[i])))
        .collect();
    front.sort_by(|a, b| b.1.total_cmp(&a.1));
    front.truncate(max_size);

    // Keep the better-ranked member of every too-close pair.
    let mut kept_idx: Vec<usize> = Vec::with_capacity(front.len());
    for (i, _) in front {
        let close = kept_idx
            .iter()
            .any(|&k| pool[k].notation.distance(&pool[i].notation) < diversity_threshold);
        if close {
            log::debug!("pareto: {} too close to a better member", pool[i].notation);
        } else {
            kept_idx.push(i);
        }
    }

    let kept: Vec<HallOfFameEntry> = kept_idx.into_iter().map(|i| pool[i].clone()).collect();
    let kept_rules: HashSet<RuleNotation> = kept.iter().map(|e| e.notation).collect();

    let promoted = kept
        .iter()
        .map(|e| e.notation)
        .filter(|r| !prior.contains(r))
        .collect();
    let removed = current
        .iter()
        .map(|e| e.notation)
        .filter(|r| !kept_rules.contains(r))
        .collect();

    Ok(ParetoSelection {
        kept,
        promoted,
        removed,
        objectives,
    })
}
