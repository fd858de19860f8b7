//! Cheap density screen run before full evaluation.
//!
//! A rule is simulated from a few random initial grids; if the mean final
//! density collapses toward zero or fills the grid, the rule is rejected
//! without spending a full evaluation on it.

use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::LifeGrid;
use crate::schema::{HardFilterConfig, RuleNotation};

/// Why a rule was screened out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// Mean final density below the lower bound.
    QuasiDeath,
    /// Mean final density above the upper bound.
    Saturation,
}

impl RejectReason {
    pub fn name(self) -> &'static str {
        match self {
            RejectReason::QuasiDeath => "quasi-death",
            RejectReason::Saturation => "saturation",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of screening one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterVerdict {
    /// `None` when the filter is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_density: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

impl FilterVerdict {
    pub fn passed(&self) -> bool {
        self.reason.is_none()
    }
}

/// Density screen over a handful of seeded random grids.
#[derive(Debug, Clone)]
pub struct HardFilter {
    config: HardFilterConfig,
}

impl HardFilter {
    pub fn new(config: HardFilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HardFilterConfig {
        &self.config
    }

    /// Mean final density across seeds `base_seed + i` (wrapping) for `i < seeds`.
    pub fn mean_final_density(&self, rule: &RuleNotation) -> f64 {
        let cfg = &self.config;
        let runs = cfg.seeds.max(1);
        let total: f64 = (0..runs as u64)
            .into_par_iter()
            .map(|i| {
                let seed = cfg.base_seed.wrapping_add(i);
                let mut grid = LifeGrid::seeded(cfg.grid_size, cfg.initial_density, seed);
                grid.run(rule, cfg.steps);
                grid.density()
            })
            .sum();
        total / runs as f64
    }

    /// Screen a rule. A disabled filter passes everything without simulating.
    pub fn screen(&self, rule: &RuleNotation) -> FilterVerdict {
        if !self.config.enabled {
            return FilterVerdict {
                mean_density: None,
                reason: None,
            };
        }

        let mean_density = self.mean_final_density(rule);
        let reason = if mean_density < self.config.min_density {
            Some(RejectReason::QuasiDeath)
        } else if mean_density > self.config.max_density {
            Some(RejectReason::Saturation)
        } else {
            None
        };

        if let Some(reason) = reason {
            log::debug!("hard filter rejected {rule}: {reason} (density {mean_density:.3})");
        }

        FilterVerdict {
            mean_density: Some(mean_density),
            reason,
        }
    }
}
