//! UCB1 bandit over search strategies.

use std::collections::BTreeMap;

use super::store::{Repository, StoreError, load_typed, save_typed};
use crate::schema::{ArmStats, BanditConfig, BanditState, Strategy};

/// Chooses a search strategy per iteration and learns from its reward.
#[derive(Debug, Clone)]
pub struct StrategyBandit {
    exploration: f64,
    total_pulls: u64,
    arms: BTreeMap<Strategy, ArmStats>,
}

impl StrategyBandit {
    pub fn new(config: &BanditConfig) -> Self {
        Self {
            exploration: config.exploration,
            total_pulls: 0,
            arms: Strategy::ALL
                .into_iter()
                .map(|s| (s, ArmStats::default()))
                .collect(),
        }
    }

    /// Restore persisted statistics. Unknown arm names are ignored.
    pub fn from_state(config: &BanditConfig, state: &BanditState) -> Self {
        let mut bandit = Self::new(config);
        bandit.total_pulls = state.total_pulls;
        for (name, stats) in &state.arms {
            match Strategy::from_name(name) {
                Some(strategy) => {
                    bandit.arms.insert(strategy, stats.clone());
                }
                None => log::warn!("ignoring unknown bandit arm '{name}'"),
            }
        }
        bandit
    }

    pub fn to_state(&self) -> BanditState {
        BanditState {
            total_pulls: self.total_pulls,
            arms: self
                .arms
                .iter()
                .map(|(s, stats)| (s.name().to_string(), stats.clone()))
                .collect(),
        }
    }

    /// Load from the repository, starting fresh if nothing is stored.
    pub fn load(
        config: &BanditConfig,
        repo: &dyn Repository,
        key: &str,
    ) -> Result<Self, StoreError> {
        Ok(match load_typed::<BanditState>(repo, key)? {
            Some(state) => Self::from_state(config, &state),
            None => Self::new(config),
        })
    }

    pub fn save(&self, repo: &mut dyn Repository, key: &str) -> Result<(), StoreError> {
        save_typed(repo, key, &self.to_state())
    }

    pub fn total_pulls(&self) -> u64 {
        self.total_pulls
    }

    pub fn arm(&self, strategy: Strategy) -> &ArmStats {
        // Every strategy is inserted at construction.
        &self.arms[&strategy]
    }

    /// Upper confidence bound; untried arms are infinite.
    pub fn ucb(&self, strategy: Strategy) -> f64 {
        let arm = self.arm(strategy);
        if arm.pulls == 0 {
            return f64::INFINITY;
        }
        let total = self.total_pulls.max(1) as f64;
        arm.avg_reward + self.exploration * (total.ln() / arm.pulls as f64).sqrt()
    }

    /// Arm with the highest bound; ties go to the earlier strategy.
    pub fn select(&self) -> Strategy {
        let mut best = Strategy::ALL[0];
        let mut best_score = self.ucb(best);
        for strategy in Strategy::ALL.into_iter().skip(1) {
            let score = self.ucb(strategy);
            if score > best_score {
                best = strategy;
                best_score = score;
            }
        }
        best
    }

    pub fn update(&mut self, strategy: Strategy, reward: f64) {
        if let Some(arm) = self.arms.get_mut(&strategy) {
            arm.record(reward);
            self.total_pulls += 1;
        }
    }

    /// Update then persist, so a crash never loses a recorded reward.
    pub fn update_and_save(
        &mut self,
        strategy: Strategy,
        reward: f64,
        repo: &mut dyn Repository,
        key: &str,
    ) -> Result<(), StoreError> {
        self.update(strategy, reward);
        self.save(repo, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::discovery::store::InMemoryRepository;

    fn bandit() -> StrategyBandit {
        StrategyBandit::new(&BanditConfig::default())
    }

    #[test]
    fn test_untried_arms_in_declaration_order() {
        let mut b = bandit();
        let mut order = Vec::new();
        for _ in 0..Strategy::ALL.len() {
            let arm = b.select();
            order.push(arm);
            b.update(arm, 0.0);
        }
        assert_eq!(order, Strategy::ALL.to_vec());
    }

    #[test]
    fn test_prefers_rewarded_arm() {
        let mut b = bandit();
        for s in Strategy::ALL {
            b.update(s, if s == Strategy::Diversity { 5.0 } else { 0.0 });
        }
        assert_eq!(b.select(), Strategy::Diversity);
    }

    #[test]
    fn test_ucb_formula() {
        let mut b = bandit();
        for s in Strategy::ALL {
            b.update(s, 1.0);
        }
        b.update(Strategy::Random, 0.0);
        let arm = b.arm(Strategy::Random);
        assert_eq!(arm.pulls, 2);
        let expected = 0.5 + 1.4 * ((6.0f64).ln() / 2.0).sqrt();
        assert!((b.ucb(Strategy::Random) - expected).abs() < 1e-12);
        assert_eq!(b.total_pulls(), 6);
    }

    #[test]
    fn test_persist_roundtrip() {
        let mut repo = InMemoryRepository::new();
        let mut b = bandit();
        b.update_and_save(Strategy::StableBias, 2.5, &mut repo, "bandit_stats")
            .unwrap();

        let restored =
            StrategyBandit::load(&BanditConfig::default(), &repo, "bandit_stats").unwrap();
        assert_eq!(restored.total_pulls(), 1);
        assert_eq!(restored.arm(Strategy::StableBias).pulls, 1);
        assert!((restored.arm(Strategy::StableBias).avg_reward - 2.5).abs() < 1e-12);

        let doc = repo.load("bandit_stats").unwrap().unwrap();
        assert_eq!(doc["arms"]["stable_bias"]["pulls"], 1);
    }

    #[test]
    fn test_unknown_arm_ignored() {
        let mut state = BanditState::default();
        state.arms.insert("telepathy".to_string(), ArmStats::default());
        let b = StrategyBandit::from_state(&BanditConfig::default(), &state);
        assert_eq!(b.to_state().arms.len(), Strategy::ALL.len());
    }
}
