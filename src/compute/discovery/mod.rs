//! Self-improving discovery loop over Life-like rules.
//!
//! Each iteration aggregates memory, retrains the promise scorer, lets the
//! strategy bandit pick a search strategy, generates and screens candidates,
//! evaluates the survivors, promotes the best into the Hall of Fame and
//! persists everything before rewarding the bandit.
//!
//! # Components
//!
//! - [`features`] - fixed-length feature vectors of rule structure
//! - [`MetaScorer`] - class-balanced logistic promise scorer
//! - [`StrategyBandit`] - UCB1 over the five search strategies
//! - [`CandidateGenerator`] - mutation pool, random fill and stable bias
//! - [`PromotionEngine`] - adaptive thresholds, quotas and diversity, or a Pareto front
//! - [`MemoryStore`] - aggregated memory and the [`HallOfFame`] mirror
//! - [`DiscoveryLoop`] - one iteration end to end
//! - [`store`] - pluggable JSON persistence

mod archive;
mod bandit;
pub mod features;
mod generator;
mod memory;
mod meta_model;
mod orchestrator;
mod pareto;
mod promotion;
pub mod store;

pub use archive::*;
pub use bandit::*;
pub use generator::*;
pub use memory::*;
pub use meta_model::*;
pub use orchestrator::*;
pub use pareto::*;
pub use promotion::*;
pub use store::{InMemoryRepository, JsonFileRepository, Repository, StoreError};
