//! Rule Atlas - self-improving discovery of Life-like cellular automaton rules.
//!
//! This crate runs an iterative search over birth/survival rules: it proposes
//! candidates, screens and evaluates them, and curates a small, diverse,
//! bounded Hall of Fame that persists across runs.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Rule notation, configuration and persisted record types
//! - `compute`: Simulation, screening, evaluation and the discovery loop
//!
//! # Example
//!
//! ```rust,no_run
//! use rule_atlas::{
//!     compute::{LifeEvaluator, discovery::{DiscoveryLoop, JsonFileRepository}},
//!     schema::DiscoveryConfig,
//! };
//!
//! let config = DiscoveryConfig::default();
//! let repo = JsonFileRepository::new(&config.storage.root);
//! let mut discovery = DiscoveryLoop::new(config, Box::new(repo), LifeEvaluator::new())?;
//!
//! let summary = discovery.run_iteration()?;
//! println!(
//!     "{} promoted, Hall of Fame holds {}",
//!     summary.new_rules_added, summary.total_hof_rules
//! );
//! # Ok::<(), rule_atlas::compute::discovery::DiscoveryError>(())
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::discovery::{DiscoveryError, DiscoveryLoop};
pub use compute::{Evaluator, LifeEvaluator};
pub use schema::{DiscoveryConfig, IterationSummary, RuleNotation};
