//! Compute module - Simulation, screening, evaluation and the discovery loop.

mod evaluator;
mod filter;
mod grid;

pub mod discovery;

pub use evaluator::*;
pub use filter::*;
pub use grid::*;
