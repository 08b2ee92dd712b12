//! Test execution engine
//!
//! Provides precondition evaluation plus sequential and parallel case
//! execution.

mod parallel;
mod preconditions;
mod runner;

pub use parallel::ParallelExecutor;
pub use preconditions::{default_external_gates, ExternalGate, ExternalGates, Verdict};
pub use runner::{RunContext, ScenarioRunner};
