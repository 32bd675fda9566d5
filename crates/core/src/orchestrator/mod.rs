//! Crawl orchestrator.
//!
//! A run selects hosts from the registry and crawls them on a bounded worker
//! pool. Host outcomes never abort the run; it always ends with a summary.

mod runner;
mod types;

pub use runner::{select_fraction, CrawlOrchestrator};
pub use types::{Fraction, HostResult, OrchestratorError, RunOptions, RunSummary};
