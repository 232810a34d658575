//! Scent Sim - workload simulators for the recommendation engine
//!
//! Two simulators drive the real components with synthetic traffic:
//!
//! - [`run_bandit_simulation`] plays the Thompson selector against fixed
//!   per-algorithm success rates and measures regret.
//! - [`run_cache_simulation`] sends archetype traffic through a full
//!   [`scent_core::RecommendationEngine`] and measures the cache hit rate.
//!
//! [`run_report`] combines both with the engine's operator reports.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod catalog;
pub mod simulator;

pub use simulator::{
    run_bandit_simulation, run_cache_simulation, run_report, BanditSimConfig, BanditSimReport,
    CacheSimConfig, CacheSimReport, SimulationReport,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
