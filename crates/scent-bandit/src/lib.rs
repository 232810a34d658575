//! Scent Bandit - online algorithm selection
//!
//! Chooses among competing recommendation algorithms with Thompson Sampling:
//!
//! - **Arms**: one Beta posterior per algorithm, starting at Beta(1, 1)
//! - **Contexts**: global or per-segment arm sets, learned independently
//! - **Instrumentation**: selection counts, success rates, confidence, win
//!   probability and learning phase, without exposing raw posteriors
//! - **Persistence**: export/import snapshots with corruption repair
//!
//! # Example
//!
//! ```rust,ignore
//! use scent_bandit::{BanditConfig, DecisionContext, ThompsonSelector};
//!
//! let selector = ThompsonSelector::new(BanditConfig::default().with_seed(7))?;
//! let ctx = DecisionContext::Global;
//! let arm = selector.select_arm(&ctx);
//! selector.record_outcome(&ctx, arm, true);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod arm;
pub mod error;
pub mod selector;

pub use arm::{Algorithm, ArmStats, BanditArm, BetaPosterior};
pub use error::BanditError;
pub use selector::{
    BanditConfig, BanditPhase, BanditReport, BanditState, ContextState, DecisionContext, Outcome,
    ThompsonSelector,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
