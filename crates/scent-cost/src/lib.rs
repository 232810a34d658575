//! Scent Cost - AI spend governance
//!
//! Keeps generated text affordable:
//!
//! - **Ledger**: exact decimal pricing of every provider call, rolling
//!   hour/day/week/month windows, per-provider lifetime totals
//! - **Budgets**: ceilings per window; selection never picks a provider whose
//!   projected cost would cross one
//! - **Selection**: providers scored on accuracy, latency and cost
//! - **Pipeline**: template first, then primary and fallback providers, then
//!   template again, so budget trouble never reaches the caller
//! - **Monitoring**: spike detection, per-operation latency metrics, token
//!   usage and monthly projections

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod anomaly;
pub mod budget;
pub mod config;
pub mod error;
pub mod governor;
pub mod ledger;
pub mod metrics;
pub mod pipeline;
pub mod provider;
pub mod selection;
pub mod template;

pub use anomaly::{AnomalyConfig, CostAnomaly};
pub use budget::BudgetConfig;
pub use config::CostConfig;
pub use error::{CostError, ProviderError};
pub use governor::{CostEvents, CostGovernor};
pub use ledger::{CostLedger, CostRecord, ProviderTotals, Reservation, Window};
pub use metrics::{MonthlyEstimate, MonthlyEstimateParams, OperationMetrics, TokenUsage};
pub use pipeline::{DegradeReason, GenerationOutcome, GenerationPath, GenerationPipeline};
pub use provider::{AiProvider, GenerationRequest, ProviderProfile, ProviderResponse, Quality};
pub use selection::{ProviderSelection, ScoredProvider, SelectionWeights, WorkloadProfile};
pub use template::TemplateGenerator;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
