//! Automated recovery with learned action ordering
//!
//! Each issue type has a fixed set of candidate actions. The coordinator
//! tries them best-first, where "best" is the Laplace-smoothed success rate
//! of the action for that issue discounted by its mean resolution time, and
//! escalates once `max_attempts` attempts have failed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

use crate::config::RecoveryConfig;
use crate::error::RecoveryError;

const MAX_ATTEMPT_HISTORY: usize = 500;

/// Known failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// AI provider calls failing or timing out
    ProviderConnectivity,
    /// Profile or content store queries failing
    IndexDegradation,
    /// Request queue saturated
    ConnectionExhaustion,
    /// Cache hit rate collapsed or tiers erroring
    CacheDegradation,
    /// Spend at or over budget
    BudgetExhaustion,
}

impl IssueType {
    /// Candidate actions, default preference first
    #[must_use]
    pub fn candidate_actions(&self) -> &'static [RecoveryAction] {
        match self {
            IssueType::ProviderConnectivity => &[
                RecoveryAction::FailoverProvider,
                RecoveryAction::ThrottleGeneration,
            ],
            IssueType::IndexDegradation => &[
                RecoveryAction::RebuildIndex,
                RecoveryAction::FlushCacheTier,
            ],
            IssueType::ConnectionExhaustion => &[
                RecoveryAction::ResetConnectionPool,
                RecoveryAction::ThrottleGeneration,
            ],
            IssueType::CacheDegradation => &[
                RecoveryAction::FlushCacheTier,
                RecoveryAction::ResetConnectionPool,
            ],
            IssueType::BudgetExhaustion => &[
                RecoveryAction::ThrottleGeneration,
                RecoveryAction::FailoverProvider,
            ],
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IssueType::ProviderConnectivity => "provider_connectivity",
            IssueType::IndexDegradation => "index_degradation",
            IssueType::ConnectionExhaustion => "connection_exhaustion",
            IssueType::CacheDegradation => "cache_degradation",
            IssueType::BudgetExhaustion => "budget_exhaustion",
        })
    }
}

/// Remediation the executor can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Route generation away from the failing provider
    FailoverProvider,
    /// Rebuild the similarity index / candidate store
    RebuildIndex,
    /// Recreate connections to remote stores
    ResetConnectionPool,
    /// Drop a misbehaving cache tier's contents
    FlushCacheTier,
    /// Serve templates instead of AI generation for a while
    ThrottleGeneration,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecoveryAction::FailoverProvider => "failover_provider",
            RecoveryAction::RebuildIndex => "rebuild_index",
            RecoveryAction::ResetConnectionPool => "reset_connection_pool",
            RecoveryAction::FlushCacheTier => "flush_cache_tier",
            RecoveryAction::ThrottleGeneration => "throttle_generation",
        })
    }
}

/// Performs recovery actions against the running system
#[async_trait]
pub trait RecoveryExecutor: Send + Sync {
    /// Run `action` for `issue`; `Ok` means the issue is resolved
    async fn execute(&self, action: RecoveryAction, issue: IssueType) -> Result<(), RecoveryError>;
}

/// One recorded attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    /// Issue being fixed
    pub issue: IssueType,
    /// Action taken
    pub action: RecoveryAction,
    /// 1-based attempt number within the recovery
    pub attempt: u32,
    /// Whether the action resolved the issue
    pub success: bool,
    /// Time the action took
    pub duration_ms: u64,
    /// Failure detail
    pub error: Option<String>,
    /// Completion time
    pub timestamp: DateTime<Utc>,
}

/// Result of a recovery run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// An action resolved the issue
    Resolved {
        /// Issue fixed
        issue: IssueType,
        /// Successful action
        action: RecoveryAction,
        /// Attempts used
        attempts: u32,
    },
    /// Every attempt failed; manual intervention required
    Escalated {
        /// Issue left unresolved
        issue: IssueType,
        /// Attempts used
        attempts: u32,
    },
    /// A recovery for this issue is already running
    InProgress {
        /// Issue being recovered elsewhere
        issue: IssueType,
    },
}

/// Learned effectiveness of one action for one issue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionStats {
    /// Attempts
    pub attempts: u64,
    /// Attempts that resolved the issue
    pub successes: u64,
    /// Summed duration of successful attempts
    pub total_resolution_ms: u64,
}

impl ActionStats {
    /// Laplace-smoothed success rate discounted by mean resolution seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn effectiveness(&self) -> f64 {
        let rate = (self.successes as f64 + 1.0) / (self.attempts as f64 + 2.0);
        let mean_secs = if self.successes == 0 {
            0.0
        } else {
            self.total_resolution_ms as f64 / self.successes as f64 / 1_000.0
        };
        rate / (1.0 + mean_secs)
    }
}

#[derive(Debug, Default)]
struct CoordinatorState {
    stats: BTreeMap<(IssueType, RecoveryAction), ActionStats>,
    history: VecDeque<RecoveryAttempt>,
}

/// Marks an issue as being recovered until dropped
struct InProgress<'a> {
    running: &'a Mutex<BTreeSet<IssueType>>,
    issue: IssueType,
}

impl<'a> InProgress<'a> {
    fn claim(running: &'a Mutex<BTreeSet<IssueType>>, issue: IssueType) -> Option<Self> {
        running
            .lock()
            .insert(issue)
            .then(|| Self { running, issue })
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.running.lock().remove(&self.issue);
    }
}

/// Runs bounded recovery for detected issues
pub struct RecoveryCoordinator {
    config: RecoveryConfig,
    executor: Arc<dyn RecoveryExecutor>,
    state: Mutex<CoordinatorState>,
    in_progress: Mutex<BTreeSet<IssueType>>,
}

impl fmt::Debug for RecoveryCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RecoveryCoordinator {
    /// Coordinator driving `executor`
    #[must_use]
    pub fn new(config: RecoveryConfig, executor: Arc<dyn RecoveryExecutor>) -> Self {
        Self {
            config,
            executor,
            state: Mutex::new(CoordinatorState::default()),
            in_progress: Mutex::new(BTreeSet::new()),
        }
    }

    /// Candidate actions for an issue, most effective first
    #[must_use]
    pub fn ranked_actions(&self, issue: IssueType) -> Vec<RecoveryAction> {
        let state = self.state.lock();
        let mut ranked: Vec<(usize, RecoveryAction, f64)> = issue
            .candidate_actions()
            .iter()
            .enumerate()
            .map(|(i, action)| {
                let score = state
                    .stats
                    .get(&(issue, *action))
                    .map_or_else(|| ActionStats::default().effectiveness(), ActionStats::effectiveness);
                (i, *action, score)
            })
            .collect();
        ranked.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
        ranked.into_iter().map(|(_, action, _)| action).collect()
    }

    /// Try actions until one resolves `issue` or attempts run out
    ///
    /// Dropping the returned future mid-run clears the in-progress mark.
    pub async fn recover(&self, issue: IssueType) -> RecoveryOutcome {
        let Some(_running) = InProgress::claim(&self.in_progress, issue) else {
            return RecoveryOutcome::InProgress { issue };
        };
        self.run(issue).await
    }

    async fn run(&self, issue: IssueType) -> RecoveryOutcome {
        let actions = self.ranked_actions(issue);
        let max_attempts = self.config.max_attempts.max(1);
        let timeout = self.config.action_timeout();

        for attempt in 1..=max_attempts {
            let action = actions[(attempt as usize - 1) % actions.len()];
            tracing::info!(issue = %issue, action = %action, attempt, "recovery attempt");

            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, self.executor.execute(action, issue)).await {
                Ok(result) => result,
                Err(_) => Err(RecoveryError::Timeout {
                    action,
                    timeout_ms: self.config.action_timeout_ms,
                }),
            };
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            self.record(issue, action, attempt, duration_ms, &result);

            match result {
                Ok(()) => {
                    tracing::info!(issue = %issue, action = %action, attempt, "issue resolved");
                    return RecoveryOutcome::Resolved {
                        issue,
                        action,
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    tracing::warn!(issue = %issue, action = %action, attempt, error = %err, "recovery attempt failed");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.backoff(attempt - 1)).await;
                    }
                }
            }
        }

        tracing::error!(issue = %issue, attempts = max_attempts, "recovery exhausted, escalating");
        RecoveryOutcome::Escalated {
            issue,
            attempts: max_attempts,
        }
    }

    fn record(
        &self,
        issue: IssueType,
        action: RecoveryAction,
        attempt: u32,
        duration_ms: u64,
        result: &Result<(), RecoveryError>,
    ) {
        let mut state = self.state.lock();
        let stats = state.stats.entry((issue, action)).or_default();
        stats.attempts += 1;
        if result.is_ok() {
            stats.successes += 1;
            stats.total_resolution_ms += duration_ms;
        }
        if state.history.len() == MAX_ATTEMPT_HISTORY {
            state.history.pop_front();
        }
        state.history.push_back(RecoveryAttempt {
            issue,
            action,
            attempt,
            success: result.is_ok(),
            duration_ms,
            error: result.as_ref().err().map(ToString::to_string),
            timestamp: Utc::now(),
        });
    }

    /// Recorded attempts, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<RecoveryAttempt> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Learned statistics per issue and action
    #[must_use]
    pub fn stats(&self) -> BTreeMap<(IssueType, RecoveryAction), ActionStats> {
        self.state.lock().stats.clone()
    }
}
