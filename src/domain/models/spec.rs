//! Per-spec and orchestration-level state models.
//!
//! These are the in-memory records owned by the status monitor and the
//! shape of the snapshot the CLI persists to
//! `.kiro/config/orchestration-status.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a single spec within one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Timeout,
}

impl SpecStatus {
    /// Terminal statuses are only re-entered through the retry path.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Timeout
        )
    }
}

impl std::fmt::Display for SpecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Overall orchestration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationPhase {
    Idle,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl std::fmt::Display for OrchestrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// State of one spec in the execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecState {
    pub status: SpecStatus,
    pub batch_index: usize,
    /// Last agent that ran this spec, if any.
    pub agent_id: Option<String>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SpecState {
    pub fn pending(batch_index: usize) -> Self {
        Self {
            status: SpecStatus::Pending,
            batch_index,
            agent_id: None,
            retry_count: 0,
            error_message: None,
            updated_at: Utc::now(),
        }
    }
}

/// Rate-limit and launch-budget telemetry counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitStats {
    pub signal_count: u64,
    pub total_backoff_ms: u64,
    pub last_signal_at: Option<DateTime<Utc>>,
    pub last_launch_hold_ms: u64,
    pub launch_budget_per_minute: u32,
    pub launch_budget_window_ms: u64,
    pub launch_budget_used: u32,
    pub launch_budget_hold_count: u64,
    pub last_launch_budget_hold_ms: u64,
}

/// Adaptive parallelism telemetry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdaptiveParallelStats {
    pub configured_max: usize,
    pub effective_max: usize,
    pub last_throttle_at: Option<DateTime<Utc>>,
    pub last_recovery_at: Option<DateTime<Utc>>,
}

/// Singleton orchestration state held by the status monitor.
///
/// The persisted snapshot is a deep copy of this value; callers never see
/// the live instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub state: OrchestrationPhase,
    pub total_specs: usize,
    pub completed_specs: usize,
    pub failed_specs: usize,
    pub skipped_specs: usize,
    pub running_specs: usize,
    pub current_batch: usize,
    pub total_batches: usize,
    pub specs: HashMap<String, SpecState>,
    pub rate_limit: RateLimitStats,
    pub adaptive_parallel: AdaptiveParallelStats,
    pub updated_at: DateTime<Utc>,
}

impl Default for OrchestrationState {
    fn default() -> Self {
        Self {
            state: OrchestrationPhase::Idle,
            total_specs: 0,
            completed_specs: 0,
            failed_specs: 0,
            skipped_specs: 0,
            running_specs: 0,
            current_batch: 0,
            total_batches: 0,
            specs: HashMap::new(),
            rate_limit: RateLimitStats::default(),
            adaptive_parallel: AdaptiveParallelStats::default(),
            updated_at: Utc::now(),
        }
    }
}
