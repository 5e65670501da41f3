//! Status monitor: authoritative in-memory orchestration state.
//!
//! All mutation funnels through this service; readers only ever get deep
//! snapshot copies, never references into the live state.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::models::{
    OrchestrationPhase, OrchestrationState, SpecState, SpecStatus,
};
use crate::domain::ports::ContextSyncManager;

/// One observed rate-limit signal.
#[derive(Debug, Clone)]
pub struct RateLimitEvent {
    pub spec_name: String,
    pub retry_delay_ms: u64,
    pub signal_at: DateTime<Utc>,
}

/// Adaptive-parallelism telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelEvent {
    Throttled,
    Recovered,
}

/// Launch-budget telemetry event.
#[derive(Debug, Clone)]
pub struct LaunchBudgetTelemetry {
    pub budget_per_minute: u32,
    pub window_ms: u64,
    pub used: u32,
    /// Set when a launch was held back by the budget.
    pub hold_ms: Option<u64>,
}

/// In-memory authoritative state for one engine instance.
pub struct StatusMonitor {
    state: RwLock<OrchestrationState>,
    sync: Arc<dyn ContextSyncManager>,
}

impl StatusMonitor {
    pub fn new(sync: Arc<dyn ContextSyncManager>) -> Self {
        Self {
            state: RwLock::new(OrchestrationState::default()),
            sync,
        }
    }

    /// Register a spec in `pending` at its planned batch index.
    pub async fn init_spec(&self, spec_name: &str, batch_index: usize) {
        let mut state = self.state.write().await;
        state
            .specs
            .insert(spec_name.to_string(), SpecState::pending(batch_index));
        state.total_specs = state.specs.len();
        refresh_counters(&mut state);
    }

    /// Write a spec's status and refresh the aggregate counters.
    ///
    /// Transitions from a terminal status back to `running` are rejected:
    /// the state is left untouched and a warning is logged. The retry path
    /// re-arms specs by incrementing the retry count instead.
    pub async fn update_spec_status(
        &self,
        spec_name: &str,
        status: SpecStatus,
        agent_id: Option<String>,
        error_message: Option<String>,
    ) {
        let mut state = self.state.write().await;
        let Some(spec) = state.specs.get_mut(spec_name) else {
            tracing::warn!(spec_name, "Status update for unknown spec");
            return;
        };

        if spec.status.is_terminal() && status == SpecStatus::Running {
            tracing::warn!(
                spec_name,
                from = %spec.status,
                "Rejected transition from terminal status back to running"
            );
            return;
        }

        spec.status = status;
        if let Some(agent_id) = agent_id {
            spec.agent_id = Some(agent_id);
        }
        if error_message.is_some() {
            spec.error_message = error_message;
        }
        spec.updated_at = Utc::now();
        refresh_counters(&mut state);
    }

    pub async fn increment_retry(&self, spec_name: &str) {
        let mut state = self.state.write().await;
        if let Some(spec) = state.specs.get_mut(spec_name) {
            spec.retry_count += 1;
            spec.updated_at = Utc::now();
        }
    }

    pub async fn set_orchestration_state(&self, phase: OrchestrationPhase) {
        let mut state = self.state.write().await;
        state.state = phase;
        state.updated_at = Utc::now();
    }

    pub async fn set_batch_info(&self, current: usize, total: usize) {
        let mut state = self.state.write().await;
        state.current_batch = current;
        state.total_batches = total;
        state.updated_at = Utc::now();
    }

    pub async fn record_rate_limit_event(&self, event: RateLimitEvent) {
        let mut state = self.state.write().await;
        state.rate_limit.signal_count += 1;
        state.rate_limit.total_backoff_ms += event.retry_delay_ms;
        state.rate_limit.last_signal_at = Some(event.signal_at);
        state.updated_at = Utc::now();
        tracing::info!(
            spec_name = %event.spec_name,
            retry_delay_ms = event.retry_delay_ms,
            "Rate limit signal recorded"
        );
    }

    /// Record a launch hold applied ahead of a spawn.
    pub async fn record_launch_hold(&self, hold_ms: u64) {
        let mut state = self.state.write().await;
        state.rate_limit.last_launch_hold_ms = hold_ms;
        state.updated_at = Utc::now();
    }

    /// Seed the adaptive-parallelism limits at run start.
    pub async fn set_parallel_limits(&self, configured_max: usize, effective_max: usize) {
        let mut state = self.state.write().await;
        state.adaptive_parallel.configured_max = configured_max;
        state.adaptive_parallel.effective_max = effective_max;
        state.updated_at = Utc::now();
    }

    pub async fn update_parallel_telemetry(
        &self,
        event: ParallelEvent,
        effective_max_parallel: usize,
        configured_max: usize,
    ) {
        let mut state = self.state.write().await;
        state.adaptive_parallel.configured_max = configured_max;
        state.adaptive_parallel.effective_max = effective_max_parallel;
        match event {
            ParallelEvent::Throttled => {
                state.adaptive_parallel.last_throttle_at = Some(Utc::now());
            }
            ParallelEvent::Recovered => {
                state.adaptive_parallel.last_recovery_at = Some(Utc::now());
            }
        }
        state.updated_at = Utc::now();
    }

    pub async fn update_launch_budget_telemetry(&self, telemetry: LaunchBudgetTelemetry) {
        let mut state = self.state.write().await;
        state.rate_limit.launch_budget_per_minute = telemetry.budget_per_minute;
        state.rate_limit.launch_budget_window_ms = telemetry.window_ms;
        state.rate_limit.launch_budget_used = telemetry.used;
        if let Some(hold_ms) = telemetry.hold_ms {
            state.rate_limit.launch_budget_hold_count += 1;
            state.rate_limit.last_launch_budget_hold_ms = hold_ms;
        }
        state.updated_at = Utc::now();
    }

    /// Mirror a spec status to the external sync collaborator.
    ///
    /// Sync failures are logged and swallowed.
    pub async fn sync_external_status(&self, spec_name: &str, status: SpecStatus) {
        if let Err(e) = self.sync.push_status(spec_name, status).await {
            tracing::warn!(spec_name, %status, error = %e, "Context sync push failed");
        }
    }

    /// Deep read-only snapshot, safe for JSON persistence. Each call
    /// returns a fresh value.
    pub async fn get_orchestration_status(&self) -> OrchestrationState {
        self.state.read().await.clone()
    }
}

fn refresh_counters(state: &mut OrchestrationState) {
    state.completed_specs = 0;
    state.failed_specs = 0;
    state.skipped_specs = 0;
    state.running_specs = 0;
    for spec in state.specs.values() {
        match spec.status {
            SpecStatus::Completed => state.completed_specs += 1,
            SpecStatus::Failed | SpecStatus::Timeout => state.failed_specs += 1,
            SpecStatus::Skipped => state.skipped_specs += 1,
            SpecStatus::Running => state.running_specs += 1,
            SpecStatus::Pending => {}
        }
    }
    state.updated_at = Utc::now();
}
