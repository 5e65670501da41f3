//! Typed lifecycle events for the spawner and the engine.
//!
//! Both components publish over `tokio::sync::broadcast`; subscribers match
//! on the variant instead of inspecting untyped payloads.

use serde::{Deserialize, Serialize};

use super::plan::ExecutionPlan;

/// Events emitted by the agent spawner, one stream for all agents.
///
/// Per-agent ordering is program order: every `Output` for an agent is
/// delivered before its terminal event. No ordering holds across agents.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// One parsed JSON line from the child's stdout.
    Output {
        agent_id: String,
        spec_name: String,
        event: serde_json::Value,
    },
    /// Child exited with code 0.
    Completed {
        agent_id: String,
        spec_name: String,
        exit_code: i32,
    },
    /// Child exited non-zero, failed to spawn, or errored mid-flight.
    Failed {
        agent_id: String,
        spec_name: String,
        exit_code: Option<i32>,
        stderr: String,
        error: Option<String>,
    },
    /// Per-agent timeout fired; the child was sent SIGTERM.
    Timeout {
        agent_id: String,
        spec_name: String,
        timeout_seconds: u64,
    },
}

impl AgentEvent {
    pub fn agent_id(&self) -> &str {
        match self {
            Self::Output { agent_id, .. }
            | Self::Completed { agent_id, .. }
            | Self::Failed { agent_id, .. }
            | Self::Timeout { agent_id, .. } => agent_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Output { .. })
    }
}

/// Orchestration-level events emitted by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    BatchStarted {
        batch: usize,
        specs: Vec<String>,
    },
    BatchCompleted {
        batch: usize,
    },
    SpecStarted {
        spec_name: String,
    },
    SpecCompleted {
        spec_name: String,
    },
    SpecFailed {
        spec_name: String,
        error: String,
    },
    SpecRateLimited {
        spec_name: String,
        retry_delay_ms: u64,
    },
    ParallelThrottled {
        effective_max: usize,
    },
    ParallelRecovered {
        effective_max: usize,
    },
    LaunchBudgetHold {
        hold_ms: u64,
        used: u32,
        budget_per_minute: u32,
    },
    OrchestrationCompleted {
        result: OrchestrationResult,
    },
}

/// Terminal outcome of one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationOutcome {
    Completed,
    Failed,
    Stopped,
}

impl std::fmt::Display for OrchestrationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Final report returned by `Engine::start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub status: OrchestrationOutcome,
    pub plan: ExecutionPlan,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OrchestrationResult {
    pub fn failed_with(plan: ExecutionPlan, error: impl Into<String>) -> Self {
        Self {
            status: OrchestrationOutcome::Failed,
            plan,
            completed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            error: Some(error.into()),
        }
    }
}
