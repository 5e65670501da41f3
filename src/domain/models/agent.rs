//! Spawned agent records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a spawned agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    Completed,
    Failed,
    Timeout,
}

impl AgentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Snapshot of one spawned agent, as handed to external observers.
///
/// The spawner owns the live record and the OS process handle; everything
/// outside the spawner sees clones of this struct only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnedAgent {
    pub agent_id: String,
    pub spec_name: String,
    pub child_pid: Option<u32>,
    pub status: AgentStatus,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    /// Accumulated stderr, kept verbatim as failure evidence.
    pub stderr_buffer: String,
    /// Parsed JSON-lines events from the child's stdout, in arrival order.
    pub events: Vec<serde_json::Value>,
}

impl SpawnedAgent {
    pub fn new(agent_id: String, spec_name: String, child_pid: Option<u32>) -> Self {
        Self {
            agent_id,
            spec_name,
            child_pid,
            status: AgentStatus::Running,
            exit_code: None,
            started_at: Utc::now(),
            completed_at: None,
            retry_count: 0,
            stderr_buffer: String::new(),
            events: Vec::new(),
        }
    }
}
