use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::models::{AgentEvent, SpawnedAgent};

/// Spawn failures surfaced synchronously from `AgentSpawner::spawn`.
///
/// The engine treats every variant as a per-spec failure subject to the
/// retry budget.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Invalid bootstrap prompt")]
    InvalidPrompt,

    #[error("Cannot find API key")]
    MissingApiKey,

    #[error("Agent registration failed: {0}")]
    Registration(String),

    #[error("Prompt build failed: {0}")]
    Prompt(String),

    #[error("Spawn error: {0}")]
    Io(#[from] std::io::Error),
}

/// Spawns one child agent process per spec and reports its lifecycle as
/// `AgentEvent`s on a broadcast stream.
#[async_trait]
pub trait AgentSpawner: Send + Sync {
    /// Spawn an agent for `spec_name` and return its initial record.
    ///
    /// Subscribe before calling this to observe every event for the
    /// returned agent id.
    async fn spawn(&self, spec_name: &str) -> Result<SpawnedAgent, SpawnError>;

    /// Terminate one running agent and wait for it to reach a terminal
    /// status. No-op when the agent is absent or already terminal.
    async fn kill(&self, agent_id: &str);

    /// Terminate every running agent and wait for all of them.
    async fn kill_all(&self);

    /// Copy of the live agent map; mutating the returned value does not
    /// affect spawner state.
    async fn active_agents(&self) -> HashMap<String, SpawnedAgent>;

    fn subscribe(&self) -> broadcast::Receiver<AgentEvent>;
}
