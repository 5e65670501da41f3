use async_trait::async_trait;
use uuid::Uuid;

/// Mints and releases agent identifiers for spawned processes.
///
/// Registration failures abort the spawn; deregistration failures are
/// logged and swallowed by callers.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    async fn register(&self, spec_name: &str) -> anyhow::Result<String>;
    async fn deregister(&self, agent_id: &str) -> anyhow::Result<()>;
}

/// Registry-less operation: mints local UUID-based ids.
#[derive(Debug, Clone, Default)]
pub struct LocalAgentRegistry;

impl LocalAgentRegistry {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentRegistry for LocalAgentRegistry {
    async fn register(&self, spec_name: &str) -> anyhow::Result<String> {
        Ok(format!("agent-{spec_name}-{}", Uuid::new_v4()))
    }

    async fn deregister(&self, agent_id: &str) -> anyhow::Result<()> {
        tracing::debug!(agent_id, "Deregistered local agent");
        Ok(())
    }
}
