use async_trait::async_trait;

/// Cross-process spec lifecycle phases pushed to the external manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecPhase {
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for SpecPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Assigned => write!(f, "assigned"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Best-effort sink for spec phase transitions. A failed transition never
/// aborts the orchestration.
#[async_trait]
pub trait SpecLifecycleManager: Send + Sync {
    async fn transition(&self, spec_name: &str, phase: SpecPhase) -> anyhow::Result<()>;
}

/// Lifecycle sink for standalone runs.
#[derive(Debug, Clone, Default)]
pub struct NullSpecLifecycleManager;

impl NullSpecLifecycleManager {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SpecLifecycleManager for NullSpecLifecycleManager {
    async fn transition(&self, spec_name: &str, phase: SpecPhase) -> anyhow::Result<()> {
        tracing::debug!(spec_name, %phase, "Spec lifecycle transition");
        Ok(())
    }
}
