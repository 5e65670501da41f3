use async_trait::async_trait;

use crate::domain::models::SpecStatus;

/// Best-effort cross-process status mirror.
#[async_trait]
pub trait ContextSyncManager: Send + Sync {
    async fn push_status(&self, spec_name: &str, status: SpecStatus) -> anyhow::Result<()>;
}

/// Sync sink for standalone runs.
#[derive(Debug, Clone, Default)]
pub struct NullContextSync;

impl NullContextSync {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContextSyncManager for NullContextSync {
    async fn push_status(&self, spec_name: &str, status: SpecStatus) -> anyhow::Result<()> {
        tracing::debug!(spec_name, %status, "Context sync push");
        Ok(())
    }
}
