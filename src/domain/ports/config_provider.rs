use async_trait::async_trait;

use crate::domain::models::Config;

/// Source of the configuration snapshot consumed per orchestration start.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn get_config(&self) -> anyhow::Result<Config>;
}

/// Fixed in-memory configuration, used by tests and by callers that already
/// resolved their config.
#[derive(Debug, Clone)]
pub struct StaticConfigProvider {
    config: Config,
}

impl StaticConfigProvider {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConfigProvider for StaticConfigProvider {
    async fn get_config(&self) -> anyhow::Result<Config> {
        Ok(self.config.clone())
    }
}
