//! Domain models.

pub mod agent;
pub mod config;
pub mod events;
pub mod plan;
pub mod spec;

pub use agent::{AgentStatus, SpawnedAgent};
pub use config::{AgentConfig, Config, LoggingConfig, RateLimitConfig};
pub use events::{AgentEvent, EngineEvent, OrchestrationOutcome, OrchestrationResult};
pub use plan::{DependencyEdge, DependencyGraph, ExecutionPlan};
pub use spec::{
    AdaptiveParallelStats, OrchestrationPhase, OrchestrationState, RateLimitStats, SpecState,
    SpecStatus,
};
