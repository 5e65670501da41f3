//! Collaborator ports.
//!
//! Everything the engine talks to lives behind one of these traits so the
//! orchestration core can be exercised without real processes, registries,
//! or cross-process bookkeeping. Registry, lifecycle, and sync collaborators
//! are best-effort sinks: callers log their errors and continue.

mod config_provider;
mod dependency_manager;
mod lifecycle;
mod registry;
mod spawner;
mod sync;

pub use config_provider::{ConfigProvider, StaticConfigProvider};
pub use dependency_manager::{
    DependencyManager, ManifestDependencyManager, StaticDependencyManager,
};
pub use lifecycle::{NullSpecLifecycleManager, SpecLifecycleManager, SpecPhase};
pub use registry::{AgentRegistry, LocalAgentRegistry};
pub use spawner::{AgentSpawner, SpawnError};
pub use sync::{ContextSyncManager, NullContextSync};
