//! Shared test helpers: a scripted in-memory agent spawner and engine
//! fixtures.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Duration;

use kse::domain::models::{AgentEvent, Config, SpawnedAgent};
use kse::domain::ports::{
    AgentSpawner, NullContextSync, NullSpecLifecycleManager, SpawnError, StaticConfigProvider,
    StaticDependencyManager,
};
use kse::services::{Engine, StatusMonitor};

/// One scripted spawn attempt for a spec.
#[derive(Debug, Clone)]
pub enum Attempt {
    /// Emit `agent:completed` after the delay.
    Succeed { delay_ms: u64 },
    /// Emit `agent:failed` with the given stderr after the delay.
    Fail { stderr: String, delay_ms: u64 },
    /// Emit `agent:timeout` after the delay.
    Timeout { timeout_seconds: u64, delay_ms: u64 },
    /// Spawn successfully but never emit a lifecycle event.
    Silent,
    /// Fail synchronously from `spawn` itself.
    SpawnFailure { error: String },
}

#[derive(Default)]
struct SpawnerState {
    spawn_counts: HashMap<String, u32>,
    running: HashMap<String, (String, Option<tokio::task::JoinHandle<()>>)>,
    in_flight: usize,
    peak: usize,
}

/// In-memory spawner driven by per-spec scripts, for engine scenarios.
pub struct ScriptedSpawner {
    scripts: Mutex<HashMap<String, VecDeque<Attempt>>>,
    state: Arc<Mutex<SpawnerState>>,
    events: broadcast::Sender<AgentEvent>,
}

impl ScriptedSpawner {
    pub fn new(scripts: HashMap<String, Vec<Attempt>>) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            scripts: Mutex::new(
                scripts
                    .into_iter()
                    .map(|(spec, attempts)| (spec, attempts.into_iter().collect()))
                    .collect(),
            ),
            state: Arc::new(Mutex::new(SpawnerState::default())),
            events,
        }
    }

    pub async fn spawn_count(&self, spec: &str) -> u32 {
        self.state
            .lock()
            .await
            .spawn_counts
            .get(spec)
            .copied()
            .unwrap_or(0)
    }

    /// Peak number of concurrently running scripted agents.
    pub async fn peak_concurrency(&self) -> usize {
        self.state.lock().await.peak
    }

    async fn finish(
        state: &Arc<Mutex<SpawnerState>>,
        events: &broadcast::Sender<AgentEvent>,
        agent_id: &str,
        event: AgentEvent,
    ) {
        {
            let mut state = state.lock().await;
            if state.running.remove(agent_id).is_none() {
                return;
            }
            state.in_flight -= 1;
        }
        let _ = events.send(event);
    }
}

#[async_trait]
impl AgentSpawner for ScriptedSpawner {
    async fn spawn(&self, spec_name: &str) -> Result<SpawnedAgent, SpawnError> {
        let attempt = {
            let mut scripts = self.scripts.lock().await;
            scripts
                .get_mut(spec_name)
                .and_then(VecDeque::pop_front)
                .ok_or_else(|| SpawnError::Prompt(format!("no script for {spec_name}")))?
        };

        if let Attempt::SpawnFailure { error } = &attempt {
            let mut state = self.state.lock().await;
            *state.spawn_counts.entry(spec_name.to_string()).or_insert(0) += 1;
            return Err(SpawnError::Registration(error.clone()));
        }

        let agent_id = {
            let mut state = self.state.lock().await;
            let count = state.spawn_counts.entry(spec_name.to_string()).or_insert(0);
            *count += 1;
            let agent_id = format!("{spec_name}#{count}");
            state.in_flight += 1;
            state.peak = state.peak.max(state.in_flight);
            state
                .running
                .insert(agent_id.clone(), (spec_name.to_string(), None));
            agent_id
        };

        let handle = match attempt {
            Attempt::Silent | Attempt::SpawnFailure { .. } => None,
            Attempt::Succeed { delay_ms } => {
                let state = Arc::clone(&self.state);
                let events = self.events.clone();
                let agent_id = agent_id.clone();
                let spec = spec_name.to_string();
                Some(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    let event = AgentEvent::Completed {
                        agent_id: agent_id.clone(),
                        spec_name: spec,
                        exit_code: 0,
                    };
                    ScriptedSpawner::finish(&state, &events, &agent_id, event).await;
                }))
            }
            Attempt::Fail { stderr, delay_ms } => {
                let state = Arc::clone(&self.state);
                let events = self.events.clone();
                let agent_id = agent_id.clone();
                let spec = spec_name.to_string();
                Some(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    let event = AgentEvent::Failed {
                        agent_id: agent_id.clone(),
                        spec_name: spec,
                        exit_code: Some(1),
                        stderr,
                        error: None,
                    };
                    ScriptedSpawner::finish(&state, &events, &agent_id, event).await;
                }))
            }
            Attempt::Timeout {
                timeout_seconds,
                delay_ms,
            } => {
                let state = Arc::clone(&self.state);
                let events = self.events.clone();
                let agent_id = agent_id.clone();
                let spec = spec_name.to_string();
                Some(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    let event = AgentEvent::Timeout {
                        agent_id: agent_id.clone(),
                        spec_name: spec,
                        timeout_seconds,
                    };
                    ScriptedSpawner::finish(&state, &events, &agent_id, event).await;
                }))
            }
        };

        if let Some(handle) = handle {
            let mut state = self.state.lock().await;
            if let Some(entry) = state.running.get_mut(&agent_id) {
                entry.1 = Some(handle);
            }
        }

        Ok(SpawnedAgent::new(agent_id, spec_name.to_string(), None))
    }

    async fn kill(&self, agent_id: &str) {
        let entry = {
            let mut state = self.state.lock().await;
            let entry = state.running.remove(agent_id);
            if entry.is_some() {
                state.in_flight -= 1;
            }
            entry
        };
        if let Some((spec, handle)) = entry {
            if let Some(handle) = handle {
                handle.abort();
            }
            let _ = self.events.send(AgentEvent::Failed {
                agent_id: agent_id.to_string(),
                spec_name: spec,
                exit_code: None,
                stderr: "terminated".to_string(),
                error: None,
            });
        }
    }

    async fn kill_all(&self) {
        let ids: Vec<String> = self.state.lock().await.running.keys().cloned().collect();
        for id in ids {
            self.kill(&id).await;
        }
    }

    async fn active_agents(&self) -> HashMap<String, SpawnedAgent> {
        let state = self.state.lock().await;
        state
            .running
            .iter()
            .map(|(id, (spec, _))| {
                (
                    id.clone(),
                    SpawnedAgent::new(id.clone(), spec.clone(), None),
                )
            })
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }
}

/// A workspace with one directory per spec under `.kiro/specs/`.
pub fn workspace_with_specs(specs: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for spec in specs {
        std::fs::create_dir_all(dir.path().join(".kiro/specs").join(spec)).unwrap();
    }
    dir
}

/// Engine wired to a scripted spawner and fixed jitter of zero.
pub fn scripted_engine(
    workspace: &Path,
    config: Config,
    deps: HashMap<String, Vec<String>>,
    scripts: HashMap<String, Vec<Attempt>>,
) -> (Arc<Engine>, Arc<ScriptedSpawner>) {
    let spawner = Arc::new(ScriptedSpawner::new(scripts));
    let monitor = Arc::new(StatusMonitor::new(Arc::new(NullContextSync::new())));
    let engine = Engine::new(
        workspace,
        Arc::new(StaticConfigProvider::new(config)),
        Arc::new(StaticDependencyManager::new(deps)),
        Arc::new(NullSpecLifecycleManager::new()),
        Arc::clone(&spawner) as Arc<dyn AgentSpawner>,
        monitor,
    )
    .with_jitter(Arc::new(|| 0.0));
    (Arc::new(engine), spawner)
}

/// Convenience constructors used across scenario tests.
pub fn deps(entries: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(spec, prereqs)| {
            (
                (*spec).to_string(),
                prereqs.iter().map(ToString::to_string).collect(),
            )
        })
        .collect()
}

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}
