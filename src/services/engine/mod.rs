//! Orchestration engine.
//!
//! Drives a set of specs end to end: validates them on disk, plans batches
//! from the dependency graph, schedules agent spawns under the admission
//! governor, applies retry and backoff policy, propagates failures to
//! dependents, and reports one terminal result per run.

mod failure;
mod governor;

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{Duration, Instant};

use crate::domain::models::{
    AgentEvent, Config, EngineEvent, ExecutionPlan, OrchestrationOutcome, OrchestrationPhase,
    OrchestrationResult, SpecStatus,
};
use crate::domain::ports::{
    AgentSpawner, ConfigProvider, DependencyManager, SpecLifecycleManager, SpecPhase,
};
use crate::services::status_monitor::{
    LaunchBudgetTelemetry, ParallelEvent, RateLimitEvent, StatusMonitor,
};
use failure::{classify, parse_retry_after_ms, rate_limit_backoff_ms, FailureClass};
use governor::{Admission, GovernorConfig, ParallelGovernor, WaitReason};

/// Broadcast capacity for engine events.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Watchdog slack added on top of the configured agent timeout.
const WATCHDOG_SLACK: Duration = Duration::from_secs(60);

/// Watchdog interval when no agent timeout is configured.
const WATCHDOG_DEFAULT: Duration = Duration::from_secs(3600);

type JitterFn = dyn Fn() -> f64 + Send + Sync;

/// Per-start overrides.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Caps the configured `max_parallel` for this run.
    pub max_parallel: Option<usize>,
}

/// Orchestration engine over injected collaborators.
pub struct Engine {
    workspace_root: PathBuf,
    config_provider: Arc<dyn ConfigProvider>,
    dependency_manager: Arc<dyn DependencyManager>,
    lifecycle: Arc<dyn SpecLifecycleManager>,
    spawner: Arc<dyn AgentSpawner>,
    monitor: Arc<StatusMonitor>,
    events: broadcast::Sender<EngineEvent>,
    running: AtomicBool,
    current: Mutex<Option<Arc<ExecutionContext>>>,
    jitter: Arc<JitterFn>,
}

struct ExecutionContext {
    plan: ExecutionPlan,
    config: Config,
    configured_max: usize,
    max_retries: u32,
    governor: ParallelGovernor,
    monitor: Arc<StatusMonitor>,
    spawner: Arc<dyn AgentSpawner>,
    lifecycle: Arc<dyn SpecLifecycleManager>,
    events: broadcast::Sender<EngineEvent>,
    state: Mutex<RunState>,
    jitter: Arc<JitterFn>,
}

#[derive(Debug, Default)]
struct RunState {
    stopped: bool,
    completed: Vec<String>,
    failed: Vec<String>,
    skipped: Vec<String>,
    retry_counts: HashMap<String, u32>,
}

impl ExecutionContext {
    async fn is_stopped(&self) -> bool {
        self.state.lock().await.stopped
    }
}

struct AttemptOutcome {
    agent_id: Option<String>,
    terminal: Terminal,
}

enum Terminal {
    Completed,
    Failed { error_text: String, is_timeout: bool },
}

enum Disposition {
    Retry { backoff: Option<Duration> },
    Final,
}

impl Engine {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        config_provider: Arc<dyn ConfigProvider>,
        dependency_manager: Arc<dyn DependencyManager>,
        lifecycle: Arc<dyn SpecLifecycleManager>,
        spawner: Arc<dyn AgentSpawner>,
        monitor: Arc<StatusMonitor>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            workspace_root: workspace_root.into(),
            config_provider,
            dependency_manager,
            lifecycle,
            spawner,
            monitor,
            events,
            running: AtomicBool::new(false),
            current: Mutex::new(None),
            jitter: Arc::new(rand::random::<f64>),
        }
    }

    /// Replace the backoff jitter source. Tests pin it to a constant.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Arc<JitterFn>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn monitor(&self) -> Arc<StatusMonitor> {
        Arc::clone(&self.monitor)
    }

    /// Run the given specs to a terminal outcome.
    ///
    /// Every failure mode is encoded in the returned result; the
    /// `orchestration:complete` event fires exactly once per call.
    pub async fn start(
        &self,
        spec_names: &[String],
        options: StartOptions,
    ) -> OrchestrationResult {
        if self.running.swap(true, Ordering::SeqCst) {
            let result = OrchestrationResult::failed_with(
                ExecutionPlan::default(),
                "Orchestration is already running",
            );
            let _ = self.events.send(EngineEvent::OrchestrationCompleted {
                result: result.clone(),
            });
            return result;
        }

        let result = self.run(spec_names, options).await;

        *self.current.lock().await = None;
        self.running.store(false, Ordering::SeqCst);
        let _ = self.events.send(EngineEvent::OrchestrationCompleted {
            result: result.clone(),
        });
        result
    }

    /// Cooperative cancellation: kill every running agent and let in-flight
    /// retries short-circuit to final failure. No-op when idle.
    pub async fn stop(&self) {
        let ctx = self.current.lock().await.clone();
        let Some(ctx) = ctx else {
            return;
        };

        tracing::info!("Stopping orchestration");
        ctx.state.lock().await.stopped = true;
        ctx.governor.wake();
        self.spawner.kill_all().await;
        self.monitor
            .set_orchestration_state(OrchestrationPhase::Stopped)
            .await;
    }

    async fn run(&self, spec_names: &[String], options: StartOptions) -> OrchestrationResult {
        if spec_names.is_empty() {
            self.monitor
                .set_orchestration_state(OrchestrationPhase::Failed)
                .await;
            return OrchestrationResult::failed_with(ExecutionPlan::default(), "No specs provided");
        }

        let missing = self.validate_spec_existence(spec_names);
        if !missing.is_empty() {
            self.monitor
                .set_orchestration_state(OrchestrationPhase::Failed)
                .await;
            let plan = ExecutionPlan {
                specs: spec_names.to_vec(),
                ..ExecutionPlan::default()
            };
            return OrchestrationResult::failed_with(
                plan,
                format!("Specs not found: {}", missing.join(", ")),
            );
        }

        let graph = match self
            .dependency_manager
            .build_dependency_graph(spec_names)
            .await
        {
            Ok(graph) => graph,
            Err(e) => {
                self.monitor
                    .set_orchestration_state(OrchestrationPhase::Failed)
                    .await;
                let plan = ExecutionPlan {
                    specs: spec_names.to_vec(),
                    ..ExecutionPlan::default()
                };
                return OrchestrationResult::failed_with(
                    plan,
                    format!("Failed to build dependency graph: {e}"),
                );
            }
        };

        if let Some(cycle) = self.dependency_manager.detect_circular_dependencies(&graph) {
            self.monitor
                .set_orchestration_state(OrchestrationPhase::Failed)
                .await;
            let plan = ExecutionPlan {
                specs: spec_names.to_vec(),
                dependencies: graph.prerequisites(),
                batches: Vec::new(),
                has_cycle: true,
                cycle_path: Some(cycle.clone()),
            };
            return OrchestrationResult::failed_with(
                plan,
                format!("Circular dependency detected: {}", cycle.join(" -> ")),
            );
        }

        let plan = ExecutionPlan::build(spec_names, &graph);
        if plan.has_cycle {
            self.monitor
                .set_orchestration_state(OrchestrationPhase::Failed)
                .await;
            let cycle = plan.cycle_path.clone().unwrap_or_default();
            return OrchestrationResult::failed_with(
                plan,
                format!("Circular dependency detected: {}", cycle.join(" -> ")),
            );
        }

        for spec in &plan.specs {
            let batch = plan.batch_of(spec).unwrap_or(0);
            self.monitor.init_spec(spec, batch).await;
        }
        self.monitor.set_batch_info(0, plan.batches.len()).await;
        self.monitor
            .set_orchestration_state(OrchestrationPhase::Running)
            .await;

        let config = match self.config_provider.get_config().await {
            Ok(config) => config,
            Err(e) => {
                self.monitor
                    .set_orchestration_state(OrchestrationPhase::Failed)
                    .await;
                return OrchestrationResult::failed_with(
                    plan,
                    format!("Failed to load configuration: {e}"),
                );
            }
        };

        let configured_max = config
            .max_parallel
            .min(options.max_parallel.unwrap_or(usize::MAX))
            .max(1);
        let governor = ParallelGovernor::new(GovernorConfig {
            configured_max,
            adaptive: config.rate_limit.adaptive_parallel,
            parallel_floor: config.rate_limit.parallel_floor.max(1),
            cooldown: Duration::from_millis(config.rate_limit.cooldown_ms),
            launch_budget: config.rate_limit.launch_budget_per_minute,
            launch_window: Duration::from_millis(config.rate_limit.launch_budget_window_ms),
        });
        self.monitor
            .set_parallel_limits(configured_max, configured_max)
            .await;
        if config.rate_limit.launch_budget_per_minute > 0 {
            self.monitor
                .update_launch_budget_telemetry(LaunchBudgetTelemetry {
                    budget_per_minute: config.rate_limit.launch_budget_per_minute,
                    window_ms: config.rate_limit.launch_budget_window_ms,
                    used: 0,
                    hold_ms: None,
                })
                .await;
        }

        let max_retries = config.max_retries;
        let ctx = Arc::new(ExecutionContext {
            plan: plan.clone(),
            config,
            configured_max,
            max_retries,
            governor,
            monitor: Arc::clone(&self.monitor),
            spawner: Arc::clone(&self.spawner),
            lifecycle: Arc::clone(&self.lifecycle),
            events: self.events.clone(),
            state: Mutex::new(RunState::default()),
            jitter: Arc::clone(&self.jitter),
        });
        *self.current.lock().await = Some(Arc::clone(&ctx));

        let total_batches = ctx.plan.batches.len();
        for (index, batch) in ctx.plan.batches.iter().enumerate() {
            if ctx.is_stopped().await {
                break;
            }
            tracing::info!(batch = index, specs = ?batch, "Batch started");
            let _ = ctx.events.send(EngineEvent::BatchStarted {
                batch: index,
                specs: batch.clone(),
            });

            execute_batch(&ctx, batch).await;

            let _ = ctx.events.send(EngineEvent::BatchCompleted { batch: index });
            ctx.monitor.set_batch_info(index + 1, total_batches).await;
        }

        let state = ctx.state.lock().await;
        let (status, error) = if state.stopped {
            (
                OrchestrationOutcome::Stopped,
                Some("Orchestration stopped".to_string()),
            )
        } else if state.failed.is_empty() {
            (OrchestrationOutcome::Completed, None)
        } else {
            (
                OrchestrationOutcome::Failed,
                Some(format!(
                    "{} spec(s) failed: {}",
                    state.failed.len(),
                    state.failed.join(", ")
                )),
            )
        };
        let result = OrchestrationResult {
            status,
            plan,
            completed: state.completed.clone(),
            failed: state.failed.clone(),
            skipped: state.skipped.clone(),
            error,
        };
        drop(state);

        let phase = match status {
            OrchestrationOutcome::Completed => OrchestrationPhase::Completed,
            OrchestrationOutcome::Failed => OrchestrationPhase::Failed,
            OrchestrationOutcome::Stopped => OrchestrationPhase::Stopped,
        };
        self.monitor.set_orchestration_state(phase).await;

        result
    }

    /// The subset of requested specs with no directory on disk.
    fn validate_spec_existence(&self, spec_names: &[String]) -> Vec<String> {
        let specs_root = self.workspace_root.join(".kiro").join("specs");
        spec_names
            .iter()
            .filter(|name| !specs_root.join(name).is_dir())
            .cloned()
            .collect()
    }
}

/// Run one batch: admission-gated fan-out, joined before returning.
async fn execute_batch(ctx: &Arc<ExecutionContext>, batch: &[String]) {
    let mut handles = Vec::new();

    for spec in batch {
        {
            let state = ctx.state.lock().await;
            if state.stopped {
                break;
            }
            if state.skipped.contains(spec) {
                continue;
            }
        }

        if !admit(ctx).await {
            break;
        }

        let ctx = Arc::clone(ctx);
        let spec = spec.clone();
        handles.push(tokio::spawn(async move {
            drive_spec(&ctx, &spec).await;
            ctx.governor.release().await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}

/// Wait for a launch slot. Returns false when the engine stopped while
/// waiting.
async fn admit(ctx: &Arc<ExecutionContext>) -> bool {
    loop {
        if ctx.is_stopped().await {
            return false;
        }

        match ctx.governor.try_admit(Instant::now()).await {
            Admission::Admitted {
                recovered,
                budget_used,
            } => {
                if let Some(effective) = recovered {
                    emit_recovered(ctx, effective).await;
                }
                if ctx.config.rate_limit.launch_budget_per_minute > 0 {
                    ctx.monitor
                        .update_launch_budget_telemetry(LaunchBudgetTelemetry {
                            budget_per_minute: ctx.config.rate_limit.launch_budget_per_minute,
                            window_ms: ctx.config.rate_limit.launch_budget_window_ms,
                            used: budget_used,
                            hold_ms: None,
                        })
                        .await;
                }
                return true;
            }
            Admission::Wait {
                duration,
                reason,
                recovered,
            } => {
                if let Some(effective) = recovered {
                    emit_recovered(ctx, effective).await;
                }
                match reason {
                    WaitReason::Capacity => {}
                    WaitReason::LaunchHold { hold_ms } => {
                        ctx.monitor.record_launch_hold(hold_ms).await;
                    }
                    WaitReason::LaunchBudget { hold_ms, used } => {
                        let _ = ctx.events.send(EngineEvent::LaunchBudgetHold {
                            hold_ms,
                            used,
                            budget_per_minute: ctx.config.rate_limit.launch_budget_per_minute,
                        });
                        ctx.monitor
                            .update_launch_budget_telemetry(LaunchBudgetTelemetry {
                                budget_per_minute: ctx.config.rate_limit.launch_budget_per_minute,
                                window_ms: ctx.config.rate_limit.launch_budget_window_ms,
                                used,
                                hold_ms: Some(hold_ms),
                            })
                            .await;
                    }
                }
                ctx.governor.wait_for_slot(duration).await;
            }
        }
    }
}

async fn emit_recovered(ctx: &Arc<ExecutionContext>, effective: usize) {
    tracing::info!(effective, "Parallelism recovered");
    let _ = ctx.events.send(EngineEvent::ParallelRecovered {
        effective_max: effective,
    });
    ctx.monitor
        .update_parallel_telemetry(ParallelEvent::Recovered, effective, ctx.configured_max)
        .await;
}

/// Per-spec state machine: spawn, await the terminal lifecycle event, then
/// complete, retry, or fail for good.
async fn drive_spec(ctx: &Arc<ExecutionContext>, spec_name: &str) {
    {
        let state = ctx.state.lock().await;
        if state.stopped || state.skipped.contains(&spec_name.to_string()) {
            return;
        }
    }

    let _ = ctx.events.send(EngineEvent::SpecStarted {
        spec_name: spec_name.to_string(),
    });
    transition_lifecycle(ctx, spec_name, SpecPhase::Assigned).await;

    loop {
        ctx.monitor
            .update_spec_status(spec_name, SpecStatus::Running, None, None)
            .await;
        transition_lifecycle(ctx, spec_name, SpecPhase::InProgress).await;

        let mut rx = ctx.spawner.subscribe();
        let outcome = match ctx.spawner.spawn(spec_name).await {
            Ok(agent) => wait_for_agent(ctx, &mut rx, &agent.agent_id).await,
            Err(e) => AttemptOutcome {
                agent_id: None,
                terminal: Terminal::Failed {
                    error_text: e.to_string(),
                    is_timeout: false,
                },
            },
        };

        match outcome.terminal {
            Terminal::Completed => {
                ctx.state
                    .lock()
                    .await
                    .completed
                    .push(spec_name.to_string());
                ctx.monitor
                    .update_spec_status(spec_name, SpecStatus::Completed, outcome.agent_id, None)
                    .await;
                transition_lifecycle(ctx, spec_name, SpecPhase::Completed).await;
                ctx.monitor
                    .sync_external_status(spec_name, SpecStatus::Completed)
                    .await;
                tracing::info!(spec_name, "Spec completed");
                let _ = ctx.events.send(EngineEvent::SpecCompleted {
                    spec_name: spec_name.to_string(),
                });
                return;
            }
            Terminal::Failed {
                error_text,
                is_timeout,
            } => {
                let disposition = handle_spec_failed(
                    ctx,
                    spec_name,
                    outcome.agent_id.clone(),
                    &error_text,
                    is_timeout,
                )
                .await;
                match disposition {
                    Disposition::Retry { backoff } => {
                        if let Some(delay) = backoff {
                            if ctx.is_stopped().await {
                                final_failure(ctx, spec_name, outcome.agent_id, &error_text).await;
                                return;
                            }
                            tokio::time::sleep(delay).await;
                        }
                        if ctx.is_stopped().await {
                            final_failure(ctx, spec_name, outcome.agent_id, &error_text).await;
                            return;
                        }
                    }
                    Disposition::Final => return,
                }
            }
        }
    }
}

/// Await the terminal lifecycle event for one agent, with a watchdog so a
/// silent agent cannot deadlock the scheduler.
async fn wait_for_agent(
    ctx: &Arc<ExecutionContext>,
    rx: &mut broadcast::Receiver<AgentEvent>,
    agent_id: &str,
) -> AttemptOutcome {
    let watchdog = if ctx.config.timeout_seconds > 0 {
        Duration::from_secs(ctx.config.timeout_seconds) + WATCHDOG_SLACK
    } else {
        WATCHDOG_DEFAULT
    };
    let deadline = tokio::time::sleep(watchdog);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => {
                return AttemptOutcome {
                    agent_id: Some(agent_id.to_string()),
                    terminal: Terminal::Failed {
                        error_text: format!(
                            "Agent {agent_id} reached the watchdog interval without lifecycle events"
                        ),
                        is_timeout: true,
                    },
                };
            }
            event = rx.recv() => match event {
                Ok(event) if event.agent_id() == agent_id => match event {
                    AgentEvent::Output { .. } => {}
                    AgentEvent::Completed { .. } => {
                        return AttemptOutcome {
                            agent_id: Some(agent_id.to_string()),
                            terminal: Terminal::Completed,
                        };
                    }
                    AgentEvent::Failed { stderr, error, exit_code, .. } => {
                        let error_text = if !stderr.trim().is_empty() {
                            stderr
                        } else if let Some(error) = error {
                            error
                        } else {
                            format!("Agent exited with code {exit_code:?}")
                        };
                        return AttemptOutcome {
                            agent_id: Some(agent_id.to_string()),
                            terminal: Terminal::Failed { error_text, is_timeout: false },
                        };
                    }
                    AgentEvent::Timeout { timeout_seconds, .. } => {
                        return AttemptOutcome {
                            agent_id: Some(agent_id.to_string()),
                            terminal: Terminal::Failed {
                                error_text: format!("Agent timed out after {timeout_seconds}s"),
                                is_timeout: true,
                            },
                        };
                    }
                },
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(agent_id, skipped, "Agent event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return AttemptOutcome {
                        agent_id: Some(agent_id.to_string()),
                        terminal: Terminal::Failed {
                            error_text: format!(
                                "Agent {agent_id} event stream closed without lifecycle events"
                            ),
                            is_timeout: true,
                        },
                    };
                }
            }
        }
    }
}

/// Decide between retry and final failure for one failed attempt.
async fn handle_spec_failed(
    ctx: &Arc<ExecutionContext>,
    spec_name: &str,
    agent_id: Option<String>,
    error_text: &str,
    is_timeout: bool,
) -> Disposition {
    if ctx.is_stopped().await {
        final_failure(ctx, spec_name, agent_id, error_text).await;
        return Disposition::Final;
    }

    // Timeouts retry on the generic schedule regardless of stderr content.
    let class = if is_timeout {
        FailureClass::Generic
    } else {
        classify(error_text)
    };
    let rate_limited = class == FailureClass::RateLimit;

    let effective_budget = if rate_limited {
        ctx.max_retries
            .max(ctx.config.rate_limit.max_retries.unwrap_or(0))
    } else {
        ctx.max_retries
    };
    let retry_count = {
        let state = ctx.state.lock().await;
        state.retry_counts.get(spec_name).copied().unwrap_or(0)
    };

    if retry_count >= effective_budget {
        final_failure(ctx, spec_name, agent_id, error_text).await;
        return Disposition::Final;
    }

    ctx.monitor.increment_retry(spec_name).await;
    ctx.state
        .lock()
        .await
        .retry_counts
        .insert(spec_name.to_string(), retry_count + 1);

    if !rate_limited {
        tracing::warn!(
            spec_name,
            retry = retry_count + 1,
            max = effective_budget,
            "Spec attempt failed, retrying"
        );
        return Disposition::Retry { backoff: None };
    }

    let jitter = (ctx.jitter)();
    let mut backoff_ms = rate_limit_backoff_ms(
        ctx.config.rate_limit.backoff_base_ms,
        ctx.config.rate_limit.backoff_max_ms,
        retry_count,
        jitter,
    );
    if let Some(hint_ms) = parse_retry_after_ms(error_text) {
        backoff_ms = backoff_ms.max(hint_ms);
    }

    if let Some(effective) = ctx
        .governor
        .on_rate_limit_signal(Duration::from_millis(backoff_ms), Instant::now())
        .await
    {
        tracing::warn!(effective, "Parallelism throttled by rate limit signal");
        let _ = ctx.events.send(EngineEvent::ParallelThrottled {
            effective_max: effective,
        });
        ctx.monitor
            .update_parallel_telemetry(ParallelEvent::Throttled, effective, ctx.configured_max)
            .await;
    }

    ctx.monitor
        .record_rate_limit_event(RateLimitEvent {
            spec_name: spec_name.to_string(),
            retry_delay_ms: backoff_ms,
            signal_at: Utc::now(),
        })
        .await;
    let _ = ctx.events.send(EngineEvent::SpecRateLimited {
        spec_name: spec_name.to_string(),
        retry_delay_ms: backoff_ms,
    });
    tracing::warn!(
        spec_name,
        backoff_ms,
        retry = retry_count + 1,
        "Rate limited, backing off before retry"
    );

    Disposition::Retry {
        backoff: Some(Duration::from_millis(backoff_ms)),
    }
}

/// Mark a spec failed for good and skip its dependents.
async fn final_failure(
    ctx: &Arc<ExecutionContext>,
    spec_name: &str,
    agent_id: Option<String>,
    error_text: &str,
) {
    {
        let mut state = ctx.state.lock().await;
        if !state.failed.contains(&spec_name.to_string()) {
            state.failed.push(spec_name.to_string());
        }
    }

    ctx.monitor
        .update_spec_status(
            spec_name,
            SpecStatus::Failed,
            agent_id,
            Some(error_text.to_string()),
        )
        .await;
    transition_lifecycle(ctx, spec_name, SpecPhase::Failed).await;
    propagate_failure(ctx, spec_name).await;

    tracing::error!(spec_name, error = error_text, "Spec failed");
    let _ = ctx.events.send(EngineEvent::SpecFailed {
        spec_name: spec_name.to_string(),
        error: error_text.to_string(),
    });
}

/// Skip every unfinished direct or transitive dependent of a failed spec,
/// exactly once each.
async fn propagate_failure(ctx: &Arc<ExecutionContext>, spec_name: &str) {
    let mut dependents: Vec<String> = ctx.plan.all_dependents(spec_name).into_iter().collect();
    dependents.sort();

    for dependent in dependents {
        let newly_skipped = {
            let mut state = ctx.state.lock().await;
            if state.completed.contains(&dependent) || state.skipped.contains(&dependent) {
                false
            } else {
                state.skipped.push(dependent.clone());
                true
            }
        };

        if newly_skipped {
            ctx.monitor
                .update_spec_status(
                    &dependent,
                    SpecStatus::Skipped,
                    None,
                    Some(format!("Skipped because dependency {spec_name} failed")),
                )
                .await;
            tracing::warn!(spec = %dependent, failed_dependency = spec_name, "Spec skipped");
        }
    }
}

/// Best-effort lifecycle transition: log and continue on failure.
async fn transition_lifecycle(ctx: &Arc<ExecutionContext>, spec_name: &str, phase: SpecPhase) {
    if let Err(e) = ctx.lifecycle.transition(spec_name, phase).await {
        tracing::warn!(spec_name, %phase, error = %e, "Lifecycle transition failed");
    }
}
