//! End-to-end engine scenarios against a scripted spawner.
//!
//! Time-dependent scenarios run under a paused tokio clock, so backoff and
//! cooldown sleeps advance deterministically.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};

use common::{deps, names, scripted_engine, workspace_with_specs, Attempt};
use kse::domain::models::{Config, EngineEvent, OrchestrationOutcome};
use kse::services::StartOptions;

fn succeed(delay_ms: u64) -> Attempt {
    Attempt::Succeed { delay_ms }
}

fn fail(stderr: &str, delay_ms: u64) -> Attempt {
    Attempt::Fail {
        stderr: stderr.to_string(),
        delay_ms,
    }
}

fn scripts(entries: &[(&str, Vec<Attempt>)]) -> HashMap<String, Vec<Attempt>> {
    entries
        .iter()
        .map(|(spec, attempts)| ((*spec).to_string(), attempts.clone()))
        .collect()
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn event_names(events: &[EngineEvent]) -> Vec<String> {
    events
        .iter()
        .map(|event| match event {
            EngineEvent::BatchStarted { batch, .. } => format!("batch:start {batch}"),
            EngineEvent::BatchCompleted { batch } => format!("batch:complete {batch}"),
            EngineEvent::SpecStarted { spec_name } => format!("spec:start {spec_name}"),
            EngineEvent::SpecCompleted { spec_name } => format!("spec:complete {spec_name}"),
            EngineEvent::SpecFailed { spec_name, .. } => format!("spec:failed {spec_name}"),
            EngineEvent::SpecRateLimited { spec_name, .. } => {
                format!("spec:rate-limited {spec_name}")
            }
            EngineEvent::ParallelThrottled { effective_max } => {
                format!("parallel:throttled {effective_max}")
            }
            EngineEvent::ParallelRecovered { effective_max } => {
                format!("parallel:recovered {effective_max}")
            }
            EngineEvent::LaunchBudgetHold { .. } => "launch-budget:hold".to_string(),
            EngineEvent::OrchestrationCompleted { .. } => "orchestration:complete".to_string(),
        })
        .collect()
}

/// S1: linear chain, all succeed, events in program order.
#[tokio::test(start_paused = true)]
async fn linear_chain_completes_in_order() {
    let workspace = workspace_with_specs(&["a", "b", "c"]);
    let (engine, _spawner) = scripted_engine(
        workspace.path(),
        Config::default(),
        deps(&[("b", &["a"]), ("c", &["b"])]),
        scripts(&[
            ("a", vec![succeed(10)]),
            ("b", vec![succeed(10)]),
            ("c", vec![succeed(10)]),
        ]),
    );
    let mut rx = engine.subscribe();

    let result = engine
        .start(&names(&["a", "b", "c"]), StartOptions::default())
        .await;

    assert_eq!(result.status, OrchestrationOutcome::Completed);
    assert_eq!(result.completed, names(&["a", "b", "c"]));
    assert!(result.failed.is_empty());
    assert!(result.skipped.is_empty());
    assert_eq!(
        result.plan.batches,
        vec![names(&["a"]), names(&["b"]), names(&["c"])]
    );

    let events = event_names(&drain(&mut rx));
    assert_eq!(
        events,
        vec![
            "batch:start 0",
            "spec:start a",
            "spec:complete a",
            "batch:complete 0",
            "batch:start 1",
            "spec:start b",
            "spec:complete b",
            "batch:complete 1",
            "batch:start 2",
            "spec:start c",
            "spec:complete c",
            "batch:complete 2",
            "orchestration:complete",
        ]
    );
}

/// S2: diamond dependency graph, middle batch runs concurrently within the
/// parallelism bound.
#[tokio::test(start_paused = true)]
async fn diamond_runs_middle_batch_in_parallel() {
    let workspace = workspace_with_specs(&["a", "b", "c", "d"]);
    let (engine, spawner) = scripted_engine(
        workspace.path(),
        Config::default(),
        deps(&[("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]),
        scripts(&[
            ("a", vec![succeed(10)]),
            ("b", vec![succeed(50)]),
            ("c", vec![succeed(50)]),
            ("d", vec![succeed(10)]),
        ]),
    );

    let result = engine
        .start(&names(&["a", "b", "c", "d"]), StartOptions::default())
        .await;

    assert_eq!(result.status, OrchestrationOutcome::Completed);
    assert_eq!(result.plan.batches.len(), 3);
    assert_eq!(result.plan.batches[0], names(&["a"]));
    assert_eq!(result.plan.batches[1], names(&["b", "c"]));
    assert_eq!(result.plan.batches[2], names(&["d"]));

    let peak = spawner.peak_concurrency().await;
    assert_eq!(peak, 2, "b and c overlap, nothing else does");
}

/// S3: failure propagation skips dependents without spawning them.
#[tokio::test(start_paused = true)]
async fn failed_dependency_skips_dependents() {
    let workspace = workspace_with_specs(&["a", "b"]);
    let config = Config {
        max_retries: 0,
        ..Config::default()
    };
    let (engine, spawner) = scripted_engine(
        workspace.path(),
        config,
        deps(&[("b", &["a"])]),
        scripts(&[("a", vec![fail("boom", 10)]), ("b", vec![succeed(10)])]),
    );
    let mut rx = engine.subscribe();

    let result = engine
        .start(&names(&["a", "b"]), StartOptions::default())
        .await;

    assert_eq!(result.status, OrchestrationOutcome::Failed);
    assert_eq!(result.failed, names(&["a"]));
    assert_eq!(result.skipped, names(&["b"]));
    assert_eq!(spawner.spawn_count("b").await, 0, "b must never be spawned");

    let snapshot = engine.monitor().get_orchestration_status().await;
    let b_state = &snapshot.specs["b"];
    assert_eq!(b_state.agent_id, None);
    assert!(b_state
        .error_message
        .as_deref()
        .unwrap()
        .contains("dependency a failed"));

    let events = event_names(&drain(&mut rx));
    assert!(events.contains(&"spec:failed a".to_string()));
    assert!(!events.contains(&"spec:start b".to_string()));
}

/// S4: retries re-invoke the spawner until the budget or success.
#[tokio::test(start_paused = true)]
async fn spec_retries_to_success() {
    let workspace = workspace_with_specs(&["a"]);
    let config = Config {
        max_retries: 2,
        ..Config::default()
    };
    let (engine, spawner) = scripted_engine(
        workspace.path(),
        config,
        HashMap::new(),
        scripts(&[(
            "a",
            vec![
                Attempt::SpawnFailure {
                    error: "registry offline".to_string(),
                },
                fail("transient", 10),
                succeed(10),
            ],
        )]),
    );

    let result = engine.start(&names(&["a"]), StartOptions::default()).await;

    assert_eq!(result.status, OrchestrationOutcome::Completed);
    assert_eq!(result.completed, names(&["a"]));
    assert_eq!(spawner.spawn_count("a").await, 3);

    let snapshot = engine.monitor().get_orchestration_status().await;
    assert_eq!(snapshot.specs["a"].retry_count, 2);
}

/// Retry boundary: at retry_count == max_retries the spec fails for good.
#[tokio::test(start_paused = true)]
async fn retry_budget_exhaustion_is_final() {
    let workspace = workspace_with_specs(&["a"]);
    let config = Config {
        max_retries: 1,
        ..Config::default()
    };
    let (engine, spawner) = scripted_engine(
        workspace.path(),
        config,
        HashMap::new(),
        scripts(&[(
            "a",
            vec![fail("first", 10), fail("second", 10), succeed(10)],
        )]),
    );

    let result = engine.start(&names(&["a"]), StartOptions::default()).await;

    assert_eq!(result.status, OrchestrationOutcome::Failed);
    assert_eq!(result.failed, names(&["a"]));
    assert_eq!(
        spawner.spawn_count("a").await,
        2,
        "one initial attempt plus one retry"
    );

    let snapshot = engine.monitor().get_orchestration_status().await;
    assert!(snapshot.specs["a"]
        .error_message
        .as_deref()
        .unwrap()
        .contains("second"));
}

/// S5: Retry-After dominates the computed exponential backoff.
#[tokio::test(start_paused = true)]
async fn retry_after_hint_overrides_backoff() {
    let workspace = workspace_with_specs(&["a"]);
    let mut config = Config {
        max_retries: 1,
        ..Config::default()
    };
    config.rate_limit.backoff_base_ms = 200;
    config.rate_limit.backoff_max_ms = 5000;
    let (engine, _spawner) = scripted_engine(
        workspace.path(),
        config,
        HashMap::new(),
        scripts(&[(
            "a",
            vec![
                fail("429 Too Many Requests. Retry-After: 7", 0),
                succeed(0),
            ],
        )]),
    );
    let mut rx = engine.subscribe();

    let started = Instant::now();
    let result = engine.start(&names(&["a"]), StartOptions::default()).await;
    let elapsed = started.elapsed();

    assert_eq!(result.status, OrchestrationOutcome::Completed);
    assert!(
        elapsed >= Duration::from_millis(7000),
        "Retry-After must dominate the 100 ms computed backoff, slept {elapsed:?}"
    );
    assert!(elapsed < Duration::from_millis(8000));

    let snapshot = engine.monitor().get_orchestration_status().await;
    assert_eq!(snapshot.rate_limit.signal_count, 1);
    assert_eq!(snapshot.rate_limit.total_backoff_ms, 7000);
    assert_eq!(snapshot.specs["a"].retry_count, 1);

    let events = event_names(&drain(&mut rx));
    assert!(events.contains(&"spec:rate-limited a".to_string()));
}

/// Dedicated rate-limit retry budget extends the generic one.
#[tokio::test(start_paused = true)]
async fn rate_limit_budget_extends_generic_budget() {
    let workspace = workspace_with_specs(&["a"]);
    let mut config = Config {
        max_retries: 0,
        ..Config::default()
    };
    config.rate_limit.max_retries = Some(2);
    config.rate_limit.backoff_base_ms = 100;
    config.rate_limit.backoff_max_ms = 1000;
    let (engine, spawner) = scripted_engine(
        workspace.path(),
        config,
        HashMap::new(),
        scripts(&[(
            "a",
            vec![fail("rate limit", 0), fail("rate limit", 0), succeed(0)],
        )]),
    );

    let result = engine.start(&names(&["a"]), StartOptions::default()).await;

    assert_eq!(result.status, OrchestrationOutcome::Completed);
    assert_eq!(spawner.spawn_count("a").await, 3);
}

/// S6: consecutive signals halve the effective parallelism, quiet windows
/// recover it one unit at a time.
#[tokio::test(start_paused = true)]
async fn adaptive_parallelism_throttles_then_recovers() {
    let workspace = workspace_with_specs(&["r1", "r2", "late"]);
    let mut config = Config {
        max_parallel: 8,
        max_retries: 1,
        ..Config::default()
    };
    config.rate_limit.backoff_base_ms = 4000;
    config.rate_limit.backoff_max_ms = 10_000;
    config.rate_limit.cooldown_ms = 1000;
    let (engine, _spawner) = scripted_engine(
        workspace.path(),
        config,
        deps(&[("late", &["r1", "r2"])]),
        scripts(&[
            ("r1", vec![fail("429 too many requests", 0), succeed(0)]),
            ("r2", vec![fail("429 too many requests", 0), succeed(0)]),
            ("late", vec![succeed(0)]),
        ]),
    );
    let mut rx = engine.subscribe();

    let result = engine
        .start(&names(&["r1", "r2", "late"]), StartOptions::default())
        .await;

    assert_eq!(result.status, OrchestrationOutcome::Completed);

    let events = event_names(&drain(&mut rx));
    let throttles: Vec<&String> = events
        .iter()
        .filter(|e| e.starts_with("parallel:throttled"))
        .collect();
    assert_eq!(
        throttles,
        vec!["parallel:throttled 4", "parallel:throttled 2"],
        "two consecutive signals halve 8 -> 4 -> 2"
    );
    assert!(
        events.iter().any(|e| e.starts_with("parallel:recovered")),
        "the late admission after the cooldown must recover capacity"
    );

    let snapshot = engine.monitor().get_orchestration_status().await;
    assert_eq!(snapshot.adaptive_parallel.configured_max, 8);
    assert!(snapshot.adaptive_parallel.last_throttle_at.is_some());
    assert!(snapshot.adaptive_parallel.last_recovery_at.is_some());
    assert_eq!(snapshot.rate_limit.signal_count, 2);
}

/// Parallelism bound: the peak of concurrently running agents never
/// exceeds max_parallel.
#[tokio::test(start_paused = true)]
async fn parallelism_bound_is_respected() {
    for max_parallel in [1usize, 2, 3] {
        let spec_names = ["s0", "s1", "s2", "s3", "s4", "s5"];
        let workspace = workspace_with_specs(&spec_names);
        let config = Config {
            max_parallel,
            ..Config::default()
        };
        let (engine, spawner) = scripted_engine(
            workspace.path(),
            config,
            HashMap::new(),
            scripts(
                &spec_names
                    .iter()
                    .map(|s| (*s, vec![succeed(50)]))
                    .collect::<Vec<_>>(),
            ),
        );

        let result = engine.start(&names(&spec_names), StartOptions::default()).await;

        assert_eq!(result.status, OrchestrationOutcome::Completed);
        let peak = spawner.peak_concurrency().await;
        assert!(
            peak <= max_parallel,
            "peak {peak} exceeded max_parallel {max_parallel}"
        );
        if max_parallel == 1 {
            assert_eq!(peak, 1);
        }
    }
}

/// The per-start override caps the configured parallelism.
#[tokio::test(start_paused = true)]
async fn start_options_cap_parallelism() {
    let spec_names = ["s0", "s1", "s2", "s3"];
    let workspace = workspace_with_specs(&spec_names);
    let config = Config {
        max_parallel: 8,
        ..Config::default()
    };
    let (engine, spawner) = scripted_engine(
        workspace.path(),
        config,
        HashMap::new(),
        scripts(
            &spec_names
                .iter()
                .map(|s| (*s, vec![succeed(50)]))
                .collect::<Vec<_>>(),
        ),
    );

    let result = engine
        .start(
            &names(&spec_names),
            StartOptions {
                max_parallel: Some(1),
            },
        )
        .await;

    assert_eq!(result.status, OrchestrationOutcome::Completed);
    assert_eq!(spawner.peak_concurrency().await, 1);
}

/// A silent agent is broken out of by the watchdog and retried.
#[tokio::test(start_paused = true)]
async fn watchdog_breaks_silent_agents() {
    let workspace = workspace_with_specs(&["a"]);
    let config = Config {
        max_retries: 1,
        ..Config::default()
    };
    let (engine, spawner) = scripted_engine(
        workspace.path(),
        config,
        HashMap::new(),
        scripts(&[("a", vec![Attempt::Silent, succeed(10)])]),
    );

    let result = engine.start(&names(&["a"]), StartOptions::default()).await;

    assert_eq!(result.status, OrchestrationOutcome::Completed);
    assert_eq!(spawner.spawn_count("a").await, 2);
}

/// Timeout events retry on the generic schedule, not the rate-limit one.
#[tokio::test(start_paused = true)]
async fn timeouts_are_retried_as_failures() {
    let workspace = workspace_with_specs(&["a"]);
    let config = Config {
        max_retries: 1,
        ..Config::default()
    };
    let (engine, _spawner) = scripted_engine(
        workspace.path(),
        config,
        HashMap::new(),
        scripts(&[(
            "a",
            vec![
                Attempt::Timeout {
                    timeout_seconds: 30,
                    delay_ms: 10,
                },
                succeed(10),
            ],
        )]),
    );

    let result = engine.start(&names(&["a"]), StartOptions::default()).await;

    assert_eq!(result.status, OrchestrationOutcome::Completed);
    let snapshot = engine.monitor().get_orchestration_status().await;
    assert_eq!(snapshot.rate_limit.signal_count, 0);
    assert_eq!(snapshot.specs["a"].retry_count, 1);
}

/// Stopped engines never schedule another retry, whatever the budget.
#[tokio::test(start_paused = true)]
async fn stop_short_circuits_retries() {
    let workspace = workspace_with_specs(&["a"]);
    let config = Config {
        max_retries: 5,
        ..Config::default()
    };
    let (engine, spawner) = scripted_engine(
        workspace.path(),
        config,
        HashMap::new(),
        scripts(&[(
            "a",
            vec![fail("slow failure", 5000), succeed(0)],
        )]),
    );

    let runner = Arc::clone(&engine);
    let run = tokio::spawn(async move {
        runner.start(&names(&["a"]), StartOptions::default()).await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.stop().await;
    let result = run.await.unwrap();

    assert_eq!(result.status, OrchestrationOutcome::Stopped);
    assert_eq!(result.failed, names(&["a"]));
    assert_eq!(
        spawner.spawn_count("a").await,
        1,
        "no retry may happen after stop"
    );
}

/// A second start while one is in flight is rejected.
#[tokio::test(start_paused = true)]
async fn concurrent_start_is_rejected() {
    let workspace = workspace_with_specs(&["a"]);
    let (engine, _spawner) = scripted_engine(
        workspace.path(),
        Config::default(),
        HashMap::new(),
        scripts(&[("a", vec![succeed(500)])]),
    );

    let first = Arc::clone(&engine);
    let run = tokio::spawn(async move {
        first.start(&names(&["a"]), StartOptions::default()).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = engine.start(&names(&["a"]), StartOptions::default()).await;
    assert_eq!(second.status, OrchestrationOutcome::Failed);
    assert!(second
        .error
        .unwrap()
        .contains("Orchestration is already running"));

    let first_result = run.await.unwrap();
    assert_eq!(first_result.status, OrchestrationOutcome::Completed);
}

/// After a run finishes the engine is reusable.
#[tokio::test(start_paused = true)]
async fn engine_returns_to_idle_after_a_run() {
    let workspace = workspace_with_specs(&["a"]);
    let (engine, _spawner) = scripted_engine(
        workspace.path(),
        Config::default(),
        HashMap::new(),
        scripts(&[("a", vec![succeed(10), succeed(10)])]),
    );

    let first = engine.start(&names(&["a"]), StartOptions::default()).await;
    assert_eq!(first.status, OrchestrationOutcome::Completed);

    let second = engine.start(&names(&["a"]), StartOptions::default()).await;
    assert_eq!(second.status, OrchestrationOutcome::Completed);
}

/// Deep failure propagation: every transitive dependent is skipped, nothing
/// else is.
#[tokio::test(start_paused = true)]
async fn propagation_skips_exactly_the_transitive_dependents() {
    let workspace = workspace_with_specs(&["root", "mid", "leaf", "other"]);
    let config = Config {
        max_retries: 0,
        ..Config::default()
    };
    let (engine, spawner) = scripted_engine(
        workspace.path(),
        config,
        deps(&[("mid", &["root"]), ("leaf", &["mid"]), ("other", &[])]),
        scripts(&[
            ("root", vec![fail("boom", 10)]),
            ("other", vec![succeed(10)]),
            ("mid", vec![succeed(10)]),
            ("leaf", vec![succeed(10)]),
        ]),
    );

    let result = engine
        .start(
            &names(&["root", "mid", "leaf", "other"]),
            StartOptions::default(),
        )
        .await;

    assert_eq!(result.status, OrchestrationOutcome::Failed);
    assert_eq!(result.failed, names(&["root"]));
    let mut skipped = result.skipped.clone();
    skipped.sort();
    assert_eq!(skipped, names(&["leaf", "mid"]));
    assert_eq!(result.completed, names(&["other"]));
    assert_eq!(spawner.spawn_count("mid").await, 0);
    assert_eq!(spawner.spawn_count("leaf").await, 0);
}

/// The launch budget holds back spawns once the window is spent.
#[tokio::test(start_paused = true)]
async fn launch_budget_paces_spawns() {
    let spec_names = ["s0", "s1", "s2"];
    let workspace = workspace_with_specs(&spec_names);
    let mut config = Config {
        max_parallel: 3,
        ..Config::default()
    };
    config.rate_limit.launch_budget_per_minute = 2;
    config.rate_limit.launch_budget_window_ms = 1000;
    let (engine, _spawner) = scripted_engine(
        workspace.path(),
        config,
        HashMap::new(),
        scripts(
            &spec_names
                .iter()
                .map(|s| (*s, vec![succeed(10)]))
                .collect::<Vec<_>>(),
        ),
    );
    let mut rx = engine.subscribe();

    let started = Instant::now();
    let result = engine.start(&names(&spec_names), StartOptions::default()).await;
    let elapsed = started.elapsed();

    assert_eq!(result.status, OrchestrationOutcome::Completed);
    assert!(
        elapsed >= Duration::from_millis(1000),
        "third spawn must wait for the window, elapsed {elapsed:?}"
    );

    let events = event_names(&drain(&mut rx));
    assert!(events.contains(&"launch-budget:hold".to_string()));

    let snapshot = engine.monitor().get_orchestration_status().await;
    assert!(snapshot.rate_limit.launch_budget_hold_count >= 1);
    assert_eq!(snapshot.rate_limit.launch_budget_per_minute, 2);
}
