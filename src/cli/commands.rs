//! Command handlers.

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use console::style;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::domain::models::{Config, OrchestrationOutcome, OrchestrationResult, SpecStatus};
use crate::domain::ports::{
    DependencyManager, LocalAgentRegistry, ManifestDependencyManager, NullContextSync,
    NullSpecLifecycleManager, StaticConfigProvider, StaticDependencyManager,
};
use crate::infrastructure::status_file;
use crate::services::{CodexSpawner, Engine, StartOptions, StatusMonitor};

/// Run the orchestration for the given specs and persist the snapshot.
pub async fn handle_run(
    workspace: &Path,
    config: Config,
    specs: Vec<String>,
    max_parallel: Option<usize>,
    dep_flags: Vec<String>,
    json: bool,
) -> Result<()> {
    let provider = Arc::new(StaticConfigProvider::new(config));
    let dependency_manager: Arc<dyn DependencyManager> = if dep_flags.is_empty() {
        Arc::new(ManifestDependencyManager::new(workspace))
    } else {
        Arc::new(StaticDependencyManager::new(parse_dep_flags(&dep_flags)?))
    };
    let registry = Arc::new(LocalAgentRegistry::new());
    let spawner = Arc::new(CodexSpawner::new(workspace, provider.clone(), registry));
    let monitor = Arc::new(StatusMonitor::new(Arc::new(NullContextSync::new())));
    let engine = Arc::new(Engine::new(
        workspace,
        provider,
        dependency_manager,
        Arc::new(NullSpecLifecycleManager::new()),
        spawner,
        monitor,
    ));

    let stopper = Arc::clone(&engine);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping orchestration");
            stopper.stop().await;
        }
    });

    let result = engine.start(&specs, StartOptions { max_parallel }).await;

    let snapshot = engine.monitor().get_orchestration_status().await;
    if let Err(e) = status_file::save(workspace, &snapshot) {
        tracing::warn!(error = %e, "Failed to persist orchestration status");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    match result.status {
        OrchestrationOutcome::Completed => Ok(()),
        status => anyhow::bail!("Orchestration finished with status {status}"),
    }
}

/// Display the last persisted snapshot.
pub fn handle_status(workspace: &Path, json: bool) -> Result<()> {
    let snapshot = status_file::load(workspace)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!(
        "Orchestration: {}  (batch {}/{})",
        style(&snapshot.state).bold(),
        snapshot.current_batch,
        snapshot.total_batches
    );
    println!(
        "Specs: {} total, {} completed, {} failed, {} skipped, {} running",
        snapshot.total_specs,
        snapshot.completed_specs,
        snapshot.failed_specs,
        snapshot.skipped_specs,
        snapshot.running_specs
    );
    if snapshot.rate_limit.signal_count > 0 {
        println!(
            "Rate limits: {} signal(s), {} ms total backoff",
            snapshot.rate_limit.signal_count, snapshot.rate_limit.total_backoff_ms
        );
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Spec", "Status", "Batch", "Retries", "Error"]);
    let mut specs: Vec<_> = snapshot.specs.iter().collect();
    specs.sort_by_key(|(_, state)| (state.batch_index, state.updated_at));
    for (name, state) in specs {
        table.add_row([
            Cell::new(name),
            Cell::new(status_label(state.status)),
            Cell::new(state.batch_index),
            Cell::new(state.retry_count),
            Cell::new(state.error_message.as_deref().unwrap_or("-")),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Print the bootstrap prompt for a spec.
pub fn handle_prompt(workspace: &Path, config: &Config, spec: &str) -> Result<()> {
    let builder = crate::services::BootstrapPromptBuilder::new(workspace, config.agent.clone());
    let prompt = builder
        .build_prompt(spec)
        .context("Failed to build bootstrap prompt")?;
    println!("{prompt}");
    Ok(())
}

fn print_result(result: &OrchestrationResult) {
    let headline = match result.status {
        OrchestrationOutcome::Completed => style("completed").green().bold(),
        OrchestrationOutcome::Failed => style("failed").red().bold(),
        OrchestrationOutcome::Stopped => style("stopped").yellow().bold(),
    };
    println!("Orchestration {headline}");
    if let Some(ref error) = result.error {
        println!("  {error}");
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Batch", "Specs"]);
    for (index, batch) in result.plan.batches.iter().enumerate() {
        table.add_row([Cell::new(index), Cell::new(batch.join(", "))]);
    }
    if !result.plan.batches.is_empty() {
        println!("{table}");
    }

    println!(
        "completed: [{}]  failed: [{}]  skipped: [{}]",
        result.completed.join(", "),
        result.failed.join(", "),
        result.skipped.join(", ")
    );
}

fn status_label(status: SpecStatus) -> String {
    match status {
        SpecStatus::Completed => style("completed").green().to_string(),
        SpecStatus::Failed | SpecStatus::Timeout => style(status).red().to_string(),
        SpecStatus::Skipped => style("skipped").yellow().to_string(),
        SpecStatus::Running => style("running").cyan().to_string(),
        SpecStatus::Pending => "pending".to_string(),
    }
}

/// Parse repeated `--dep spec=prereq[,prereq...]` flags into a map.
fn parse_dep_flags(flags: &[String]) -> Result<HashMap<String, Vec<String>>> {
    let mut deps: HashMap<String, Vec<String>> = HashMap::new();
    for flag in flags {
        let (spec, prereqs) = flag
            .split_once('=')
            .with_context(|| format!("Invalid --dep value '{flag}', expected SPEC=PREREQ[,...]"))?;
        let spec = spec.trim();
        if spec.is_empty() {
            anyhow::bail!("Invalid --dep value '{flag}': empty spec name");
        }
        let list = deps.entry(spec.to_string()).or_default();
        for prereq in prereqs.split(',') {
            let prereq = prereq.trim();
            if !prereq.is_empty() {
                list.push(prereq.to_string());
            }
        }
    }
    Ok(deps)
}
