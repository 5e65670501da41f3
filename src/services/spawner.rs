//! Agent spawner: one codex child process per spec.
//!
//! The spawner owns every live child. It resolves the command and API key,
//! delivers the bootstrap prompt, parses the child's JSON-lines stdout into
//! typed events, enforces the per-agent timeout with a SIGTERM then SIGKILL
//! escalation, and broadcasts lifecycle events to subscribers.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::Duration;

use crate::domain::models::{AgentEvent, AgentStatus, SpawnedAgent};
use crate::domain::ports::{AgentRegistry, AgentSpawner, ConfigProvider, SpawnError};
use crate::services::prompt_builder::BootstrapPromptBuilder;

/// Grace period between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Prompts larger than this are delivered through a temp file instead of
/// argv.
const PROMPT_ARGV_LIMIT: usize = 30 * 1024;

/// Broadcast channel capacity for agent events.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy)]
enum KillSignal {
    Term,
    Kill,
}

struct AgentEntry {
    record: SpawnedAgent,
    kill_tx: mpsc::Sender<KillSignal>,
    done: watch::Receiver<bool>,
    timers: Vec<tokio::task::JoinHandle<()>>,
}

/// Spawner backed by real `codex` child processes.
pub struct CodexSpawner {
    workspace_root: PathBuf,
    config_provider: Arc<dyn ConfigProvider>,
    registry: Arc<dyn AgentRegistry>,
    agents: Arc<Mutex<HashMap<String, AgentEntry>>>,
    events: broadcast::Sender<AgentEvent>,
}

impl CodexSpawner {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        config_provider: Arc<dyn ConfigProvider>,
        registry: Arc<dyn AgentRegistry>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            workspace_root: workspace_root.into(),
            config_provider,
            registry,
            agents: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }
}

#[async_trait]
impl AgentSpawner for CodexSpawner {
    async fn spawn(&self, spec_name: &str) -> Result<SpawnedAgent, SpawnError> {
        let config = self
            .config_provider
            .get_config()
            .await
            .map_err(|e| SpawnError::Prompt(e.to_string()))?;

        let builder = BootstrapPromptBuilder::new(&self.workspace_root, config.agent.clone());
        let prompt = builder
            .build_prompt(spec_name)
            .map_err(|e| SpawnError::Prompt(e.to_string()))?;
        if prompt.trim().is_empty() {
            return Err(SpawnError::InvalidPrompt);
        }

        let api_key = resolve_api_key(&config.agent.api_key_env_var, &default_auth_path())
            .ok_or(SpawnError::MissingApiKey)?;

        let agent_id = self
            .registry
            .register(spec_name)
            .await
            .map_err(|e| SpawnError::Registration(e.to_string()))?;

        let resolved = resolve_command(config.agent.codex_command.as_deref());
        let mut argv = resolved.base_args.clone();
        argv.extend(
            ["exec", "--full-auto", "--sandbox", "danger-full-access", "--json"]
                .into_iter()
                .map(ToString::to_string),
        );
        argv.extend(config.agent.codex_args.iter().cloned());

        let (mut command, prompt_file) =
            build_invocation(&resolved.program, &argv, &prompt, &agent_id)?;
        command
            .current_dir(&self.workspace_root)
            .env(&config.agent.api_key_env_var, &api_key)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::info!(
            spec_name,
            agent_id = %agent_id,
            program = %resolved.program,
            prompt_length = prompt.len(),
            "Spawning agent process"
        );

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                if let Some(ref path) = prompt_file {
                    let _ = std::fs::remove_file(path);
                }
                if let Err(dereg) = self.registry.deregister(&agent_id).await {
                    tracing::warn!(agent_id = %agent_id, error = %dereg, "Deregister failed");
                }
                return Err(SpawnError::Io(e));
            }
        };

        let child_pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let record = SpawnedAgent::new(agent_id.clone(), spec_name.to_string(), child_pid);
        let (kill_tx, kill_rx) = mpsc::channel(4);
        let (done_tx, done_rx) = watch::channel(false);

        {
            let mut agents = self.agents.lock().await;
            agents.insert(
                agent_id.clone(),
                AgentEntry {
                    record: record.clone(),
                    kill_tx: kill_tx.clone(),
                    done: done_rx,
                    timers: Vec::new(),
                },
            );
        }

        let supervisor = Supervisor {
            agent_id: agent_id.clone(),
            spec_name: spec_name.to_string(),
            agents: Arc::clone(&self.agents),
            registry: Arc::clone(&self.registry),
            events: self.events.clone(),
            prompt_file,
        };
        tokio::spawn(supervisor.run(child, stdout, stderr, kill_rx, done_tx));

        if config.timeout_seconds > 0 {
            let timer = tokio::spawn(timeout_watch(
                agent_id.clone(),
                spec_name.to_string(),
                config.timeout_seconds,
                Arc::clone(&self.agents),
                kill_tx,
                self.events.clone(),
            ));
            let mut agents = self.agents.lock().await;
            if let Some(entry) = agents.get_mut(&agent_id) {
                entry.timers.push(timer);
            } else {
                timer.abort();
            }
        }

        Ok(record)
    }

    async fn kill(&self, agent_id: &str) {
        let (kill_tx, mut done) = {
            let agents = self.agents.lock().await;
            match agents.get(agent_id) {
                Some(entry) if entry.record.status == AgentStatus::Running => {
                    (entry.kill_tx.clone(), entry.done.clone())
                }
                _ => return,
            }
        };

        let _ = kill_tx.send(KillSignal::Term).await;
        let timed_out = {
            let waited = tokio::time::timeout(KILL_GRACE, done.wait_for(|d| *d)).await;
            waited.is_err()
        };
        if timed_out {
            let _ = kill_tx.send(KillSignal::Kill).await;
            let _ = done.wait_for(|d| *d).await;
        }
    }

    async fn kill_all(&self) {
        let running: Vec<String> = {
            let agents = self.agents.lock().await;
            agents
                .iter()
                .filter(|(_, entry)| entry.record.status == AgentStatus::Running)
                .map(|(id, _)| id.clone())
                .collect()
        };

        futures::future::join_all(running.iter().map(|id| self.kill(id))).await;
    }

    async fn active_agents(&self) -> HashMap<String, SpawnedAgent> {
        let agents = self.agents.lock().await;
        agents
            .iter()
            .map(|(id, entry)| (id.clone(), entry.record.clone()))
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }
}

/// Owns the child for its whole life: drains stdio, applies kill requests,
/// and emits the terminal event exactly once.
struct Supervisor {
    agent_id: String,
    spec_name: String,
    agents: Arc<Mutex<HashMap<String, AgentEntry>>>,
    registry: Arc<dyn AgentRegistry>,
    events: broadcast::Sender<AgentEvent>,
    prompt_file: Option<PathBuf>,
}

impl Supervisor {
    async fn run(
        self,
        mut child: tokio::process::Child,
        stdout: Option<tokio::process::ChildStdout>,
        stderr: Option<tokio::process::ChildStderr>,
        mut kill_rx: mpsc::Receiver<KillSignal>,
        done_tx: watch::Sender<bool>,
    ) {
        let stdout_task = stdout.map(|out| {
            tokio::spawn(read_stdout(
                out,
                self.agent_id.clone(),
                self.spec_name.clone(),
                Arc::clone(&self.agents),
                self.events.clone(),
            ))
        });
        let stderr_task = stderr.map(|err| {
            tokio::spawn(read_stderr(
                err,
                self.agent_id.clone(),
                Arc::clone(&self.agents),
            ))
        });

        let child_pid = child.id();

        enum Step {
            Exited(std::io::Result<std::process::ExitStatus>),
            Signal(KillSignal),
        }

        let exit = loop {
            let step = tokio::select! {
                status = child.wait() => Step::Exited(status),
                Some(signal) = kill_rx.recv() => Step::Signal(signal),
            };
            match step {
                Step::Exited(status) => break status,
                Step::Signal(signal) => apply_signal(&mut child, child_pid, signal),
            }
        };

        // Drain stdio to completion so stdout events precede the terminal
        // event in program order.
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        let event = {
            let mut agents = self.agents.lock().await;
            let entry = agents.remove(&self.agent_id);
            entry.and_then(|mut entry| {
                for timer in &entry.timers {
                    timer.abort();
                }
                entry.record.completed_at = Some(Utc::now());

                match exit {
                    Ok(status) if entry.record.status == AgentStatus::Running => {
                        let code = status.code();
                        entry.record.exit_code = code;
                        if code == Some(0) {
                            entry.record.status = AgentStatus::Completed;
                            Some(AgentEvent::Completed {
                                agent_id: self.agent_id.clone(),
                                spec_name: self.spec_name.clone(),
                                exit_code: 0,
                            })
                        } else {
                            entry.record.status = AgentStatus::Failed;
                            Some(AgentEvent::Failed {
                                agent_id: self.agent_id.clone(),
                                spec_name: self.spec_name.clone(),
                                exit_code: code,
                                stderr: entry.record.stderr_buffer.clone(),
                                error: None,
                            })
                        }
                    }
                    Ok(_) => {
                        // Timeout or kill already marked the agent; the
                        // timeout event was emitted at signal time.
                        None
                    }
                    Err(e) => {
                        let message = format!("Spawn error: {e}");
                        entry.record.status = AgentStatus::Failed;
                        entry.record.stderr_buffer.push_str(&message);
                        Some(AgentEvent::Failed {
                            agent_id: self.agent_id.clone(),
                            spec_name: self.spec_name.clone(),
                            exit_code: None,
                            stderr: entry.record.stderr_buffer.clone(),
                            error: Some(e.to_string()),
                        })
                    }
                }
            })
        };

        if let Some(event) = event {
            let _ = self.events.send(event);
        }

        if let Some(ref path) = self.prompt_file {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::debug!(path = %path.display(), error = %e, "Prompt file cleanup failed");
            }
        }
        if let Err(e) = self.registry.deregister(&self.agent_id).await {
            tracing::warn!(agent_id = %self.agent_id, error = %e, "Deregister failed");
        }

        let _ = done_tx.send(true);
    }
}

async fn read_stdout(
    stdout: tokio::process::ChildStdout,
    agent_id: String,
    spec_name: String,
    agents: Arc<Mutex<HashMap<String, AgentEntry>>>,
    events: broadcast::Sender<AgentEvent>,
) {
    let mut reader = tokio::io::BufReader::new(stdout);
    let mut parser = JsonLineParser::default();
    let mut chunk = [0u8; 4096];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                for value in parser.push(&chunk[..n]) {
                    {
                        let mut agents = agents.lock().await;
                        if let Some(entry) = agents.get_mut(&agent_id) {
                            entry.record.events.push(value.clone());
                        }
                    }
                    let _ = events.send(AgentEvent::Output {
                        agent_id: agent_id.clone(),
                        spec_name: spec_name.clone(),
                        event: value,
                    });
                }
            }
        }
    }
}

async fn read_stderr(
    stderr: tokio::process::ChildStderr,
    agent_id: String,
    agents: Arc<Mutex<HashMap<String, AgentEntry>>>,
) {
    let mut reader = tokio::io::BufReader::new(stderr);
    let mut chunk = [0u8; 4096];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                let mut agents = agents.lock().await;
                if let Some(entry) = agents.get_mut(&agent_id) {
                    entry.record.stderr_buffer.push_str(&text);
                }
            }
        }
    }
}

/// Marks the agent timed out, asks for SIGTERM, and escalates to SIGKILL
/// after the grace period.
async fn timeout_watch(
    agent_id: String,
    spec_name: String,
    timeout_seconds: u64,
    agents: Arc<Mutex<HashMap<String, AgentEntry>>>,
    kill_tx: mpsc::Sender<KillSignal>,
    events: broadcast::Sender<AgentEvent>,
) {
    tokio::time::sleep(Duration::from_secs(timeout_seconds)).await;

    {
        let mut agents = agents.lock().await;
        let Some(entry) = agents.get_mut(&agent_id) else {
            return;
        };
        if entry.record.status != AgentStatus::Running {
            return;
        }
        entry.record.status = AgentStatus::Timeout;
    }

    tracing::warn!(agent_id = %agent_id, spec_name, timeout_seconds, "Agent timed out");
    let _ = kill_tx.send(KillSignal::Term).await;
    let _ = events.send(AgentEvent::Timeout {
        agent_id,
        spec_name,
        timeout_seconds,
    });

    tokio::time::sleep(KILL_GRACE).await;
    let _ = kill_tx.send(KillSignal::Kill).await;
}

#[cfg_attr(not(unix), allow(unused_variables))]
fn apply_signal(child: &mut tokio::process::Child, pid: Option<u32>, signal: KillSignal) {
    match signal {
        KillSignal::Term => {
            #[cfg(unix)]
            send_sigterm(pid);
            #[cfg(not(unix))]
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "Kill delivery failed");
            }
        }
        KillSignal::Kill => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "SIGKILL delivery failed");
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        #[allow(clippy::cast_possible_wrap)]
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::debug!(pid, error = %e, "SIGTERM delivery failed");
        }
    }
}

/// Reassembles newline-terminated JSON lines from arbitrary byte chunks.
///
/// Non-JSON lines, empty lines, and trailing partial lines are dropped.
#[derive(Debug, Default)]
pub(crate) struct JsonLineParser {
    buf: Vec<u8>,
}

impl JsonLineParser {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<serde_json::Value> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
                out.push(value);
            }
        }
        out
    }
}

struct ResolvedCommand {
    program: String,
    base_args: Vec<String>,
}

/// Resolve the agent command: explicit override, `codex` on PATH, or the
/// `npx @openai/codex` fallback. An unrunnable `codex` is kept as the last
/// resort so the spawn error is attributable.
fn resolve_command(codex_command: Option<&str>) -> ResolvedCommand {
    if let Some(command) = codex_command {
        let mut parts = command.split_whitespace().map(ToString::to_string);
        if let Some(program) = parts.next() {
            return ResolvedCommand {
                program,
                base_args: parts.collect(),
            };
        }
    }

    if command_on_path("codex") {
        ResolvedCommand {
            program: "codex".to_string(),
            base_args: vec![],
        }
    } else if command_on_path("npx") {
        ResolvedCommand {
            program: "npx".to_string(),
            base_args: vec!["@openai/codex".to_string()],
        }
    } else {
        ResolvedCommand {
            program: "codex".to_string(),
            base_args: vec![],
        }
    }
}

fn command_on_path(name: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(name)))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && path
            .metadata()
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    ["exe", "cmd", "bat"]
        .iter()
        .any(|ext| path.with_extension(ext).is_file())
}

/// Resolve the API key: prefer the configured env var, then the codex auth
/// file on disk.
fn resolve_api_key(env_var: &str, auth_path: &Path) -> Option<String> {
    if let Ok(value) = std::env::var(env_var) {
        if !value.trim().is_empty() {
            return Some(value);
        }
    }

    let raw = std::fs::read_to_string(auth_path).ok()?;
    let auth: serde_json::Value = serde_json::from_str(&raw).ok()?;
    for key in [env_var, "OPENAI_API_KEY"] {
        if let Some(value) = auth.get(key).and_then(|v| v.as_str()) {
            if !value.trim().is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn default_auth_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".codex")
        .join("auth.json")
}

/// Strip characters that are unsafe in filenames.
fn sanitize_agent_id(agent_id: &str) -> String {
    agent_id
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect()
}

fn write_prompt_file(agent_id: &str, prompt: &str) -> std::io::Result<PathBuf> {
    let name = format!(
        "kse-prompt-{}-{:08x}.txt",
        sanitize_agent_id(agent_id),
        rand::random::<u32>()
    );
    let path = std::env::temp_dir().join(name);
    std::fs::write(&path, prompt)?;
    Ok(path)
}

#[cfg(unix)]
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Build the child invocation, deciding how the prompt travels.
///
/// On unix the prompt rides argv unless it exceeds the argv limit, in which
/// case it is piped from a temp file through `/bin/sh`. On Windows the
/// prompt always goes through a temp file piped by powershell.
#[cfg(unix)]
fn build_invocation(
    program: &str,
    argv: &[String],
    prompt: &str,
    agent_id: &str,
) -> Result<(Command, Option<PathBuf>), SpawnError> {
    if prompt.len() <= PROMPT_ARGV_LIMIT {
        let mut command = Command::new(program);
        command.args(argv).arg(prompt);
        return Ok((command, None));
    }

    let path = write_prompt_file(agent_id, prompt)?;
    let pipeline = format!(
        "cat {} | {} {} -",
        shell_quote(&path.display().to_string()),
        shell_quote(program),
        argv.iter()
            .map(|a| shell_quote(a))
            .collect::<Vec<_>>()
            .join(" ")
    );
    let mut command = Command::new("/bin/sh");
    command.arg("-c").arg(pipeline);
    Ok((command, Some(path)))
}

#[cfg(not(unix))]
fn build_invocation(
    program: &str,
    argv: &[String],
    prompt: &str,
    agent_id: &str,
) -> Result<(Command, Option<PathBuf>), SpawnError> {
    let path = write_prompt_file(agent_id, prompt)?;
    let quoted_args = argv
        .iter()
        .map(|a| format!("'{}'", a.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(" ");
    let pipeline = format!(
        "Get-Content '{}' | & {} {} -",
        path.display(),
        program,
        quoted_args
    );
    let mut command = Command::new("powershell.exe");
    command.arg("-NoProfile").arg("-Command").arg(pipeline);
    Ok((command, Some(path)))
}
