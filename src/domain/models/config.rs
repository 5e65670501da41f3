use serde::{Deserialize, Serialize};

/// Main configuration structure for kse
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Maximum number of concurrent agents (1-100)
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Maximum retries per spec before it is marked failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-agent timeout in seconds (0 disables the timeout)
    #[serde(default)]
    pub timeout_seconds: u64,

    /// Agent child-process configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Rate limiting and launch budget configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

const fn default_max_parallel() -> usize {
    4
}

const fn default_max_retries() -> u32 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            max_retries: default_max_retries(),
            timeout_seconds: 0,
            agent: AgentConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Agent child-process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Environment variable holding the API key passed to the child
    #[serde(default = "default_api_key_env_var")]
    pub api_key_env_var: String,

    /// Optional bootstrap prompt template path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap_template: Option<String>,

    /// Override for the agent command, split on whitespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codex_command: Option<String>,

    /// Extra arguments appended before the prompt
    #[serde(default)]
    pub codex_args: Vec<String>,
}

fn default_api_key_env_var() -> String {
    "CODEX_API_KEY".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key_env_var: default_api_key_env_var(),
            bootstrap_template: None,
            codex_command: None,
            codex_args: vec![],
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitConfig {
    /// Initial backoff delay for rate-limited retries in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Dedicated retry budget for rate-limited failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Halve the effective parallelism on each rate-limit signal
    #[serde(default = "default_adaptive_parallel")]
    pub adaptive_parallel: bool,

    /// Lower bound for adaptive throttling
    #[serde(default = "default_parallel_floor")]
    pub parallel_floor: usize,

    /// Quiet period before effective parallelism recovers by one unit
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Agent launches allowed per budget window (0 disables the budget)
    #[serde(default)]
    pub launch_budget_per_minute: u32,

    /// Sliding window for the launch budget in milliseconds
    #[serde(default = "default_launch_budget_window_ms")]
    pub launch_budget_window_ms: u64,
}

const fn default_backoff_base_ms() -> u64 {
    1000
}

const fn default_backoff_max_ms() -> u64 {
    60_000
}

const fn default_adaptive_parallel() -> bool {
    true
}

const fn default_parallel_floor() -> usize {
    1
}

const fn default_cooldown_ms() -> u64 {
    60_000
}

const fn default_launch_budget_window_ms() -> u64 {
    60_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_retries: None,
            adaptive_parallel: default_adaptive_parallel(),
            parallel_floor: default_parallel_floor(),
            cooldown_ms: default_cooldown_ms(),
            launch_budget_per_minute: 0,
            launch_budget_window_ms: default_launch_budget_window_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
