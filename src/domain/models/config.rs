use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::domain::models::action::ActionDefaults;

/// Main configuration structure for Warden
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Decision engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Action dispatcher configuration
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Action executor configuration
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Decision engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Maximum number of decision records kept in history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Reject rules whose condition fails to compile instead of storing them
    /// as never-matching
    #[serde(default = "default_true")]
    pub strict_predicates: bool,

    /// Load the built-in rule packs at startup
    #[serde(default)]
    pub load_builtin_rules: bool,

    /// Optional rule file (JSON or YAML) loaded at startup
    #[serde(default)]
    pub rules_file: Option<PathBuf>,
}

const fn default_history_capacity() -> usize {
    1000
}

const fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            strict_predicates: true,
            load_builtin_rules: false,
            rules_file: None,
        }
    }
}

/// Action dispatcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DispatcherConfig {
    /// Defaults for action fields omitted from rule definitions
    #[serde(default)]
    pub action_defaults: ActionDefaults,

    /// Consecutive failures before a circuit breaker opens
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    /// How long an open breaker waits before allowing a probe, in milliseconds
    #[serde(default = "default_breaker_timeout_ms")]
    pub breaker_timeout_ms: u64,

    /// Maximum number of cached action outcomes kept for idempotency
    #[serde(default = "default_idempotency_capacity")]
    pub idempotency_capacity: usize,
}

const fn default_breaker_threshold() -> u32 {
    5
}

const fn default_breaker_timeout_ms() -> u64 {
    60_000
}

const fn default_idempotency_capacity() -> usize {
    10_000
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            action_defaults: ActionDefaults::default(),
            breaker_threshold: default_breaker_threshold(),
            breaker_timeout_ms: default_breaker_timeout_ms(),
            idempotency_capacity: default_idempotency_capacity(),
        }
    }
}

/// Which [`ActionExecutor`](crate::domain::ports::ActionExecutor) backs
/// side-effecting actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorMode {
    /// Record calls without touching anything
    #[default]
    Simulated,
    /// Spawn one child process per action
    Process,
}

/// Action executor configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutorConfig {
    #[serde(default)]
    pub mode: ExecutorMode,

    /// Command line per action type (`restart`, `failover`, ...). An action's
    /// own `command`/`args` parameters take precedence.
    #[serde(default)]
    pub commands: BTreeMap<String, Vec<String>>,

    /// Working directory for spawned commands
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation for file output: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
