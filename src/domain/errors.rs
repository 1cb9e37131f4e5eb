//! Domain errors for the decision engine.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while registering rules or dispatching actions.
///
/// Only registry and configuration operations return these to callers.
/// Action failures are folded into a failed `DecisionRecord` instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Rule {rule_id} is cooling down for another {remaining_ms}ms")]
    CooldownActive { rule_id: String, remaining_ms: u64 },

    #[error("Rule {rule_id} reached its execution limit of {max_executions}")]
    ExecutionLimitReached { rule_id: String, max_executions: u64 },

    #[error("Action {action_id} timed out after {timeout_ms}ms")]
    ActionTimeout { action_id: String, timeout_ms: u64 },

    #[error("Action {action_id} failed after {attempts} attempts: {last_error}")]
    ActionExhausted {
        action_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Action {action_id} failed: {reason}")]
    ActionFailed { action_id: String, reason: String },

    #[error("Unknown action type: {0}")]
    UnknownActionType(String),

    #[error("Circuit breaker '{breaker}' is open until {retry_after}")]
    CircuitOpen { breaker: String, retry_after: String },

    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    #[error("Rule already registered: {0}")]
    DuplicateRule(String),

    #[error("Decision not found: {0}")]
    DecisionNotFound(Uuid),

    #[error("Decision {id} cannot move from {from} to {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },

    #[error("Failed to parse configuration at line {line}, column {column}: {message}")]
    ConfigParse {
        line: usize,
        column: usize,
        message: String,
    },
}

impl EngineError {
    /// Short machine-readable name used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::CooldownActive { .. } => "cooldown_active",
            Self::ExecutionLimitReached { .. } => "execution_limit_reached",
            Self::ActionTimeout { .. } => "action_timeout",
            Self::ActionExhausted { .. } => "action_exhausted",
            Self::ActionFailed { .. } => "action_failed",
            Self::UnknownActionType(_) => "unknown_action_type",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::RuleNotFound(_) => "rule_not_found",
            Self::DuplicateRule(_) => "duplicate_rule",
            Self::DecisionNotFound(_) => "decision_not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ConfigParse { .. } => "config_parse",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::ConfigParse {
            line: err.line(),
            column: err.column(),
            message: err.to_string(),
        }
    }
}
