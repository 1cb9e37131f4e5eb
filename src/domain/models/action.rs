//! Action specifications and dispatch outcomes.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{EngineError, EngineResult};

/// Identifier of an action within its rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub String);

impl ActionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ActionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Closed set of actions a rule may dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Restart,
    Recreate,
    ScaleUp,
    ScaleDown,
    Failover,
    Retry,
    CircuitBreaker,
    ManualIntervention,
    Ignore,
    Block,
    RequireApproval,
    Allow,
}

impl ActionType {
    pub const ALL: [ActionType; 12] = [
        Self::Restart,
        Self::Recreate,
        Self::ScaleUp,
        Self::ScaleDown,
        Self::Failover,
        Self::Retry,
        Self::CircuitBreaker,
        Self::ManualIntervention,
        Self::Ignore,
        Self::Block,
        Self::RequireApproval,
        Self::Allow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Recreate => "recreate",
            Self::ScaleUp => "scale_up",
            Self::ScaleDown => "scale_down",
            Self::Failover => "failover",
            Self::Retry => "retry",
            Self::CircuitBreaker => "circuit_breaker",
            Self::ManualIntervention => "manual_intervention",
            Self::Ignore => "ignore",
            Self::Block => "block",
            Self::RequireApproval => "require_approval",
            Self::Allow => "allow",
        }
    }

    /// Actions that wait for an operator instead of completing on their own.
    pub fn awaits_operator(&self) -> bool {
        matches!(self, Self::ManualIntervention | Self::RequireApproval)
    }

    /// Actions that yield a verdict without touching the executor.
    pub fn is_verdict(&self) -> bool {
        matches!(self, Self::Ignore | Self::Block | Self::Allow)
    }
}

impl FromStr for ActionType {
    type Err = EngineError;

    /// Accepts both `snake_case` and the `camelCase` spellings used by
    /// dashboard exports.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().replace('_', "") == normalized)
            .ok_or_else(|| EngineError::UnknownActionType(s.to_string()))
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defaults applied to action fields omitted from a rule definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefaults {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

const fn default_timeout_ms() -> u64 {
    30_000
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_base_delay_ms() -> u64 {
    1_000
}

impl Default for ActionDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_multiplier: default_backoff_multiplier(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// A single typed action attached to a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub id: ActionId,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    pub timeout_ms: u64,
    /// Only `retry` actions use more than one attempt.
    pub max_attempts: u32,
    pub backoff_multiplier: f64,
    pub base_delay_ms: u64,
    #[serde(default)]
    pub depends_on: Vec<ActionId>,
    /// Executed best-effort when this action times out or fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<Box<ActionSpec>>,
}

impl ActionSpec {
    pub fn new(id: impl Into<ActionId>, action_type: ActionType) -> Self {
        Self::with_defaults(id, action_type, &ActionDefaults::default())
    }

    pub fn with_defaults(
        id: impl Into<ActionId>,
        action_type: ActionType,
        defaults: &ActionDefaults,
    ) -> Self {
        Self {
            id: id.into(),
            action_type,
            parameters: HashMap::new(),
            timeout_ms: defaults.timeout_ms,
            max_attempts: if action_type == ActionType::Retry {
                defaults.max_attempts
            } else {
                1
            },
            backoff_multiplier: defaults.backoff_multiplier,
            base_delay_ms: defaults.base_delay_ms,
            depends_on: Vec::new(),
            rollback: None,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay_ms: u64, backoff_multiplier: f64) -> Self {
        self.max_attempts = max_attempts;
        self.base_delay_ms = base_delay_ms;
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    pub fn depends_on(mut self, id: impl Into<ActionId>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    pub fn with_rollback(mut self, rollback: ActionSpec) -> Self {
        self.rollback = Some(Box::new(rollback));
        self
    }

    /// String parameter lookup.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    /// Unsigned integer parameter lookup.
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(|v| v.as_u64())
    }

    /// Delay before retry attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        if delay.is_finite() && delay < u64::MAX as f64 {
            delay as u64
        } else {
            u64::MAX
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.id.0.trim().is_empty() {
            return Err(EngineError::Validation("action id cannot be empty".to_string()));
        }
        if self.max_attempts < 1 {
            return Err(EngineError::Validation(format!(
                "action '{}': max_attempts must be at least 1",
                self.id
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(EngineError::Validation(format!(
                "action '{}': backoff_multiplier must be >= 1.0, got {}",
                self.id, self.backoff_multiplier
            )));
        }
        if self.timeout_ms == 0 {
            return Err(EngineError::Validation(format!(
                "action '{}': timeout_ms must be positive",
                self.id
            )));
        }
        if let Some(ref rollback) = self.rollback {
            if rollback.rollback.is_some() {
                return Err(EngineError::Validation(format!(
                    "action '{}': rollback actions cannot declare their own rollback",
                    self.id
                )));
            }
            rollback.validate()?;
        }
        Ok(())
    }
}

/// Terminal or pending state of a dispatched action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    /// Waiting for an operator via `resolve`.
    Pending,
    Cancelled,
    /// Not run because a dependency did not succeed.
    Skipped,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Pending => "pending",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Result of dispatching one [`ActionSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_id: ActionId,
    pub action_type: ActionType,
    pub status: OutcomeStatus,
    pub attempts: u32,
    pub error: Option<String>,
    /// Verdict or executor payload, e.g. `{"verdict": "block"}`.
    pub output: Option<serde_json::Value>,
    pub rolled_back: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ActionOutcome {
    pub fn new(spec: &ActionSpec, status: OutcomeStatus) -> Self {
        let now = Utc::now();
        Self {
            action_id: spec.id.clone(),
            action_type: spec.action_type,
            status,
            attempts: 0,
            error: None,
            output: None,
            rolled_back: false,
            started_at: now,
            finished_at: status.is_terminal().then_some(now),
        }
    }

    pub fn succeeded(spec: &ActionSpec, attempts: u32) -> Self {
        Self {
            attempts,
            ..Self::new(spec, OutcomeStatus::Succeeded)
        }
    }

    pub fn failed(spec: &ActionSpec, attempts: u32, error: &EngineError) -> Self {
        Self {
            attempts,
            error: Some(error.to_string()),
            ..Self::new(spec, OutcomeStatus::Failed)
        }
    }

    pub fn pending(spec: &ActionSpec) -> Self {
        Self::new(spec, OutcomeStatus::Pending)
    }

    pub fn skipped(spec: &ActionSpec, reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::new(spec, OutcomeStatus::Skipped)
        }
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }

    /// Move a pending outcome to a terminal state.
    pub fn finish(&mut self, status: OutcomeStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_parsing_accepts_both_spellings() {
        assert_eq!("scaleUp".parse::<ActionType>().unwrap(), ActionType::ScaleUp);
        assert_eq!("scale_up".parse::<ActionType>().unwrap(), ActionType::ScaleUp);
        assert_eq!(
            "requireApproval".parse::<ActionType>().unwrap(),
            ActionType::RequireApproval
        );
        assert_eq!(
            "circuit-breaker".parse::<ActionType>().unwrap(),
            ActionType::CircuitBreaker
        );
    }

    #[test]
    fn test_unknown_action_type() {
        let err = "reboot_universe".parse::<ActionType>().unwrap_err();
        assert!(matches!(err, EngineError::UnknownActionType(ref s) if s == "reboot_universe"));
    }

    #[test]
    fn test_backoff_delay() {
        let spec = ActionSpec::new("r", ActionType::Retry).with_retry(3, 100, 2.0);
        assert_eq!(spec.backoff_delay_ms(1), 100);
        assert_eq!(spec.backoff_delay_ms(2), 200);
        assert_eq!(spec.backoff_delay_ms(3), 400);
    }

    #[test]
    fn test_non_retry_actions_run_once() {
        let spec = ActionSpec::new("restart", ActionType::Restart);
        assert_eq!(spec.max_attempts, 1);
        let retry = ActionSpec::new("retry", ActionType::Retry);
        assert_eq!(retry.max_attempts, 3);
    }

    #[test]
    fn test_validate_rejects_bad_retry_settings() {
        let zero_attempts = ActionSpec::new("r", ActionType::Retry).with_retry(0, 100, 2.0);
        assert!(matches!(zero_attempts.validate(), Err(EngineError::Validation(_))));

        let shrinking = ActionSpec::new("r", ActionType::Retry).with_retry(3, 100, 0.5);
        assert!(matches!(shrinking.validate(), Err(EngineError::Validation(_))));

        let ok = ActionSpec::new("r", ActionType::Retry).with_retry(3, 100, 1.0);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_nested_rollback_rejected() {
        let inner = ActionSpec::new("undo", ActionType::Restart)
            .with_rollback(ActionSpec::new("undo-undo", ActionType::Restart));
        let spec = ActionSpec::new("scale", ActionType::ScaleUp).with_rollback(inner);
        assert!(spec.validate().is_err());
    }
}
