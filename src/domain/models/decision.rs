//! Decision records.
//!
//! One [`DecisionRecord`] is written per processed event, whether or not a
//! rule matched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::action::{ActionOutcome, OutcomeStatus};
use crate::domain::models::event::EventId;
use crate::domain::models::rule::RuleId;

/// Unique identifier for a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionId(pub Uuid);

impl DecisionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DecisionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DecisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DecisionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    /// Every action finished successfully.
    Completed,
    /// At least one action failed or was skipped.
    Failed,
    /// Waiting on an operator.
    Pending,
    Cancelled,
    /// No eligible rule matched the event.
    NoMatch,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Pending => "pending",
            Self::Cancelled => "cancelled",
            Self::NoMatch => "no_match",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "pending" => Some(Self::Pending),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "no_match" | "nomatch" => Some(Self::NoMatch),
            _ => None,
        }
    }

    /// Derive a status from a set of outcomes.
    pub fn from_outcomes(outcomes: &[ActionOutcome]) -> Self {
        if outcomes.is_empty() {
            Self::NoMatch
        } else if outcomes.iter().any(|o| o.status == OutcomeStatus::Pending) {
            Self::Pending
        } else if outcomes.iter().any(|o| o.status == OutcomeStatus::Cancelled) {
            Self::Cancelled
        } else if outcomes.iter().all(ActionOutcome::is_success) {
            Self::Completed
        } else {
            Self::Failed
        }
    }
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log entry describing one rule-match-and-dispatch outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: DecisionId,
    pub event_id: EventId,
    pub matched_rule_id: Option<RuleId>,
    pub actions_taken: Vec<ActionOutcome>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub status: DecisionStatus,
    /// Operator note attached on resolve or cancel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl DecisionRecord {
    pub fn no_match(event_id: EventId) -> Self {
        Self {
            id: DecisionId::new(),
            event_id,
            matched_rule_id: None,
            actions_taken: Vec::new(),
            timestamp: Utc::now(),
            success: false,
            status: DecisionStatus::NoMatch,
            note: None,
        }
    }

    pub fn for_rule(event_id: EventId, rule_id: RuleId, actions_taken: Vec<ActionOutcome>) -> Self {
        let mut record = Self {
            matched_rule_id: Some(rule_id),
            actions_taken,
            ..Self::no_match(event_id)
        };
        record.refresh_status();
        record
    }

    /// Recompute `status` and `success` from `actions_taken`.
    pub fn refresh_status(&mut self) {
        self.status = DecisionStatus::from_outcomes(&self.actions_taken);
        self.success = self.status == DecisionStatus::Completed;
    }

    pub fn is_pending(&self) -> bool {
        self.status == DecisionStatus::Pending
    }

    /// The verdict carried by a `block`/`allow`/`ignore` outcome, if any.
    pub fn verdict(&self) -> Option<&str> {
        self.actions_taken
            .iter()
            .filter_map(|o| o.output.as_ref())
            .find_map(|out| out.get("verdict").and_then(|v| v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::EngineError;
    use crate::domain::models::action::{ActionSpec, ActionType};

    fn spec(t: ActionType) -> ActionSpec {
        ActionSpec::new(t.as_str(), t)
    }

    #[test]
    fn test_status_from_outcomes() {
        let ok = ActionOutcome::succeeded(&spec(ActionType::Restart), 1);
        let failed = ActionOutcome::failed(
            &spec(ActionType::Failover),
            1,
            &EngineError::ActionFailed {
                action_id: "failover".into(),
                reason: "no standby".into(),
            },
        );
        let pending = ActionOutcome::pending(&spec(ActionType::ManualIntervention));

        assert_eq!(DecisionStatus::from_outcomes(&[]), DecisionStatus::NoMatch);
        assert_eq!(
            DecisionStatus::from_outcomes(&[ok.clone()]),
            DecisionStatus::Completed
        );
        assert_eq!(
            DecisionStatus::from_outcomes(&[ok.clone(), failed]),
            DecisionStatus::Failed
        );
        assert_eq!(
            DecisionStatus::from_outcomes(&[ok, pending]),
            DecisionStatus::Pending
        );
    }

    #[test]
    fn test_verdict_lookup() {
        let block = ActionOutcome::succeeded(&spec(ActionType::Block), 1)
            .with_output(serde_json::json!({"verdict": "block"}));
        let record = DecisionRecord::for_rule(EventId::new(), RuleId::from("r1"), vec![block]);

        assert!(record.success);
        assert_eq!(record.verdict(), Some("block"));
    }
}
