//! Port for executing side-effecting actions.

use async_trait::async_trait;

use crate::domain::errors::EngineResult;
use crate::domain::models::action::ActionSpec;
use crate::domain::models::event::EngineEvent;

/// What an executor reports back for a successful call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    /// Optional payload recorded on the action outcome.
    pub output: Option<serde_json::Value>,
}

impl ExecutionReport {
    pub fn with_output(output: serde_json::Value) -> Self {
        Self {
            output: Some(output),
        }
    }
}

/// Performs the side effects behind `restart`, `recreate`, `scale_up`,
/// `scale_down`, `failover` and each `retry` attempt, plus rollbacks.
///
/// The dispatcher bounds every call with the action's timeout, so
/// implementations do not need their own. A real isolation mechanism
/// (process supervisor, container runtime) plugs in here.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute one attempt of `action` on behalf of `event`.
    async fn execute(&self, action: &ActionSpec, event: &EngineEvent) -> EngineResult<ExecutionReport>;

    /// Undo a failed or timed-out action. Defaults to executing the rollback
    /// spec like any other action.
    async fn rollback(&self, rollback: &ActionSpec, event: &EngineEvent) -> EngineResult<ExecutionReport> {
        self.execute(rollback, event).await
    }
}
