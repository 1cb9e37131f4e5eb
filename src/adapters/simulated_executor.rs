//! In-process executor that records calls instead of touching real systems.
//!
//! Used by the CLI `evaluate` command and throughout the tests. Failures and
//! latency can be scripted per action id, or requested from a rule file with
//! the `simulate_failure` and `simulate_delay_ms` action parameters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::action::ActionSpec;
use crate::domain::models::event::EngineEvent;
use crate::domain::ports::action_executor::{ActionExecutor, ExecutionReport};

#[derive(Default)]
struct Script {
    /// Remaining failures per action id.
    failures: HashMap<String, u32>,
    delays: HashMap<String, Duration>,
    calls: Vec<String>,
}

/// Scriptable [`ActionExecutor`] with no side effects.
#[derive(Clone, Default)]
pub struct SimulatedExecutor {
    script: Arc<Mutex<Script>>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls for `action_id`.
    pub fn failing(self, action_id: impl Into<String>, times: u32) -> Self {
        self.lock().failures.insert(action_id.into(), times);
        self
    }

    /// Delay every call for `action_id`.
    pub fn with_delay(self, action_id: impl Into<String>, delay: Duration) -> Self {
        self.lock().delays.insert(action_id.into(), delay);
        self
    }

    pub fn call_count(&self, action_id: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == action_id).count()
    }

    /// Action ids in call order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ActionExecutor for SimulatedExecutor {
    async fn execute(&self, action: &ActionSpec, event: &EngineEvent) -> EngineResult<ExecutionReport> {
        let id = action.id.to_string();
        let (delay, scripted_failure) = {
            let mut script = self.lock();
            script.calls.push(id.clone());
            let delay = script
                .delays
                .get(&id)
                .copied()
                .or_else(|| action.param_u64("simulate_delay_ms").map(Duration::from_millis));
            let scripted_failure = match script.failures.get_mut(&id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
            (delay, scripted_failure)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let requested_failure = action
            .parameters
            .get("simulate_failure")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        if scripted_failure || requested_failure {
            tracing::debug!(action_id = %id, event_id = %event.id, "Simulated action failure");
            return Err(EngineError::ActionFailed {
                action_id: id,
                reason: "simulated failure".to_string(),
            });
        }

        tracing::debug!(
            action_id = %id,
            action_type = %action.action_type,
            event_id = %event.id,
            "Simulated action executed"
        );
        Ok(ExecutionReport::with_output(serde_json::json!({
            "simulated": true,
            "action": action.action_type.as_str(),
            "target": event.source,
        })))
    }
}
