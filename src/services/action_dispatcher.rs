//! Action dispatcher.
//!
//! Turns an [`ActionSpec`] into an [`ActionOutcome`]:
//!
//! - `block`, `allow` and `ignore` produce a verdict without side effects.
//! - `manual_intervention` and `require_approval` return a pending outcome
//!   that only an operator can settle.
//! - `circuit_breaker` runs its operation through a named breaker.
//! - Everything else goes to the [`ActionExecutor`], with up to
//!   `max_attempts` attempts and exponential backoff between them.
//!
//! Every executor call is bounded by the action's timeout. A failed action
//! with a rollback gets the rollback executed once, best effort. Outcomes are
//! cached per `(rule, event, action)` so re-dispatching returns the earlier
//! result instead of repeating side effects. Concurrent dispatches of the
//! same key are serialized, so only the first one executes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, timeout};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::action::{ActionId, ActionOutcome, ActionSpec, ActionType, OutcomeStatus};
use crate::domain::models::config::DispatcherConfig;
use crate::domain::models::event::{EngineEvent, EventId};
use crate::domain::models::rule::{Rule, RuleId};
use crate::domain::ports::action_executor::{ActionExecutor, ExecutionReport};
use crate::services::circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerService, CircuitCheckResult, CircuitStats,
};

/// Idempotency key for a dispatched action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DispatchKey {
    pub rule_id: RuleId,
    pub event_id: EventId,
    pub action_id: ActionId,
}

impl DispatchKey {
    pub fn new(rule_id: &RuleId, event_id: EventId, action_id: &ActionId) -> Self {
        Self {
            rule_id: rule_id.clone(),
            event_id,
            action_id: action_id.clone(),
        }
    }
}

#[derive(Default)]
struct OutcomeCache {
    outcomes: HashMap<DispatchKey, ActionOutcome>,
    order: VecDeque<DispatchKey>,
}

impl OutcomeCache {
    fn insert(&mut self, key: DispatchKey, outcome: ActionOutcome, capacity: usize) {
        if self.outcomes.insert(key.clone(), outcome).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.outcomes.remove(&oldest);
            }
        }
    }
}

/// Dispatches rule actions.
#[derive(Clone)]
pub struct ActionDispatcher {
    executor: Arc<dyn ActionExecutor>,
    breakers: CircuitBreakerService,
    cache: Arc<RwLock<OutcomeCache>>,
    inflight: Arc<Mutex<HashMap<DispatchKey, Arc<Mutex<()>>>>>,
    config: DispatcherConfig,
}

impl ActionDispatcher {
    pub fn new(executor: Arc<dyn ActionExecutor>, config: DispatcherConfig) -> Self {
        let breaker_config =
            CircuitBreakerConfig::new(config.breaker_threshold, config.breaker_timeout_ms);
        Self {
            executor,
            breakers: CircuitBreakerService::new(breaker_config),
            cache: Arc::new(RwLock::new(OutcomeCache::default())),
            inflight: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    pub fn breakers(&self) -> &CircuitBreakerService {
        &self.breakers
    }

    /// Dispatch one action, returning the cached outcome if this
    /// `(rule, event, action)` was dispatched before.
    pub async fn dispatch(&self, rule_id: &RuleId, action: &ActionSpec, event: &EngineEvent) -> ActionOutcome {
        let key = DispatchKey::new(rule_id, event.id, &action.id);
        if let Some(cached) = self.cached(&key).await {
            return log_cached(&key, cached);
        }

        let slot = self.inflight.lock().await.entry(key.clone()).or_default().clone();
        let _in_flight = slot.lock().await;
        if let Some(cached) = self.cached(&key).await {
            return log_cached(&key, cached);
        }

        let outcome = self.execute(rule_id, action, event).await;

        match outcome.status {
            OutcomeStatus::Failed => tracing::warn!(
                rule_id = %rule_id,
                action_id = %action.id,
                action_type = %action.action_type,
                attempts = outcome.attempts,
                error = ?outcome.error,
                rolled_back = outcome.rolled_back,
                "Action failed"
            ),
            status => tracing::info!(
                rule_id = %rule_id,
                action_id = %action.id,
                action_type = %action.action_type,
                attempts = outcome.attempts,
                status = status.as_str(),
                "Action dispatched"
            ),
        }

        self.cache
            .write()
            .await
            .insert(key.clone(), outcome.clone(), self.config.idempotency_capacity);
        self.inflight.lock().await.remove(&key);
        outcome
    }

    /// Dispatch every action of `rule` in dependency order.
    ///
    /// Actions in the same dependency layer run concurrently. An action whose
    /// dependency failed, was skipped or was cancelled is skipped. An action
    /// whose dependency is still pending is reported as pending and not
    /// cached, so a later call runs it once the dependency settles.
    pub async fn dispatch_all(&self, rule: &Rule, event: &EngineEvent) -> Vec<ActionOutcome> {
        self.resume_all(rule, event, &[]).await
    }

    /// Like [`dispatch_all`](Self::dispatch_all), but actions with a settled
    /// outcome in `settled` keep it and are never dispatched again. Only
    /// actions that are missing or still pending there run.
    pub async fn resume_all(&self, rule: &Rule, event: &EngineEvent, settled: &[ActionOutcome]) -> Vec<ActionOutcome> {
        let layers = match rule.action_layers() {
            Ok(layers) => layers,
            Err(err) => {
                tracing::error!(rule_id = %rule.id, error = %err, "Rule has an invalid action graph");
                return rule
                    .actions
                    .iter()
                    .map(|spec| ActionOutcome::failed(spec, 0, &err))
                    .collect();
            }
        };

        let mut outcomes: Vec<Option<ActionOutcome>> = vec![None; rule.actions.len()];
        let index: HashMap<&ActionId, usize> = rule
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| (&a.id, i))
            .collect();

        for layer in layers {
            let mut runnable = Vec::new();

            for i in layer {
                let spec = &rule.actions[i];
                if let Some(done) = settled
                    .iter()
                    .find(|o| o.action_id == spec.id && o.status != OutcomeStatus::Pending)
                {
                    outcomes[i] = Some(done.clone());
                    continue;
                }

                let deps: Vec<&ActionOutcome> = spec
                    .depends_on
                    .iter()
                    .filter_map(|dep| index.get(dep).and_then(|&d| outcomes[d].as_ref()))
                    .collect();

                if let Some(blocker) = deps.iter().find(|o| {
                    matches!(
                        o.status,
                        OutcomeStatus::Failed | OutcomeStatus::Skipped | OutcomeStatus::Cancelled
                    )
                }) {
                    outcomes[i] = Some(ActionOutcome::skipped(
                        spec,
                        format!("dependency '{}' {}", blocker.action_id, blocker.status.as_str()),
                    ));
                    continue;
                }

                let waiting_on: Vec<String> = deps
                    .iter()
                    .filter(|o| o.status == OutcomeStatus::Pending)
                    .map(|o| o.action_id.to_string())
                    .collect();
                if !waiting_on.is_empty() {
                    outcomes[i] = Some(
                        ActionOutcome::pending(spec)
                            .with_output(serde_json::json!({ "waiting_on": waiting_on })),
                    );
                    continue;
                }

                runnable.push(i);
            }

            let results = join_all(
                runnable
                    .iter()
                    .map(|&i| self.dispatch(&rule.id, &rule.actions[i], event)),
            )
            .await;
            for (i, outcome) in runnable.into_iter().zip(results) {
                outcomes[i] = Some(outcome);
            }
        }

        outcomes.into_iter().flatten().collect()
    }

    /// Cached outcome for `key`, if any.
    pub async fn cached(&self, key: &DispatchKey) -> Option<ActionOutcome> {
        self.cache.read().await.outcomes.get(key).cloned()
    }

    /// Overwrite a cached outcome, used when an operator settles a pending
    /// action.
    pub async fn update_cached(&self, rule_id: &RuleId, event_id: EventId, outcome: ActionOutcome) {
        let key = DispatchKey::new(rule_id, event_id, &outcome.action_id);
        self.cache
            .write()
            .await
            .insert(key, outcome, self.config.idempotency_capacity);
    }

    /// Register the breaker settings of every `circuit_breaker` action in
    /// `rule`, so failures reported before the first dispatch already count
    /// against the right threshold.
    pub async fn register_breakers(&self, rule: &Rule) {
        for action in rule.actions.iter().filter(|a| a.action_type == ActionType::CircuitBreaker) {
            let (name, config) = self.breaker_for(&rule.id, action);
            if let Some(config) = config {
                self.breakers.configure(&name, config).await;
            }
        }
    }

    /// Record a failure observed outside the engine against a named breaker.
    pub async fn record_breaker_failure(&self, breaker: &str, error: impl Into<String>) {
        self.breakers.record_failure(breaker, error).await;
    }

    pub async fn record_breaker_success(&self, breaker: &str) {
        self.breakers.record_success(breaker).await;
    }

    pub async fn breaker_stats(&self) -> Vec<CircuitStats> {
        self.breakers.stats().await
    }

    async fn execute(&self, rule_id: &RuleId, action: &ActionSpec, event: &EngineEvent) -> ActionOutcome {
        let started_at = Utc::now();

        if action.action_type.is_verdict() {
            let mut output = serde_json::json!({ "verdict": action.action_type.as_str() });
            if let Some(reason) = action.param_str("reason") {
                output["reason"] = serde_json::Value::String(reason.to_string());
            }
            if let Some(strategy) = action.parameters.get("strategy") {
                output["strategy"] = strategy.clone();
            }
            return ActionOutcome::succeeded(action, 1).with_output(output);
        }

        if action.action_type.awaits_operator() {
            let mut output = serde_json::json!({ "awaiting": action.action_type.as_str() });
            if let Some(reason) = action.param_str("reason") {
                output["reason"] = serde_json::Value::String(reason.to_string());
            }
            return ActionOutcome::pending(action).with_output(output);
        }

        let outcome = if action.action_type == ActionType::CircuitBreaker {
            self.execute_guarded(rule_id, action, event).await
        } else {
            self.execute_with_retry(action, event).await
        };
        let mut outcome = outcome.with_started_at(started_at);

        if outcome.status == OutcomeStatus::Failed {
            if let Some(ref rollback) = action.rollback {
                outcome.rolled_back = self.run_rollback(action, rollback, event).await;
            }
        }
        outcome
    }

    async fn execute_with_retry(&self, action: &ActionSpec, event: &EngineEvent) -> ActionOutcome {
        let max_attempts = action.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.run_once(action, event).await {
                Ok(report) => {
                    let outcome = ActionOutcome::succeeded(action, attempt);
                    return match report.output {
                        Some(output) => outcome.with_output(output),
                        None => outcome,
                    };
                }
                Err(err) => {
                    if attempt < max_attempts {
                        let delay_ms = action.backoff_delay_ms(attempt);
                        tracing::debug!(
                            action_id = %action.id,
                            attempt,
                            max_attempts,
                            delay_ms,
                            error = %err,
                            "Action attempt failed, backing off"
                        );
                        sleep(Duration::from_millis(delay_ms)).await;
                    }
                    last_error = Some(err);
                }
            }
        }

        let last_error = last_error.unwrap_or_else(|| EngineError::ActionFailed {
            action_id: action.id.to_string(),
            reason: "no attempts were made".to_string(),
        });
        let error = if max_attempts > 1 {
            EngineError::ActionExhausted {
                action_id: action.id.to_string(),
                attempts: max_attempts,
                last_error: last_error.to_string(),
            }
        } else {
            last_error
        };
        ActionOutcome::failed(action, max_attempts, &error)
    }

    /// Breaker name and, when the action overrides them, its settings.
    fn breaker_for(&self, rule_id: &RuleId, action: &ActionSpec) -> (String, Option<CircuitBreakerConfig>) {
        let name = action
            .param_str("breaker")
            .map_or_else(|| rule_id.to_string(), str::to_string);
        let config = match (action.param_u64("threshold"), action.param_u64("timeout_ms")) {
            (None, None) => None,
            (threshold, timeout_ms) => Some(CircuitBreakerConfig::new(
                threshold
                    .and_then(|t| u32::try_from(t).ok())
                    .unwrap_or(self.config.breaker_threshold),
                timeout_ms.unwrap_or(self.config.breaker_timeout_ms),
            )),
        };
        (name, config)
    }

    async fn execute_guarded(&self, rule_id: &RuleId, action: &ActionSpec, event: &EngineEvent) -> ActionOutcome {
        let (name, config) = self.breaker_for(rule_id, action);

        match self.breakers.check(&name, config).await {
            CircuitCheckResult::Blocked { retry_after, .. } => {
                let err = EngineError::CircuitOpen {
                    breaker: name.clone(),
                    retry_after: retry_after.to_rfc3339(),
                };
                ActionOutcome::failed(action, 0, &err).with_output(serde_json::json!({
                    "breaker": name,
                    "state": "open",
                    "blocked": true,
                }))
            }
            check => {
                let outcome = self.execute_with_retry(action, event).await;
                if outcome.is_success() {
                    self.breakers.record_success(&name).await;
                } else {
                    self.breakers
                        .record_failure(&name, outcome.error.clone().unwrap_or_default())
                        .await;
                }
                let probing = matches!(check, CircuitCheckResult::Testing { .. });
                let state = self
                    .breakers
                    .get_state(&name)
                    .await
                    .map_or("closed", |s| s.as_str());
                let mut output = outcome.output.clone().unwrap_or_else(|| serde_json::json!({}));
                output["breaker"] = serde_json::Value::String(name);
                output["state"] = serde_json::Value::String(state.to_string());
                output["probe"] = serde_json::Value::Bool(probing);
                outcome.with_output(output)
            }
        }
    }

    async fn run_once(&self, action: &ActionSpec, event: &EngineEvent) -> EngineResult<ExecutionReport> {
        match timeout(
            Duration::from_millis(action.timeout_ms),
            self.executor.execute(action, event),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::ActionTimeout {
                action_id: action.id.to_string(),
                timeout_ms: action.timeout_ms,
            }),
        }
    }

    async fn run_rollback(&self, action: &ActionSpec, rollback: &ActionSpec, event: &EngineEvent) -> bool {
        let result = timeout(
            Duration::from_millis(rollback.timeout_ms),
            self.executor.rollback(rollback, event),
        )
        .await;

        match result {
            Ok(Ok(_)) => {
                tracing::info!(
                    action_id = %action.id,
                    rollback_id = %rollback.id,
                    "Rollback executed"
                );
                true
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    action_id = %action.id,
                    rollback_id = %rollback.id,
                    error = %err,
                    "Rollback failed"
                );
                false
            }
            Err(_) => {
                tracing::warn!(
                    action_id = %action.id,
                    rollback_id = %rollback.id,
                    timeout_ms = rollback.timeout_ms,
                    "Rollback timed out"
                );
                false
            }
        }
    }
}

fn log_cached(key: &DispatchKey, cached: ActionOutcome) -> ActionOutcome {
    tracing::debug!(
        rule_id = %key.rule_id,
        action_id = %key.action_id,
        event_id = %key.event_id,
        status = cached.status.as_str(),
        "Returning cached action outcome"
    );
    cached
}
