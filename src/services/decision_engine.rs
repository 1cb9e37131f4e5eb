//! Decision engine.
//!
//! Composition root wiring the rule registry, the action dispatcher and the
//! decision history. One engine instance owns all three; construct it
//! explicitly and share it behind an `Arc` if several tasks feed it events.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::Instrument;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::action::OutcomeStatus;
use crate::domain::models::config::Config;
use crate::domain::models::decision::{DecisionId, DecisionRecord, DecisionStatus};
use crate::domain::models::event::EngineEvent;
use crate::domain::models::rule::{Rule, RuleDocument, RuleId};
use crate::domain::ports::action_executor::ActionExecutor;
use crate::services::action_dispatcher::ActionDispatcher;
use crate::services::builtin_rules::builtin_rules;
use crate::services::decision_history::DecisionHistory;
use crate::services::rule_registry::RuleRegistry;

/// What a pending decision needs to resume.
#[derive(Clone)]
struct PendingDecision {
    rule: Rule,
    event: EngineEvent,
}

/// Rule-based override and recovery engine.
pub struct DecisionEngine {
    registry: RuleRegistry,
    dispatcher: ActionDispatcher,
    history: DecisionHistory,
    pending: Arc<RwLock<HashMap<DecisionId, PendingDecision>>>,
}

impl DecisionEngine {
    pub fn new(config: &Config, executor: Arc<dyn ActionExecutor>) -> Self {
        let registry = RuleRegistry::new(config.dispatcher.action_defaults.clone())
            .with_strict_predicates(config.engine.strict_predicates);

        Self {
            registry,
            dispatcher: ActionDispatcher::new(executor, config.dispatcher.clone()),
            history: DecisionHistory::new(config.engine.history_capacity),
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register the built-in rule packs.
    pub async fn with_builtin_rules(self) -> EngineResult<Self> {
        for rule in builtin_rules() {
            self.add_rule(rule).await?;
        }
        Ok(self)
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    pub fn history(&self) -> &DecisionHistory {
        &self.history
    }

    /// Process one event.
    ///
    /// Action failures never surface as `Err`; they produce a failed record.
    pub async fn process(&self, event: EngineEvent) -> DecisionRecord {
        let span = tracing::info_span!(
            "process_event",
            event_id = %event.id,
            kind = %event.kind,
            severity = %event.severity,
            category = %event.category
        );
        self.process_inner(event).instrument(span).await
    }

    async fn process_inner(&self, event: EngineEvent) -> DecisionRecord {
        let Some(rule) = self.registry.select_and_acquire(&event, Utc::now()).await else {
            tracing::info!(event_id = %event.id, "No eligible rule matched");
            let record = DecisionRecord::no_match(event.id);
            self.record_history(record.clone()).await;
            return record;
        };

        let outcomes = self.dispatcher.dispatch_all(&rule, &event).await;
        let record = DecisionRecord::for_rule(event.id, rule.id.clone(), outcomes);

        tracing::info!(
            decision_id = %record.id,
            rule_id = %rule.id,
            status = %record.status,
            actions = record.actions_taken.len(),
            "Decision recorded"
        );

        if record.is_pending() {
            self.pending
                .write()
                .await
                .insert(record.id, PendingDecision { rule, event });
        }
        self.record_history(record.clone()).await;
        record
    }

    /// Append to history and forget pending state of evicted decisions.
    async fn record_history(&self, record: DecisionRecord) {
        let evicted = self.history.record(record).await;
        if evicted.is_empty() {
            return;
        }
        let mut pending = self.pending.write().await;
        for id in evicted {
            if pending.remove(&id).is_some() {
                tracing::warn!(decision_id = %id, "Pending decision evicted from history");
            }
        }
    }

    /// Settle a pending decision.
    ///
    /// Approval completes every operator action and runs the actions that
    /// were waiting on them. Rejection fails the operator actions and skips
    /// their dependents. Actions that already ran are left as they are.
    pub async fn resolve(
        &self,
        decision_id: DecisionId,
        approved: bool,
        note: Option<String>,
    ) -> EngineResult<DecisionRecord> {
        let target = if approved { "completed" } else { "failed" };
        let (mut record, pending) = self.take_pending(decision_id, target).await?;

        for outcome in &mut record.actions_taken {
            if outcome.status == OutcomeStatus::Pending && outcome.action_type.awaits_operator() {
                if approved {
                    outcome.finish(OutcomeStatus::Succeeded, None);
                } else {
                    outcome.finish(OutcomeStatus::Failed, Some("rejected by operator".to_string()));
                }
                self.dispatcher
                    .update_cached(&pending.rule.id, pending.event.id, outcome.clone())
                    .await;
            }
        }

        // Waiting actions now either run or are skipped; settled ones are
        // taken from the record, never re-dispatched.
        record.actions_taken = self
            .dispatcher
            .resume_all(&pending.rule, &pending.event, &record.actions_taken)
            .await;
        record.note = note;
        record.refresh_status();

        if record.is_pending() {
            self.pending.write().await.insert(record.id, pending);
        }

        tracing::info!(
            decision_id = %decision_id,
            approved,
            status = %record.status,
            "Pending decision resolved"
        );
        self.history.update(record.clone()).await?;
        Ok(record)
    }

    /// Cancel a pending decision. Outcomes that already succeeded are kept.
    pub async fn cancel(&self, decision_id: DecisionId, note: Option<String>) -> EngineResult<DecisionRecord> {
        let (mut record, pending) = self.take_pending(decision_id, "cancelled").await?;

        for outcome in &mut record.actions_taken {
            if outcome.status == OutcomeStatus::Pending {
                outcome.finish(OutcomeStatus::Cancelled, Some("cancelled by operator".to_string()));
                self.dispatcher
                    .update_cached(&pending.rule.id, pending.event.id, outcome.clone())
                    .await;
            }
        }
        record.note = note;
        record.status = DecisionStatus::Cancelled;
        record.success = false;

        tracing::info!(decision_id = %decision_id, "Pending decision cancelled");
        self.history.update(record.clone()).await?;
        Ok(record)
    }

    async fn take_pending(
        &self,
        decision_id: DecisionId,
        target: &str,
    ) -> EngineResult<(DecisionRecord, PendingDecision)> {
        let Some(record) = self.history.get(decision_id).await else {
            self.pending.write().await.remove(&decision_id);
            return Err(EngineError::DecisionNotFound(decision_id.0));
        };

        if !record.is_pending() {
            return Err(EngineError::InvalidTransition {
                id: decision_id.0,
                from: record.status.to_string(),
                to: target.to_string(),
            });
        }

        let pending = self
            .pending
            .write()
            .await
            .remove(&decision_id)
            .ok_or(EngineError::DecisionNotFound(decision_id.0))?;
        Ok((record, pending))
    }

    pub async fn pending_decisions(&self) -> Vec<DecisionRecord> {
        self.history.pending().await
    }

    pub async fn add_rule(&self, rule: Rule) -> EngineResult<()> {
        self.registry.add_rule(rule.clone()).await?;
        self.dispatcher.register_breakers(&rule).await;
        Ok(())
    }

    /// Register a rule whose condition may not compile; it never matches.
    pub async fn add_rule_lenient(&self, rule: Rule) -> EngineResult<()> {
        self.registry.add_rule_lenient(rule.clone()).await?;
        self.dispatcher.register_breakers(&rule).await;
        Ok(())
    }

    pub async fn remove_rule(&self, id: &RuleId) -> EngineResult<Rule> {
        self.registry.remove_rule(id).await
    }

    pub async fn toggle_rule(&self, id: &RuleId, enabled: bool) -> EngineResult<()> {
        self.registry.toggle_rule(id, enabled).await
    }

    pub async fn get_rule(&self, id: &RuleId) -> Option<Rule> {
        self.registry.get_rule(id).await
    }

    pub async fn list_rules(&self) -> Vec<Rule> {
        self.registry.list_rules().await
    }

    pub async fn match_rules(&self, event: &EngineEvent) -> Vec<Rule> {
        self.registry.match_rules(event).await
    }

    pub async fn export_config(&self) -> EngineResult<String> {
        self.registry.export_config().await
    }

    pub async fn import_config(&self, json: &str) -> EngineResult<usize> {
        let count = self.registry.import_config(json).await?;
        self.register_all_breakers().await;
        Ok(count)
    }

    /// Add the rules of a parsed document to the registry.
    pub async fn load_document(&self, doc: RuleDocument) -> EngineResult<usize> {
        let count = self.registry.extend_from_document(doc).await?;
        self.register_all_breakers().await;
        Ok(count)
    }

    async fn register_all_breakers(&self) {
        for rule in self.registry.list_rules().await {
            self.dispatcher.register_breakers(&rule).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::simulated_executor::SimulatedExecutor;
    use crate::domain::models::action::{ActionSpec, ActionType};
    use crate::domain::models::event::EventSeverity;

    fn engine(executor: SimulatedExecutor) -> DecisionEngine {
        DecisionEngine::new(&Config::default(), Arc::new(executor))
    }

    #[tokio::test]
    async fn test_no_match_is_recorded() {
        let engine = engine(SimulatedExecutor::new());
        let record = engine
            .process(EngineEvent::error(EventSeverity::Info, "system"))
            .await;

        assert_eq!(record.status, DecisionStatus::NoMatch);
        assert!(!record.success);
        assert_eq!(engine.history().len().await, 1);
    }

    #[tokio::test]
    async fn test_failure_becomes_failed_record() {
        let executor = SimulatedExecutor::new().failing("restart", u32::MAX);
        let engine = engine(executor);
        engine
            .add_rule(
                Rule::new("r1", "Restart", "true")
                    .with_action(ActionSpec::new("restart", ActionType::Restart)),
            )
            .await
            .unwrap();

        let record = engine
            .process(EngineEvent::error(EventSeverity::Error, "system"))
            .await;
        assert_eq!(record.status, DecisionStatus::Failed);
        assert_eq!(record.matched_rule_id, Some(RuleId::from("r1")));

        // The engine keeps going.
        let next = engine
            .process(EngineEvent::error(EventSeverity::Error, "system"))
            .await;
        assert_eq!(next.actions_taken.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_runs_waiting_actions() {
        let executor = SimulatedExecutor::new();
        let engine = engine(executor.clone());
        engine
            .add_rule(
                Rule::new("r1", "Approve then recreate", "true")
                    .with_action(ActionSpec::new("approve", ActionType::RequireApproval))
                    .with_action(ActionSpec::new("recreate", ActionType::Recreate).depends_on("approve")),
            )
            .await
            .unwrap();

        let record = engine
            .process(EngineEvent::error(EventSeverity::Error, "system"))
            .await;
        assert_eq!(record.status, DecisionStatus::Pending);
        assert_eq!(engine.pending_decisions().await.len(), 1);

        let resolved = engine
            .resolve(record.id, true, Some("looks fine".into()))
            .await
            .unwrap();
        assert_eq!(resolved.status, DecisionStatus::Completed);
        assert_eq!(resolved.note.as_deref(), Some("looks fine"));
        assert_eq!(executor.call_count("recreate"), 1);
        assert!(engine.pending_decisions().await.is_empty());

        assert!(matches!(
            engine.resolve(record.id, true, None).await,
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_reject_skips_dependents() {
        let executor = SimulatedExecutor::new();
        let engine = engine(executor.clone());
        engine
            .add_rule(
                Rule::new("r1", "Approve then recreate", "true")
                    .with_action(ActionSpec::new("approve", ActionType::RequireApproval))
                    .with_action(ActionSpec::new("recreate", ActionType::Recreate).depends_on("approve")),
            )
            .await
            .unwrap();

        let record = engine
            .process(EngineEvent::error(EventSeverity::Error, "system"))
            .await;
        let rejected = engine.resolve(record.id, false, None).await.unwrap();

        assert_eq!(rejected.status, DecisionStatus::Failed);
        assert_eq!(rejected.actions_taken[1].status, OutcomeStatus::Skipped);
        assert_eq!(executor.call_count("recreate"), 0);
    }

    #[tokio::test]
    async fn test_cancel_keeps_applied_side_effects() {
        let engine = engine(SimulatedExecutor::new());
        engine
            .add_rule(
                Rule::new("r1", "Restart then page", "true")
                    .with_action(ActionSpec::new("restart", ActionType::Restart))
                    .with_action(ActionSpec::new("page", ActionType::ManualIntervention)),
            )
            .await
            .unwrap();

        let record = engine
            .process(EngineEvent::error(EventSeverity::Critical, "system"))
            .await;
        let cancelled = engine.cancel(record.id, None).await.unwrap();

        assert_eq!(cancelled.status, DecisionStatus::Cancelled);
        assert_eq!(cancelled.actions_taken[0].status, OutcomeStatus::Succeeded);
        assert_eq!(cancelled.actions_taken[1].status, OutcomeStatus::Cancelled);
        assert!(matches!(
            engine.cancel(record.id, None).await,
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_does_not_repeat_evicted_side_effects() {
        let executor = SimulatedExecutor::new();
        let mut config = Config::default();
        config.dispatcher.idempotency_capacity = 1;
        let engine = DecisionEngine::new(&config, Arc::new(executor.clone()));
        engine
            .add_rule(
                Rule::new("r1", "Restart then approve", "true")
                    .with_action(ActionSpec::new("restart", ActionType::Restart))
                    .with_action(ActionSpec::new("approve", ActionType::RequireApproval)),
            )
            .await
            .unwrap();

        let record = engine
            .process(EngineEvent::error(EventSeverity::Critical, "system"))
            .await;
        assert_eq!(record.status, DecisionStatus::Pending);

        let resolved = engine.resolve(record.id, true, None).await.unwrap();
        assert_eq!(resolved.status, DecisionStatus::Completed);
        assert_eq!(executor.call_count("restart"), 1);
    }

    #[tokio::test]
    async fn test_evicted_pending_decisions_are_forgotten() {
        let mut config = Config::default();
        config.engine.history_capacity = 1;
        let engine = DecisionEngine::new(&config, Arc::new(SimulatedExecutor::new()));
        engine
            .add_rule(
                Rule::new("r1", "Page", "true")
                    .with_action(ActionSpec::new("page", ActionType::ManualIntervention)),
            )
            .await
            .unwrap();

        let mut first = None;
        for _ in 0..50 {
            let record = engine
                .process(EngineEvent::error(EventSeverity::Error, "system"))
                .await;
            first.get_or_insert(record.id);
        }

        assert_eq!(engine.history().len().await, 1);
        assert_eq!(engine.pending.read().await.len(), 1);
        assert!(matches!(
            engine.resolve(first.unwrap(), true, None).await,
            Err(EngineError::DecisionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rule_breaker_threshold_applies_to_external_failures() {
        let engine = engine(SimulatedExecutor::new());
        engine
            .add_rule(
                Rule::new("r1", "Guarded restart", "true").with_action(
                    ActionSpec::new("guard", ActionType::CircuitBreaker)
                        .with_parameter("breaker", serde_json::json!("payments"))
                        .with_parameter("threshold", serde_json::json!(2)),
                ),
            )
            .await
            .unwrap();

        engine.dispatcher().record_breaker_failure("payments", "timeout").await;
        engine.dispatcher().record_breaker_failure("payments", "timeout").await;

        let record = engine
            .process(EngineEvent::error(EventSeverity::Error, "system"))
            .await;
        assert_eq!(record.status, DecisionStatus::Failed);
        assert_eq!(record.actions_taken[0].output.as_ref().unwrap()["blocked"], true);
    }

    #[tokio::test]
    async fn test_unknown_decision() {
        let engine = engine(SimulatedExecutor::new());
        assert!(matches!(
            engine.resolve(DecisionId::new(), true, None).await,
            Err(EngineError::DecisionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_builtin_rules_load() {
        let engine = engine(SimulatedExecutor::new())
            .with_builtin_rules()
            .await
            .unwrap();
        assert_eq!(engine.list_rules().await.len(), builtin_rules().len());

        let record = engine
            .process(EngineEvent::user_command("rm -rf /").with_context("destructive", serde_json::json!(true)))
            .await;
        assert_eq!(record.status, DecisionStatus::Pending);
        assert_eq!(
            record.matched_rule_id,
            Some(RuleId::from("command-destructive-approval"))
        );
    }
}
