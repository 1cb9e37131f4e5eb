//! End-to-end decision engine behaviour.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use warden::{
    ActionSpec, ActionType, DecisionStatus, EngineError, EngineEvent, EventSeverity,
    HistoryFilter, OutcomeStatus, Rule, RuleId, SimulatedExecutor,
};

use common::{engine_with, engine_with_capacity, restart_rule};

#[tokio::test]
async fn test_critical_system_error_restarts() {
    let executor = SimulatedExecutor::new();
    let engine = engine_with(executor.clone());
    engine
        .add_rule(restart_rule(
            "critical-system",
            r#"severity == "critical" AND category == "system""#,
            1,
        ))
        .await
        .unwrap();

    let event = EngineEvent::error(EventSeverity::Critical, "system");
    let matched = engine.match_rules(&event).await;
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].id, RuleId::from("critical-system"));

    let record = engine.process(event).await;
    assert_eq!(record.status, DecisionStatus::Completed);
    assert!(record.success);
    assert_eq!(record.actions_taken.len(), 1);
    assert_eq!(record.actions_taken[0].status, OutcomeStatus::Succeeded);
    assert_eq!(executor.call_count("restart"), 1);
}

#[tokio::test]
async fn test_priority_and_registration_order() {
    let engine = engine_with(SimulatedExecutor::new());
    engine.add_rule(restart_rule("low", "true", 1)).await.unwrap();
    engine.add_rule(restart_rule("tie-a", "true", 5)).await.unwrap();
    engine.add_rule(restart_rule("high", "true", 9)).await.unwrap();
    engine.add_rule(restart_rule("tie-b", "true", 5)).await.unwrap();

    let event = EngineEvent::error(EventSeverity::Error, "system");
    let ids: Vec<String> = engine
        .match_rules(&event)
        .await
        .iter()
        .map(|r| r.id.to_string())
        .collect();
    assert_eq!(ids, vec!["high", "tie-a", "tie-b", "low"]);

    let record = engine.process(event).await;
    assert_eq!(record.matched_rule_id, Some(RuleId::from("high")));
}

#[tokio::test]
async fn test_cooldown_falls_through_to_next_rule() {
    let engine = engine_with(SimulatedExecutor::new());
    engine
        .add_rule(restart_rule("primary", "true", 10).with_cooldown_ms(60_000))
        .await
        .unwrap();
    engine.add_rule(restart_rule("fallback", "true", 1)).await.unwrap();

    let first = engine
        .process(EngineEvent::error(EventSeverity::Error, "system"))
        .await;
    let second = engine
        .process(EngineEvent::error(EventSeverity::Error, "system"))
        .await;

    assert_eq!(first.matched_rule_id, Some(RuleId::from("primary")));
    assert_eq!(second.matched_rule_id, Some(RuleId::from("fallback")));
}

#[tokio::test]
async fn test_execution_cap_and_toggle() {
    let engine = engine_with(SimulatedExecutor::new());
    engine
        .add_rule(restart_rule("once", "true", 1).with_max_executions(1))
        .await
        .unwrap();

    let first = engine
        .process(EngineEvent::error(EventSeverity::Error, "system"))
        .await;
    let second = engine
        .process(EngineEvent::error(EventSeverity::Error, "system"))
        .await;
    assert_eq!(first.status, DecisionStatus::Completed);
    assert_eq!(second.status, DecisionStatus::NoMatch);

    let rule = engine.get_rule(&RuleId::from("once")).await.unwrap();
    assert_eq!(rule.execution_count, 1);

    engine.add_rule(restart_rule("other", "true", 1)).await.unwrap();
    engine.toggle_rule(&RuleId::from("other"), false).await.unwrap();
    let third = engine
        .process(EngineEvent::error(EventSeverity::Error, "system"))
        .await;
    assert_eq!(third.status, DecisionStatus::NoMatch);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_events_share_one_slot() {
    let engine = Arc::new(engine_with(SimulatedExecutor::new()));
    engine
        .add_rule(restart_rule("single", "true", 1).with_max_executions(1))
        .await
        .unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .process(EngineEvent::error(EventSeverity::Error, "system"))
                    .await
            })
        })
        .collect();

    let mut matched = 0;
    for handle in handles {
        if handle.await.unwrap().matched_rule_id.is_some() {
            matched += 1;
        }
    }
    assert_eq!(matched, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_waits_for_backoff() {
    let executor = SimulatedExecutor::new().failing("retry-agent", u32::MAX);
    let engine = engine_with(executor.clone());
    engine
        .add_rule(
            Rule::new("agent-retry", "Retry agent", r#"category == "agent""#).with_action(
                ActionSpec::new("retry-agent", ActionType::Retry).with_retry(3, 100, 2.0),
            ),
        )
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let record = engine
        .process(EngineEvent::error(EventSeverity::Error, "agent"))
        .await;

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(record.status, DecisionStatus::Failed);
    let outcome = &record.actions_taken[0];
    assert_eq!(outcome.attempts, 3);
    assert!(outcome.error.as_deref().unwrap().contains("after 3 attempts"));
    assert_eq!(executor.call_count("retry-agent"), 3);
}

#[tokio::test]
async fn test_failures_never_stop_the_engine() {
    let executor = SimulatedExecutor::new().failing("restart", 1);
    let engine = engine_with(executor);
    engine.add_rule(restart_rule("r", "true", 1)).await.unwrap();

    let failed = engine
        .process(EngineEvent::error(EventSeverity::Error, "system"))
        .await;
    let recovered = engine
        .process(EngineEvent::error(EventSeverity::Error, "system"))
        .await;

    assert_eq!(failed.status, DecisionStatus::Failed);
    assert_eq!(recovered.status, DecisionStatus::Completed);
}

#[tokio::test]
async fn test_circuit_breaker_blocks_until_reset() {
    let engine = engine_with(SimulatedExecutor::new());
    engine
        .add_rule(
            Rule::new("guard", "Guard payments", r#"category == "payments""#).with_action(
                ActionSpec::new("guard", ActionType::CircuitBreaker)
                    .with_parameter("breaker", json!("payments"))
                    .with_parameter("threshold", json!(2)),
            ),
        )
        .await
        .unwrap();

    let ok = engine
        .process(EngineEvent::error(EventSeverity::Error, "payments"))
        .await;
    assert_eq!(ok.status, DecisionStatus::Completed);

    engine.dispatcher().record_breaker_failure("payments", "503").await;
    engine.dispatcher().record_breaker_failure("payments", "503").await;

    let blocked = engine
        .process(EngineEvent::error(EventSeverity::Error, "payments"))
        .await;
    assert_eq!(blocked.status, DecisionStatus::Failed);
    assert_eq!(blocked.actions_taken[0].output.as_ref().unwrap()["blocked"], true);

    engine.dispatcher().breakers().reset("payments").await;
    let reopened = engine
        .process(EngineEvent::error(EventSeverity::Error, "payments"))
        .await;
    assert_eq!(reopened.status, DecisionStatus::Completed);
}

#[tokio::test]
async fn test_rollback_after_failed_failover() {
    let executor = SimulatedExecutor::new().failing("failover", u32::MAX);
    let engine = engine_with(executor.clone());
    engine
        .add_rule(
            Rule::new("net", "Failover", r#"category == "network""#).with_action(
                ActionSpec::new("failover", ActionType::Failover)
                    .with_rollback(ActionSpec::new("restart-primary", ActionType::Restart)),
            ),
        )
        .await
        .unwrap();

    let record = engine
        .process(EngineEvent::error(EventSeverity::Error, "network"))
        .await;
    assert_eq!(record.status, DecisionStatus::Failed);
    assert!(record.actions_taken[0].rolled_back);
    assert_eq!(executor.call_count("restart-primary"), 1);
}

#[tokio::test]
async fn test_manual_intervention_resolve_and_cancel() {
    let executor = SimulatedExecutor::new();
    let engine = engine_with(executor.clone());
    engine
        .add_rule(
            Rule::new("escalate", "Escalate", r#"severity == "critical""#)
                .with_action(ActionSpec::new("isolate", ActionType::ScaleDown))
                .with_action(ActionSpec::new("page", ActionType::ManualIntervention))
                .with_action(ActionSpec::new("recreate", ActionType::Recreate).depends_on("page")),
        )
        .await
        .unwrap();

    let pending = engine
        .process(EngineEvent::error(EventSeverity::Critical, "storage"))
        .await;
    assert_eq!(pending.status, DecisionStatus::Pending);
    assert_eq!(engine.pending_decisions().await.len(), 1);

    let resolved = engine.resolve(pending.id, true, None).await.unwrap();
    assert_eq!(resolved.status, DecisionStatus::Completed);
    assert_eq!(executor.call_count("isolate"), 1, "no repeated side effects");
    assert_eq!(executor.call_count("recreate"), 1);

    let second = engine
        .process(EngineEvent::error(EventSeverity::Critical, "storage"))
        .await;
    let cancelled = engine
        .cancel(second.id, Some("handled by hand".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, DecisionStatus::Cancelled);
    let status = |id: &str| {
        cancelled
            .actions_taken
            .iter()
            .find(|o| o.action_id.as_str() == id)
            .map(|o| o.status)
    };
    assert_eq!(status("isolate"), Some(OutcomeStatus::Succeeded));
    assert_eq!(status("page"), Some(OutcomeStatus::Cancelled));
    assert_eq!(status("recreate"), Some(OutcomeStatus::Cancelled));

    let stored = engine.history().get(second.id).await.unwrap();
    assert_eq!(stored.note.as_deref(), Some("handled by hand"));
    assert!(matches!(
        engine.resolve(second.id, true, None).await,
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_history_is_bounded_and_most_recent_first() {
    let engine = engine_with_capacity(SimulatedExecutor::new(), 3);
    engine.add_rule(restart_rule("r", r#"category == "system""#, 1)).await.unwrap();

    let mut ids = Vec::new();
    for category in ["system", "other", "system", "system"] {
        ids.push(
            engine
                .process(EngineEvent::error(EventSeverity::Error, category))
                .await
                .id,
        );
    }

    let history = engine.history().all().await;
    assert_eq!(history.len(), 3);
    let got: Vec<_> = history.iter().map(|r| r.id).collect();
    assert_eq!(got, vec![ids[3], ids[2], ids[1]]);

    let matched = engine
        .history()
        .query(&HistoryFilter::new().with_rule("r").with_limit(1))
        .await;
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].id, ids[3]);

    let since = Utc::now() - chrono::Duration::minutes(1);
    let recent = engine
        .history()
        .query(&HistoryFilter::new().with_time_range(since, Utc::now()))
        .await;
    assert_eq!(recent.len(), 3);
}

#[tokio::test]
async fn test_export_import_round_trip() {
    let source = engine_with(SimulatedExecutor::new())
        .with_builtin_rules()
        .await
        .unwrap();
    source
        .toggle_rule(&RuleId::from("strategy-reflexion"), false)
        .await
        .unwrap();
    let exported = source.export_config().await.unwrap();

    let target = engine_with(SimulatedExecutor::new());
    let count = target.import_config(&exported).await.unwrap();

    let before = source.list_rules().await;
    let after = target.list_rules().await;
    assert_eq!(count, before.len());
    for (a, b) in before.iter().zip(&after) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.enabled, b.enabled);
        assert_eq!(a.priority, b.priority);
        assert_eq!(a.actions, b.actions);
        assert_eq!(a.condition.source(), b.condition.source());
    }
}

#[tokio::test]
async fn test_import_errors_leave_registry_untouched() {
    let engine = engine_with(SimulatedExecutor::new());
    engine.add_rule(restart_rule("keep", "true", 1)).await.unwrap();

    let malformed = engine.import_config("{\"rules\": [").await;
    assert!(matches!(malformed, Err(EngineError::ConfigParse { .. })));

    let unknown_type = engine
        .import_config(
            r#"[{"id": "x", "name": "X", "condition": "true",
                 "actions": [{"id": "a", "type": "teleport"}]}]"#,
        )
        .await;
    assert!(matches!(unknown_type, Err(EngineError::UnknownActionType(_))));

    let bad_condition = engine
        .import_config(
            r#"[{"id": "x", "name": "X", "condition": "severity >>> 1",
                 "actions": [{"id": "a", "type": "restart"}]}]"#,
        )
        .await;
    assert!(matches!(bad_condition, Err(EngineError::Validation(_))));

    let rules = engine.list_rules().await;
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].id, RuleId::from("keep"));
}

#[tokio::test]
async fn test_unsafe_conditions_are_rejected() {
    let engine = engine_with(SimulatedExecutor::new());
    for condition in [
        "process.exit()",
        "severity == 'critical'; rm -rf /",
        "constructor.constructor('return this')()",
    ] {
        let result = engine.add_rule(restart_rule("unsafe", condition, 1)).await;
        assert!(
            matches!(result, Err(EngineError::Validation(_))),
            "{condition} should not compile"
        );
    }
    assert!(engine.list_rules().await.is_empty());
}
