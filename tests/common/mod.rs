//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use warden::domain::models::config::Config;
use warden::{ActionSpec, ActionType, DecisionEngine, Rule, SimulatedExecutor};

/// Engine with default configuration and the given executor.
pub fn engine_with(executor: SimulatedExecutor) -> DecisionEngine {
    DecisionEngine::new(&Config::default(), Arc::new(executor))
}

/// Engine with a custom history capacity.
pub fn engine_with_capacity(executor: SimulatedExecutor, capacity: usize) -> DecisionEngine {
    let mut config = Config::default();
    config.engine.history_capacity = capacity;
    DecisionEngine::new(&config, Arc::new(executor))
}

/// Single-action restart rule.
pub fn restart_rule(id: &str, condition: &str, priority: i32) -> Rule {
    Rule::new(id, format!("Rule {id}"), condition)
        .with_priority(priority)
        .with_action(ActionSpec::new("restart", ActionType::Restart).with_timeout_ms(1_000))
}
