//! Engine services: predicate evaluation, rule selection, action dispatch
//! and decision bookkeeping.

pub mod action_dispatcher;
pub mod builtin_rules;
pub mod circuit_breaker;
pub mod cooldown_tracker;
pub mod decision_engine;
pub mod decision_history;
pub mod predicate;
pub mod rule_registry;

pub use action_dispatcher::{ActionDispatcher, DispatchKey};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerService, CircuitState};
pub use cooldown_tracker::CooldownTracker;
pub use decision_engine::DecisionEngine;
pub use decision_history::{DecisionHistory, HistoryFilter, HistoryStats};
pub use predicate::{CompiledPredicate, Predicate, PredicateError};
pub use rule_registry::RuleRegistry;
