//! Warden - rule-based override and recovery decision engine
//!
//! Events (runtime errors, user commands, strategy-selection requests) are
//! matched against prioritized condition → action rules. The first eligible
//! rule's actions are dispatched and every decision lands in a bounded
//! history.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and the executor port
//! - **Service Layer** (`services`): predicates, registry, dispatcher, engine
//! - **Adapters** (`adapters`): port implementations
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use warden::{Config, DecisionEngine, EngineEvent, EventSeverity, SimulatedExecutor};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let engine = DecisionEngine::new(&Config::default(), Arc::new(SimulatedExecutor::new()))
//!     .with_builtin_rules()
//!     .await?;
//! let record = engine
//!     .process(EngineEvent::error(EventSeverity::Critical, "system"))
//!     .await;
//! println!("{} -> {}", record.event_id, record.status);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use adapters::{ProcessExecutor, SimulatedExecutor};
pub use domain::models::{
    ActionOutcome, ActionSpec, ActionType, Config, DecisionId, DecisionRecord, DecisionStatus,
    EngineEvent, EventKind, EventSeverity, OutcomeStatus, Rule, RuleDocument, RuleId,
};
pub use domain::ports::{ActionExecutor, ExecutionReport};
pub use domain::{EngineError, EngineResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{DecisionEngine, HistoryFilter, RuleRegistry};
