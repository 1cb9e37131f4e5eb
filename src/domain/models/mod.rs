pub mod action;
pub mod config;
pub mod decision;
pub mod event;
pub mod rule;

pub use action::{ActionDefaults, ActionId, ActionOutcome, ActionSpec, ActionType, OutcomeStatus};
pub use config::{Config, DispatcherConfig, EngineConfig, ExecutorConfig, ExecutorMode, LoggingConfig};
pub use decision::{DecisionId, DecisionRecord, DecisionStatus};
pub use event::{EngineEvent, EventId, EventKind, EventSeverity};
pub use rule::{ActionDefinition, Rule, RuleDefinition, RuleDocument, RuleId};
