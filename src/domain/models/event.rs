//! Engine events.
//!
//! An [`EngineEvent`] is the only input the decision engine reacts to. It
//! exposes a fixed schema (`id`, `kind`, `severity`, `category`, `source` and
//! the free-form `context` map) that rule predicates may read.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A runtime error reported by an agent or subsystem.
    Error,
    /// A command issued by a human operator.
    UserCommand,
    /// A request to pick a reasoning strategy for a task.
    StrategySelection,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::UserCommand => "user_command",
            Self::StrategySelection => "strategy_selection",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(Self::Error),
            "user_command" | "command" => Some(Self::UserCommand),
            "strategy_selection" | "strategy" => Some(Self::StrategySelection),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event severity level, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" | "low" => Some(Self::Info),
            "warning" | "warn" | "medium" => Some(Self::Warning),
            "error" | "high" => Some(Self::Error),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input record evaluated by the decision engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    #[serde(default)]
    pub id: EventId,
    pub kind: EventKind,
    pub severity: EventSeverity,
    /// Free-form category such as `system`, `network`, `agent` or `resource`.
    pub category: String,
    /// Component, agent or user that produced the event.
    #[serde(default)]
    pub source: String,
    /// Additional fields readable by predicates as `context.<key>`.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(kind: EventKind, severity: EventSeverity, category: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            kind,
            severity,
            category: category.into(),
            source: String::new(),
            context: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Shorthand for an error event.
    pub fn error(severity: EventSeverity, category: impl Into<String>) -> Self {
        Self::new(EventKind::Error, severity, category)
    }

    /// Shorthand for a user command event.
    pub fn user_command(command: impl Into<String>) -> Self {
        Self::new(EventKind::UserCommand, EventSeverity::Info, "command")
            .with_context("command", serde_json::Value::String(command.into()))
    }

    /// Shorthand for a strategy selection request.
    pub fn strategy_selection(complexity: f64) -> Self {
        Self::new(EventKind::StrategySelection, EventSeverity::Info, "reasoning")
            .with_context("complexity", serde_json::json!(complexity))
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(EventSeverity::Debug < EventSeverity::Info);
        assert!(EventSeverity::Info < EventSeverity::Warning);
        assert!(EventSeverity::Warning < EventSeverity::Error);
        assert!(EventSeverity::Error < EventSeverity::Critical);
    }

    #[test]
    fn test_severity_aliases() {
        assert_eq!(EventSeverity::parse_str("HIGH"), Some(EventSeverity::Error));
        assert_eq!(EventSeverity::parse_str("medium"), Some(EventSeverity::Warning));
        assert_eq!(EventSeverity::parse_str("bogus"), None);
    }

    #[test]
    fn test_event_deserializes_with_defaults() {
        let event: EngineEvent = serde_json::from_str(
            r#"{"kind": "error", "severity": "critical", "category": "system"}"#,
        )
        .unwrap();

        assert_eq!(event.kind, EventKind::Error);
        assert_eq!(event.severity, EventSeverity::Critical);
        assert!(event.source.is_empty());
        assert!(event.context.is_empty());
    }

    #[test]
    fn test_builders() {
        let event = EngineEvent::user_command("rm -rf /tmp/cache")
            .with_source("operator")
            .with_context("destructive", serde_json::json!(true));

        assert_eq!(event.kind, EventKind::UserCommand);
        assert_eq!(event.source, "operator");
        assert_eq!(event.context.get("destructive"), Some(&serde_json::json!(true)));
    }
}
