//! Rules and their serialized form.
//!
//! A [`Rule`] binds a compiled condition to an ordered set of actions. The
//! wire form ([`RuleDefinition`]) is what rule files and
//! `export_config`/`import_config` exchange: action types stay plain strings
//! until conversion so unknown types surface as a typed error, and every
//! bookkeeping field is optional.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::action::{ActionDefaults, ActionId, ActionSpec, ActionType};
use crate::services::predicate::CompiledPredicate;

/// Current version of the rule document format.
pub const RULE_DOCUMENT_VERSION: u32 = 1;

/// Unique identifier for a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub String);

impl RuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RuleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A condition → action binding evaluated against incoming events.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub description: String,
    pub condition: CompiledPredicate,
    pub actions: Vec<ActionSpec>,
    /// Higher priorities are selected first.
    pub priority: i32,
    pub enabled: bool,
    /// Minimum time between executions, in milliseconds.
    pub cooldown_ms: u64,
    pub max_executions: u64,
    pub execution_count: u64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Rule {
    pub fn new(id: impl Into<RuleId>, name: impl Into<String>, condition: &str) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            condition: CompiledPredicate::compile(condition),
            actions: Vec::new(),
            priority: 0,
            enabled: true,
            cooldown_ms: 0,
            max_executions: u64::MAX,
            execution_count: 0,
            last_executed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cooldown_ms(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    pub fn with_max_executions(mut self, max_executions: u64) -> Self {
        self.max_executions = max_executions;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether the execution cap has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.execution_count >= self.max_executions
    }

    /// Structural validation. The condition is checked separately so that
    /// lenient registration can keep rules with an invalid condition.
    pub fn validate_structure(&self) -> EngineResult<()> {
        if self.id.0.trim().is_empty() {
            return Err(EngineError::Validation("rule id cannot be empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation(format!(
                "rule '{}': name cannot be empty",
                self.id
            )));
        }
        if self.actions.is_empty() {
            return Err(EngineError::Validation(format!(
                "rule '{}': at least one action is required",
                self.id
            )));
        }
        if self.execution_count > self.max_executions {
            return Err(EngineError::Validation(format!(
                "rule '{}': execution_count {} exceeds max_executions {}",
                self.id, self.execution_count, self.max_executions
            )));
        }

        let mut seen = HashSet::new();
        for action in &self.actions {
            action.validate()?;
            if !seen.insert(&action.id) {
                return Err(EngineError::Validation(format!(
                    "rule '{}': duplicate action id '{}'",
                    self.id, action.id
                )));
            }
        }

        self.action_layers().map(|_| ())
    }

    /// Full validation including the condition.
    pub fn validate(&self) -> EngineResult<()> {
        self.validate_structure()?;
        self.condition.validate()
    }

    /// Group action indices into dependency layers.
    ///
    /// Every action in layer `n` depends only on actions in layers `< n`.
    /// Within a layer actions keep their declaration order.
    pub fn action_layers(&self) -> EngineResult<Vec<Vec<usize>>> {
        let index: HashMap<&ActionId, usize> = self
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| (&a.id, i))
            .collect();

        let mut in_degree = vec![0usize; self.actions.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.actions.len()];

        for (i, action) in self.actions.iter().enumerate() {
            for dep in &action.depends_on {
                let Some(&d) = index.get(dep) else {
                    return Err(EngineError::Validation(format!(
                        "rule '{}': action '{}' depends on unknown action '{}'",
                        self.id, action.id, dep
                    )));
                };
                if d == i {
                    return Err(EngineError::Validation(format!(
                        "rule '{}': action '{}' depends on itself",
                        self.id, action.id
                    )));
                }
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut layers = Vec::new();
        let mut current: Vec<usize> = (0..self.actions.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut placed = 0;

        while !current.is_empty() {
            placed += current.len();
            let mut next = Vec::new();
            for &i in &current {
                for &dependent in &dependents[i] {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();
            layers.push(current);
            current = next;
        }

        if placed != self.actions.len() {
            let cyclic: Vec<String> = (0..self.actions.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.actions[i].id.to_string())
                .collect();
            return Err(EngineError::Validation(format!(
                "rule '{}': dependency cycle among actions [{}]",
                self.id,
                cyclic.join(", ")
            )));
        }

        Ok(layers)
    }
}

/// Serialized action as it appears in rule files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<Box<ActionDefinition>>,
}

impl ActionDefinition {
    pub fn into_spec(self, defaults: &ActionDefaults) -> EngineResult<ActionSpec> {
        let action_type: ActionType = self.action_type.parse()?;
        let mut spec = ActionSpec::with_defaults(self.id, action_type, defaults);
        spec.parameters = self.parameters;
        if let Some(timeout_ms) = self.timeout_ms {
            spec.timeout_ms = timeout_ms;
        }
        if let Some(max_attempts) = self.max_attempts {
            spec.max_attempts = max_attempts;
        }
        if let Some(multiplier) = self.backoff_multiplier {
            spec.backoff_multiplier = multiplier;
        }
        if let Some(base_delay_ms) = self.base_delay_ms {
            spec.base_delay_ms = base_delay_ms;
        }
        spec.depends_on = self.depends_on.into_iter().map(ActionId::from).collect();
        spec.rollback = match self.rollback {
            Some(rollback) => Some(Box::new(rollback.into_spec(defaults)?)),
            None => None,
        };
        Ok(spec)
    }
}

impl From<&ActionSpec> for ActionDefinition {
    fn from(spec: &ActionSpec) -> Self {
        Self {
            id: spec.id.to_string(),
            action_type: spec.action_type.as_str().to_string(),
            parameters: spec.parameters.clone(),
            timeout_ms: Some(spec.timeout_ms),
            max_attempts: Some(spec.max_attempts),
            backoff_multiplier: Some(spec.backoff_multiplier),
            base_delay_ms: Some(spec.base_delay_ms),
            depends_on: spec.depends_on.iter().map(ToString::to_string).collect(),
            rollback: spec
                .rollback
                .as_deref()
                .map(|r| Box::new(ActionDefinition::from(r))),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Serialized rule as it appears in rule files and exported configs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub condition: String,
    pub actions: Vec<ActionDefinition>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub cooldown_ms: u64,
    /// Absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_executions: Option<u64>,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl RuleDefinition {
    /// Convert to a [`Rule`]. Only action types are checked here; call
    /// [`Rule::validate`] for the rest.
    pub fn into_rule(self, defaults: &ActionDefaults) -> EngineResult<Rule> {
        let actions = self
            .actions
            .into_iter()
            .map(|a| a.into_spec(defaults))
            .collect::<EngineResult<Vec<_>>>()?;

        Ok(Rule {
            id: RuleId(self.id),
            name: self.name,
            description: self.description,
            condition: CompiledPredicate::compile(self.condition),
            actions,
            priority: self.priority,
            enabled: self.enabled,
            cooldown_ms: self.cooldown_ms,
            max_executions: self.max_executions.unwrap_or(u64::MAX),
            execution_count: self.execution_count,
            last_executed_at: self.last_executed_at,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}

impl From<&Rule> for RuleDefinition {
    fn from(rule: &Rule) -> Self {
        Self {
            id: rule.id.to_string(),
            name: rule.name.clone(),
            description: rule.description.clone(),
            condition: rule.condition.source().to_string(),
            actions: rule.actions.iter().map(ActionDefinition::from).collect(),
            priority: rule.priority,
            enabled: rule.enabled,
            cooldown_ms: rule.cooldown_ms,
            max_executions: (rule.max_executions != u64::MAX).then_some(rule.max_executions),
            execution_count: rule.execution_count,
            last_executed_at: rule.last_executed_at,
            created_at: Some(rule.created_at),
        }
    }
}

/// Top-level rule document: `{"version": 1, "rules": [...]}`.
///
/// A bare JSON array of rules is also accepted on import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

fn default_version() -> u32 {
    RULE_DOCUMENT_VERSION
}

impl RuleDocument {
    pub fn new(rules: Vec<RuleDefinition>) -> Self {
        Self {
            version: RULE_DOCUMENT_VERSION,
            rules,
        }
    }

    /// Parse a JSON document or bare array of rules.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Document(RuleDocument),
            Bare(Vec<RuleDefinition>),
        }

        // Parse to a value first so syntax errors keep their line/column.
        let value: serde_json::Value = serde_json::from_str(json)?;
        let doc = match serde_json::from_value::<Wire>(value.clone()) {
            Ok(Wire::Document(doc)) => doc,
            Ok(Wire::Bare(rules)) => Self::new(rules),
            // Re-run the specific shape to get a useful message.
            Err(_) if value.is_array() => {
                Self::new(serde_json::from_value::<Vec<RuleDefinition>>(value).map_err(shape_error)?)
            }
            Err(_) => serde_json::from_value::<RuleDocument>(value).map_err(shape_error)?,
        };

        if doc.version != RULE_DOCUMENT_VERSION {
            return Err(EngineError::Validation(format!(
                "unsupported rule document version {}",
                doc.version
            )));
        }
        Ok(doc)
    }

    /// Parse a YAML document or bare sequence of rules.
    pub fn from_yaml(yaml: &str) -> EngineResult<Self> {
        let value: serde_json::Value = serde_yaml::from_str(yaml).map_err(|e| {
            let (line, column) = e
                .location()
                .map_or((0, 0), |loc| (loc.line(), loc.column()));
            EngineError::ConfigParse {
                line,
                column,
                message: e.to_string(),
            }
        })?;
        Self::from_json(&value.to_string())
    }

    pub fn to_json_pretty(&self) -> EngineResult<String> {
        serde_json::to_string_pretty(self).map_err(EngineError::from)
    }
}

fn shape_error(err: serde_json::Error) -> EngineError {
    EngineError::ConfigParse {
        line: 0,
        column: 0,
        message: err.to_string(),
    }
}
