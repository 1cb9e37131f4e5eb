//! Rule registry.
//!
//! Holds rules in registration order behind a single `RwLock`. Matching is a
//! pure read; selecting the winning rule and recording its execution happen
//! under one write lock so two concurrent events cannot both take the same
//! cooldown slot.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::action::ActionDefaults;
use crate::domain::models::event::EngineEvent;
use crate::domain::models::rule::{Rule, RuleDefinition, RuleDocument, RuleId};
use crate::services::cooldown_tracker::CooldownTracker;

/// Registry of condition → action rules.
#[derive(Clone)]
pub struct RuleRegistry {
    rules: Arc<RwLock<Vec<Rule>>>,
    defaults: ActionDefaults,
    strict_predicates: bool,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new(ActionDefaults::default())
    }
}

impl RuleRegistry {
    pub fn new(defaults: ActionDefaults) -> Self {
        Self {
            rules: Arc::new(RwLock::new(Vec::new())),
            defaults,
            strict_predicates: true,
        }
    }

    /// When disabled, `import_config` keeps rules whose condition fails to
    /// compile; they never match.
    pub fn with_strict_predicates(mut self, strict: bool) -> Self {
        self.strict_predicates = strict;
        self
    }

    pub fn action_defaults(&self) -> &ActionDefaults {
        &self.defaults
    }

    /// Register a rule, rejecting invalid conditions.
    pub async fn add_rule(&self, rule: Rule) -> EngineResult<()> {
        rule.validate()?;
        self.insert(rule).await
    }

    /// Register a rule, keeping it even if its condition does not compile.
    pub async fn add_rule_lenient(&self, rule: Rule) -> EngineResult<()> {
        rule.validate_structure()?;
        if let Some(err) = rule.condition.error() {
            tracing::warn!(
                rule_id = %rule.id,
                condition = %rule.condition.source(),
                error = %err,
                "Registering rule with invalid condition; it will never match"
            );
        }
        self.insert(rule).await
    }

    async fn insert(&self, rule: Rule) -> EngineResult<()> {
        let mut store = self.rules.write().await;
        if store.iter().any(|r| r.id == rule.id) {
            return Err(EngineError::DuplicateRule(rule.id.to_string()));
        }

        tracing::info!(
            rule_id = %rule.id,
            rule_name = %rule.name,
            priority = rule.priority,
            actions = rule.actions.len(),
            "Rule registered"
        );
        store.push(rule);
        Ok(())
    }

    pub async fn remove_rule(&self, id: &RuleId) -> EngineResult<Rule> {
        let mut store = self.rules.write().await;
        let index = store
            .iter()
            .position(|r| &r.id == id)
            .ok_or_else(|| EngineError::RuleNotFound(id.to_string()))?;
        let removed = store.remove(index);

        tracing::info!(rule_id = %id, "Rule removed");
        Ok(removed)
    }

    pub async fn toggle_rule(&self, id: &RuleId, enabled: bool) -> EngineResult<()> {
        let mut store = self.rules.write().await;
        let rule = store
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| EngineError::RuleNotFound(id.to_string()))?;
        rule.enabled = enabled;

        tracing::info!(rule_id = %id, enabled, "Rule toggled");
        Ok(())
    }

    pub async fn get_rule(&self, id: &RuleId) -> Option<Rule> {
        self.rules.read().await.iter().find(|r| &r.id == id).cloned()
    }

    /// Snapshot of all rules in registration order.
    pub async fn list_rules(&self) -> Vec<Rule> {
        self.rules.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.rules.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rules.read().await.is_empty()
    }

    /// Eligible rules for `event`, highest priority first.
    pub async fn match_rules(&self, event: &EngineEvent) -> Vec<Rule> {
        self.match_rules_at(event, Utc::now()).await
    }

    pub async fn match_rules_at(&self, event: &EngineEvent, now: DateTime<Utc>) -> Vec<Rule> {
        let store = self.rules.read().await;
        eligible(&store, event, now)
            .into_iter()
            .map(|i| store[i].clone())
            .collect()
    }

    /// Select the highest-priority eligible rule for `event` and record its
    /// execution, all under one write lock. Returns the updated rule.
    pub async fn select_and_acquire(&self, event: &EngineEvent, now: DateTime<Utc>) -> Option<Rule> {
        let mut store = self.rules.write().await;
        let winner = eligible(&store, event, now).into_iter().next()?;
        let rule = &mut store[winner];
        CooldownTracker::record_execution_at(rule, now);

        tracing::info!(
            rule_id = %rule.id,
            rule_name = %rule.name,
            event_id = %event.id,
            execution_count = rule.execution_count,
            "Rule selected"
        );
        Some(rule.clone())
    }

    /// Serialize all rules as a JSON rule document.
    pub async fn export_config(&self) -> EngineResult<String> {
        let store = self.rules.read().await;
        RuleDocument::new(store.iter().map(RuleDefinition::from).collect()).to_json_pretty()
    }

    /// Replace the registry contents with the rules in `json`.
    ///
    /// The registry is left untouched if anything fails to parse or validate.
    pub async fn import_config(&self, json: &str) -> EngineResult<usize> {
        let doc = RuleDocument::from_json(json)?;
        self.import_document(doc).await
    }

    /// Replace the registry contents with an already-parsed document.
    pub async fn import_document(&self, doc: RuleDocument) -> EngineResult<usize> {
        let rules = self.build_rules(doc.rules)?;
        let count = rules.len();

        let mut store = self.rules.write().await;
        *store = rules;

        tracing::info!(rule_count = count, "Rule configuration imported");
        Ok(count)
    }

    /// Add every rule in `doc` to the current contents. Nothing is added if
    /// any rule is invalid or collides with a registered id.
    pub async fn extend_from_document(&self, doc: RuleDocument) -> EngineResult<usize> {
        let rules = self.build_rules(doc.rules)?;
        let count = rules.len();

        let mut store = self.rules.write().await;
        if let Some(dup) = rules.iter().find(|r| store.iter().any(|e| e.id == r.id)) {
            return Err(EngineError::DuplicateRule(dup.id.to_string()));
        }
        store.extend(rules);
        Ok(count)
    }

    fn build_rules(&self, definitions: Vec<RuleDefinition>) -> EngineResult<Vec<Rule>> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(definitions.len());

        for definition in definitions {
            let rule = definition.into_rule(&self.defaults)?;
            if self.strict_predicates {
                rule.validate()?;
            } else {
                rule.validate_structure()?;
                if let Some(err) = rule.condition.error() {
                    tracing::warn!(
                        rule_id = %rule.id,
                        error = %err,
                        "Imported rule has an invalid condition; it will never match"
                    );
                }
            }
            if !seen.insert(rule.id.clone()) {
                return Err(EngineError::DuplicateRule(rule.id.to_string()));
            }
            rules.push(rule);
        }

        Ok(rules)
    }
}

/// Indices of eligible rules, ordered by descending priority with
/// registration order breaking ties.
fn eligible(rules: &[Rule], event: &EngineEvent, now: DateTime<Utc>) -> Vec<usize> {
    let mut matched: Vec<usize> = rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| rule.enabled)
        .filter(|(_, rule)| rule.condition.evaluate(event))
        .filter(|(_, rule)| match CooldownTracker::check_at(rule, now) {
            Ok(()) => true,
            Err(reason) => {
                tracing::info!(
                    rule_id = %rule.id,
                    event_id = %event.id,
                    reason = %reason,
                    "Rule matched but is not executable"
                );
                false
            }
        })
        .map(|(i, _)| i)
        .collect();

    // `sort_by` is stable.
    matched.sort_by(|&a, &b| rules[b].priority.cmp(&rules[a].priority));
    matched
}
