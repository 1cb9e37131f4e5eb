//! Per-rule execution caps and cooldown windows.
//!
//! The bookkeeping lives on the [`Rule`] itself (`execution_count`,
//! `last_executed_at`); the tracker only interprets and updates it. Callers
//! that share rules across tasks must hold the registry write lock between
//! the check and the record, which is what
//! [`RuleRegistry::select_and_acquire`](crate::services::rule_registry::RuleRegistry::select_and_acquire)
//! does.

use chrono::{DateTime, Utc};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::rule::Rule;

pub struct CooldownTracker;

impl CooldownTracker {
    /// Whether `rule` may execute now.
    pub fn can_execute(rule: &Rule) -> bool {
        Self::can_execute_at(rule, Utc::now())
    }

    /// Whether `rule` may execute at `now`.
    pub fn can_execute_at(rule: &Rule, now: DateTime<Utc>) -> bool {
        Self::check_at(rule, now).is_ok()
    }

    /// Like [`can_execute_at`](Self::can_execute_at) but reports why not.
    pub fn check_at(rule: &Rule, now: DateTime<Utc>) -> EngineResult<()> {
        if rule.is_exhausted() {
            return Err(EngineError::ExecutionLimitReached {
                rule_id: rule.id.to_string(),
                max_executions: rule.max_executions,
            });
        }

        let remaining_ms = Self::remaining_cooldown_ms(rule, now);
        if remaining_ms > 0 {
            return Err(EngineError::CooldownActive {
                rule_id: rule.id.to_string(),
                remaining_ms,
            });
        }

        Ok(())
    }

    /// Milliseconds left in the cooldown window, zero when expired or unset.
    pub fn remaining_cooldown_ms(rule: &Rule, now: DateTime<Utc>) -> u64 {
        let Some(last) = rule.last_executed_at else {
            return 0;
        };
        // Clock skew (last > now) counts as zero elapsed.
        let elapsed_ms = u64::try_from((now - last).num_milliseconds()).unwrap_or(0);
        rule.cooldown_ms.saturating_sub(elapsed_ms)
    }

    /// Record an execution now.
    pub fn record_execution(rule: &mut Rule) {
        Self::record_execution_at(rule, Utc::now());
    }

    pub fn record_execution_at(rule: &mut Rule, now: DateTime<Utc>) {
        rule.execution_count = rule.execution_count.saturating_add(1).min(rule.max_executions);
        rule.last_executed_at = Some(now);

        tracing::debug!(
            rule_id = %rule.id,
            execution_count = rule.execution_count,
            max_executions = rule.max_executions,
            "Rule execution recorded"
        );
    }

    /// Check and record in one step. Returns the error from
    /// [`check_at`](Self::check_at) without touching the rule if it may not
    /// execute.
    pub fn try_acquire_at(rule: &mut Rule, now: DateTime<Utc>) -> EngineResult<()> {
        Self::check_at(rule, now)?;
        Self::record_execution_at(rule, now);
        Ok(())
    }
}
