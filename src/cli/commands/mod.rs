//! CLI command implementations.

pub mod config;
pub mod evaluate;
pub mod rules;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::adapters::process_executor::ProcessExecutor;
use crate::adapters::simulated_executor::SimulatedExecutor;
use crate::domain::models::config::{Config, ExecutorMode};
use crate::domain::models::rule::RuleDocument;
use crate::domain::ports::action_executor::ActionExecutor;
use crate::services::decision_engine::DecisionEngine;

/// Parse a rule file. `.yaml`/`.yml` files are read as YAML, everything
/// else as JSON.
pub fn load_rule_file(path: &Path) -> Result<RuleDocument> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rule file {}", path.display()))?;

    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    let doc = if is_yaml {
        RuleDocument::from_yaml(&content)
    } else {
        RuleDocument::from_json(&content)
    };
    doc.with_context(|| format!("Failed to parse rule file {}", path.display()))
}

/// Executor selected by `executor.mode`.
pub fn build_executor(config: &Config) -> Arc<dyn ActionExecutor> {
    match config.executor.mode {
        ExecutorMode::Simulated => Arc::new(SimulatedExecutor::new()),
        ExecutorMode::Process => Arc::new(ProcessExecutor::from_config(&config.executor)),
    }
}

/// Build an engine backed by the configured executor.
///
/// Rules come from `rules` when given, otherwise from `engine.rules_file`.
/// Built-in packs are added when `builtin` is set or the config asks for
/// them.
pub async fn build_engine(config: &Config, rules: Option<&Path>, builtin: bool) -> Result<DecisionEngine> {
    tracing::debug!(mode = ?config.executor.mode, "Selected action executor");
    let mut engine = DecisionEngine::new(config, build_executor(config));

    if builtin || config.engine.load_builtin_rules {
        engine = engine
            .with_builtin_rules()
            .await
            .context("Failed to load built-in rules")?;
    }

    if let Some(path) = rules.or(config.engine.rules_file.as_deref()) {
        let doc = load_rule_file(path)?;
        let count = engine
            .load_document(doc)
            .await
            .with_context(|| format!("Invalid rules in {}", path.display()))?;
        tracing::info!(path = %path.display(), rule_count = count, "Loaded rule file");
    }

    Ok(engine)
}
