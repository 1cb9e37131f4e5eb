//! Rule CLI commands.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::commands::{build_engine, load_rule_file};
use crate::cli::display::{
    action_failure, action_success, colorize_status, list_table, output, render_list, truncate,
    CommandOutput, DetailView,
};
use crate::domain::models::action::ActionSpec;
use crate::domain::models::config::Config;
use crate::domain::models::rule::{Rule, RuleId};

#[derive(Args, Debug)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub command: RulesCommands,
}

/// Where rules come from for read-only commands.
#[derive(Args, Debug, Clone)]
pub struct RuleSource {
    /// Rule file (JSON or YAML)
    #[arg(short, long)]
    pub rules: Option<PathBuf>,

    /// Include the built-in rule packs
    #[arg(long)]
    pub builtin: bool,
}

#[derive(Subcommand, Debug)]
pub enum RulesCommands {
    /// List rules in priority order
    List {
        #[command(flatten)]
        source: RuleSource,

        /// Only show enabled rules
        #[arg(long)]
        enabled_only: bool,
    },
    /// Show rule details
    Show {
        /// Rule ID
        id: String,

        #[command(flatten)]
        source: RuleSource,
    },
    /// Check a rule file without loading it
    Validate {
        /// Rule file (JSON or YAML)
        file: PathBuf,
    },
    /// Print the rule set as an importable JSON document
    Export {
        #[command(flatten)]
        source: RuleSource,
    },
}

#[derive(Debug, Serialize)]
pub struct RuleSummary {
    pub id: String,
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub cooldown_ms: u64,
    pub max_executions: Option<u64>,
    pub actions: Vec<String>,
}

impl From<&Rule> for RuleSummary {
    fn from(rule: &Rule) -> Self {
        Self {
            id: rule.id.to_string(),
            name: rule.name.clone(),
            priority: rule.priority,
            enabled: rule.enabled,
            cooldown_ms: rule.cooldown_ms,
            max_executions: (rule.max_executions != u64::MAX).then_some(rule.max_executions),
            actions: rule.actions.iter().map(|a| a.action_type.as_str().to_string()).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RuleListOutput {
    pub rules: Vec<RuleSummary>,
    pub total: usize,
}

impl CommandOutput for RuleListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "name", "priority", "status", "cooldown", "actions"]);
        for rule in &self.rules {
            let status = if rule.enabled { "enabled" } else { "disabled" };
            table.add_row(vec![
                rule.id.clone(),
                truncate(&rule.name, 36),
                rule.priority.to_string(),
                colorize_status(status).to_string(),
                format_ms(rule.cooldown_ms),
                rule.actions.join(", "),
            ]);
        }
        render_list("rule", &table, self.total)
    }
}

#[derive(Debug, Serialize)]
pub struct RuleDetailOutput {
    #[serde(flatten)]
    pub summary: RuleSummary,
    pub description: String,
    pub condition: String,
    pub condition_valid: bool,
    pub action_specs: Vec<ActionSpec>,
}

impl CommandOutput for RuleDetailOutput {
    fn to_human(&self) -> String {
        let status = if self.summary.enabled { "enabled" } else { "disabled" };
        let mut view = DetailView::new(&format!("Rule: {}", self.summary.name))
            .field("ID", &self.summary.id)
            .field("Status", colorize_status(status))
            .field("Priority", self.summary.priority)
            .field("Cooldown", format_ms(self.summary.cooldown_ms))
            .field_opt("Max runs", self.summary.max_executions)
            .field_opt(
                "Description",
                (!self.description.is_empty()).then_some(&self.description),
            )
            .field("Condition", &self.condition);

        if !self.condition_valid {
            view = view.field("Warning", "condition does not compile; rule never matches");
        }

        view = view.section("Actions");
        for action in &self.action_specs {
            let mut line = format!("{} ({})", action.id, action.action_type);
            if !action.depends_on.is_empty() {
                let deps: Vec<_> = action.depends_on.iter().map(ToString::to_string).collect();
                line.push_str(&format!(" after {}", deps.join(", ")));
            }
            if action.max_attempts > 1 {
                line.push_str(&format!(" x{}", action.max_attempts));
            }
            if let Some(ref rollback) = action.rollback {
                line.push_str(&format!(", rollback {}", rollback.id));
            }
            view = view.item(line);
        }
        view.render()
    }
}

#[derive(Debug, Serialize)]
pub struct RuleIssue {
    pub rule_id: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ValidationOutput {
    pub file: String,
    pub rules: usize,
    pub valid: bool,
    pub issues: Vec<RuleIssue>,
}

impl CommandOutput for ValidationOutput {
    fn to_human(&self) -> String {
        if self.valid {
            return action_success(&format!("{}: {} rule(s) valid", self.file, self.rules));
        }
        let mut lines = vec![action_failure(&format!(
            "{}: {} of {} rule(s) invalid",
            self.file,
            self.issues.len(),
            self.rules
        ))];
        for issue in &self.issues {
            lines.push(format!("  {}: {}", issue.rule_id, issue.error));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: RulesArgs, config: &Config, json_mode: bool) -> Result<()> {
    match args.command {
        RulesCommands::List {
            source,
            enabled_only,
        } => {
            let engine = build_engine(config, source.rules.as_deref(), source.builtin).await?;
            let mut rules = engine.list_rules().await;
            if enabled_only {
                rules.retain(|r| r.enabled);
            }
            // Stable: equal priorities keep registration order.
            rules.sort_by(|a, b| b.priority.cmp(&a.priority));

            let out = RuleListOutput {
                total: rules.len(),
                rules: rules.iter().map(RuleSummary::from).collect(),
            };
            output(&out, json_mode);
        }

        RulesCommands::Show { id, source } => {
            let engine = build_engine(config, source.rules.as_deref(), source.builtin).await?;
            let rule = engine
                .get_rule(&RuleId::new(id.as_str()))
                .await
                .with_context(|| format!("Rule not found: {id}"))?;

            let out = RuleDetailOutput {
                summary: RuleSummary::from(&rule),
                description: rule.description.clone(),
                condition: rule.condition.source().to_string(),
                condition_valid: rule.condition.is_valid(),
                action_specs: rule.actions.clone(),
            };
            output(&out, json_mode);
        }

        RulesCommands::Validate { file } => {
            let out = validate_file(&file, config)?;
            let valid = out.valid;
            output(&out, json_mode);
            if !valid {
                bail!("{} failed validation", file.display());
            }
        }

        RulesCommands::Export { source } => {
            let engine = build_engine(config, source.rules.as_deref(), source.builtin).await?;
            println!("{}", engine.export_config().await?);
        }
    }

    Ok(())
}

/// Check every rule in a file, collecting all problems rather than stopping
/// at the first.
pub fn validate_file(file: &std::path::Path, config: &Config) -> Result<ValidationOutput> {
    let doc = load_rule_file(file)?;
    let defaults = &config.dispatcher.action_defaults;
    let total = doc.rules.len();

    let mut issues = Vec::new();
    let mut seen = HashSet::new();
    for definition in doc.rules {
        let rule_id = definition.id.clone();
        if !seen.insert(rule_id.clone()) {
            issues.push(RuleIssue {
                rule_id,
                error: "duplicate rule id".to_string(),
            });
            continue;
        }
        if let Err(err) = definition.into_rule(defaults).and_then(|rule| rule.validate()) {
            issues.push(RuleIssue {
                rule_id,
                error: err.to_string(),
            });
        }
    }

    Ok(ValidationOutput {
        file: file.display().to_string(),
        rules: total,
        valid: issues.is_empty(),
        issues,
    })
}

fn format_ms(ms: u64) -> String {
    match ms {
        0 => "-".to_string(),
        ms if ms % 1000 == 0 => format!("{}s", ms / 1000),
        ms => format!("{ms}ms"),
    }
}
