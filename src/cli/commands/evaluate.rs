//! `warden evaluate`: run events through a rule set.
//!
//! Actions go to the executor named by `executor.mode`; the default
//! simulated executor never touches real systems. Pending decisions can be
//! settled on the spot with `--resolve`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;

use crate::cli::commands::build_engine;
use crate::cli::display::{
    colorize_status, colorize_verdict, list_table, output, truncate, CommandOutput, DetailView,
};
use crate::domain::models::config::Config;
use crate::domain::models::decision::DecisionRecord;
use crate::domain::models::event::EngineEvent;
use crate::services::decision_engine::DecisionEngine;

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Rule file (JSON or YAML)
    #[arg(short, long)]
    pub rules: Option<PathBuf>,

    /// Event as inline JSON or a path to a JSON file holding one event or
    /// an array of events; repeat to process several in order
    #[arg(short, long = "event", required = true)]
    pub events: Vec<String>,

    /// Include the built-in rule packs
    #[arg(long)]
    pub builtin: bool,

    /// Settle decisions left pending by operator actions
    #[arg(long, value_enum)]
    pub resolve: Option<Resolution>,

    /// Note attached to resolved or cancelled decisions
    #[arg(long, requires = "resolve")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Resolution {
    Approve,
    Reject,
    Cancel,
}

#[derive(Debug, Serialize)]
pub struct EvaluationOutput {
    pub decisions: Vec<DecisionRecord>,
}

impl CommandOutput for EvaluationOutput {
    fn to_human(&self) -> String {
        self.decisions
            .iter()
            .map(render_decision)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn render_decision(record: &DecisionRecord) -> String {
    let mut view = DetailView::new(&format!("Decision {}", record.id))
        .field("Event", record.event_id)
        .field("Status", colorize_status(record.status.as_str()))
        .field(
            "Rule",
            record
                .matched_rule_id
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string),
        )
        .field_opt("Verdict", record.verdict().map(colorize_verdict))
        .field_opt("Note", record.note.as_deref());

    if record.actions_taken.is_empty() {
        return view.render();
    }

    let mut table = list_table(&["action", "type", "status", "attempts", "detail"]);
    for outcome in &record.actions_taken {
        let detail = match (&outcome.error, &outcome.output) {
            (Some(error), _) => error.clone(),
            (None, Some(out)) => out.to_string(),
            (None, None) => String::new(),
        };
        let mut status = colorize_status(outcome.status.as_str()).to_string();
        if outcome.rolled_back {
            status.push_str(" (rolled back)");
        }
        table.add_row(vec![
            outcome.action_id.to_string(),
            outcome.action_type.as_str().to_string(),
            status,
            outcome.attempts.to_string(),
            truncate(&detail, 60),
        ]);
    }
    view = view.section("Actions");
    format!("{}\n{table}", view.render())
}

/// Parse `--event` values. Each is inline JSON when it starts with `{` or
/// `[`, otherwise a path to a JSON file.
pub fn parse_events(inputs: &[String]) -> Result<Vec<EngineEvent>> {
    let mut events = Vec::new();
    for input in inputs {
        let trimmed = input.trim_start();
        let content = if trimmed.starts_with('{') || trimmed.starts_with('[') {
            input.clone()
        } else {
            std::fs::read_to_string(input).with_context(|| format!("Failed to read event file {input}"))?
        };

        let value: serde_json::Value =
            serde_json::from_str(&content).with_context(|| format!("Invalid event JSON in {input}"))?;
        match value {
            serde_json::Value::Array(items) => {
                for item in items {
                    events.push(serde_json::from_value(item).context("Invalid event")?);
                }
            }
            other => events.push(serde_json::from_value(other).context("Invalid event")?),
        }
    }
    Ok(events)
}

pub async fn execute(args: EvaluateArgs, config: &Config, json_mode: bool) -> Result<()> {
    let events = parse_events(&args.events)?;
    let engine = build_engine(config, args.rules.as_deref(), args.builtin).await?;
    if engine.list_rules().await.is_empty() {
        bail!("No rules loaded. Pass --rules <file> or --builtin.");
    }

    let decisions = evaluate(&engine, events, args.resolve, args.note).await?;
    output(&EvaluationOutput { decisions }, json_mode);
    Ok(())
}

/// Process `events` in order, settling pending decisions per `resolution`.
pub async fn evaluate(
    engine: &DecisionEngine,
    events: Vec<EngineEvent>,
    resolution: Option<Resolution>,
    note: Option<String>,
) -> Result<Vec<DecisionRecord>> {
    let mut decisions = Vec::with_capacity(events.len());
    for event in events {
        let record = engine.process(event).await;
        let record = match (record.is_pending(), resolution) {
            (true, Some(Resolution::Approve)) => engine.resolve(record.id, true, note.clone()).await?,
            (true, Some(Resolution::Reject)) => engine.resolve(record.id, false, note.clone()).await?,
            (true, Some(Resolution::Cancel)) => engine.cancel(record.id, note.clone()).await?,
            _ => record,
        };
        decisions.push(record);
    }
    Ok(decisions)
}
