//! Status and verdict color mapping for CLI output.

use console::{style, StyledObject};

/// Returns a styled string for decision and outcome statuses.
///
/// Green for success, blue for pending, red for failures, dim for anything
/// that did not run.
pub fn colorize_status(status: &str) -> StyledObject<&str> {
    match status.to_lowercase().as_str() {
        "completed" | "succeeded" | "enabled" | "closed" => style(status).green().bold(),
        "pending" | "half_open" => style(status).blue(),
        "failed" | "open" => style(status).red().bold(),
        "cancelled" | "skipped" | "no_match" | "disabled" => style(status).dim(),
        _ => style(status),
    }
}

/// Returns a styled string for a verdict.
pub fn colorize_verdict(verdict: &str) -> StyledObject<&str> {
    match verdict {
        "allow" => style(verdict).green().bold(),
        "block" => style(verdict).red().bold(),
        "ignore" => style(verdict).dim(),
        _ => style(verdict),
    }
}

/// Styled label for detail views (bold + dimmed colon).
pub fn label(name: &str) -> String {
    format!("{}{}", style(name).bold(), style(":").dim())
}
