//! Executor that runs each action as a child process.
//!
//! The command line comes from the action's `command` (program) and `args`
//! parameters, or from `executor.commands.<action type>` in the config. The
//! child sees the action and the triggering event through `WARDEN_*`
//! environment variables. Children are spawned with `kill_on_drop`, so the
//! dispatcher's timeout also terminates the process.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::action::ActionSpec;
use crate::domain::models::config::ExecutorConfig;
use crate::domain::models::event::EngineEvent;
use crate::domain::ports::action_executor::{ActionExecutor, ExecutionReport};

const MAX_CAPTURED_OUTPUT: usize = 4096;

/// [`ActionExecutor`] backed by OS processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    commands: BTreeMap<String, Vec<String>>,
    working_dir: Option<PathBuf>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            commands: config.commands.clone(),
            working_dir: config.working_dir.clone(),
        }
    }

    /// Register the command line used for an action type.
    pub fn with_command(mut self, action_type: impl Into<String>, argv: Vec<String>) -> Self {
        self.commands.insert(action_type.into(), argv);
        self
    }

    fn command_line(&self, action: &ActionSpec) -> Option<Vec<String>> {
        if let Some(program) = action.param_str("command") {
            let args = action
                .parameters
                .get("args")
                .and_then(serde_json::Value::as_array)
                .map(|args| {
                    args.iter()
                        .map(|a| a.as_str().map_or_else(|| a.to_string(), str::to_string))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            let mut argv = vec![program.to_string()];
            argv.extend(args);
            return Some(argv);
        }

        self.commands
            .get(action.action_type.as_str())
            .filter(|argv| !argv.is_empty())
            .cloned()
    }
}

fn capture(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    match text.char_indices().nth(MAX_CAPTURED_OUTPUT) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[async_trait]
impl ActionExecutor for ProcessExecutor {
    async fn execute(&self, action: &ActionSpec, event: &EngineEvent) -> EngineResult<ExecutionReport> {
        let action_id = action.id.to_string();
        let Some(argv) = self.command_line(action) else {
            return Err(EngineError::ActionFailed {
                action_id,
                reason: format!("no command configured for action type '{}'", action.action_type),
            });
        };

        let event_json = serde_json::to_string(event).map_err(|e| EngineError::ActionFailed {
            action_id: action_id.clone(),
            reason: format!("failed to serialize event: {e}"),
        })?;

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .env("WARDEN_ACTION_ID", &action_id)
            .env("WARDEN_ACTION_TYPE", action.action_type.as_str())
            .env("WARDEN_EVENT_ID", event.id.to_string())
            .env("WARDEN_EVENT", event_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref wd) = self.working_dir {
            cmd.current_dir(wd);
        }

        tracing::debug!(action_id = %action_id, program = %argv[0], "Spawning action process");

        let output = cmd.output().await.map_err(|e| EngineError::ActionFailed {
            action_id: action_id.clone(),
            reason: format!("failed to spawn '{}': {e}", argv[0]),
        })?;

        let stdout = capture(&output.stdout);
        if !output.status.success() {
            let stderr = capture(&output.stderr);
            tracing::warn!(
                action_id = %action_id,
                status = %output.status,
                stderr = %stderr,
                "Action process failed"
            );
            return Err(EngineError::ActionFailed {
                action_id,
                reason: if stderr.is_empty() {
                    format!("process exited with {}", output.status)
                } else {
                    format!("process exited with {}: {stderr}", output.status)
                },
            });
        }

        Ok(ExecutionReport::with_output(serde_json::json!({
            "exit_code": output.status.code(),
            "stdout": stdout,
        })))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::models::action::ActionType;
    use crate::domain::models::event::EventSeverity;

    fn shell(action: ActionSpec, script: &str) -> ActionSpec {
        action
            .with_parameter("command", serde_json::json!("sh"))
            .with_parameter("args", serde_json::json!(["-c", script]))
    }

    #[tokio::test]
    async fn test_successful_process_reports_stdout() {
        let executor = ProcessExecutor::new();
        let action = shell(
            ActionSpec::new("restart", ActionType::Restart),
            "echo \"$WARDEN_ACTION_TYPE $WARDEN_ACTION_ID\"",
        );
        let event = EngineEvent::error(EventSeverity::Critical, "system");

        let report = executor.execute(&action, &event).await.unwrap();
        let output = report.output.unwrap();
        assert_eq!(output["exit_code"], 0);
        assert_eq!(output["stdout"], "restart restart");
    }

    #[tokio::test]
    async fn test_event_is_passed_as_json() {
        let executor = ProcessExecutor::new();
        let action = shell(ActionSpec::new("failover", ActionType::Failover), "printf '%s' \"$WARDEN_EVENT\"");
        let event = EngineEvent::error(EventSeverity::Error, "network").with_source("db-primary");

        let report = executor.execute(&action, &event).await.unwrap();
        let stdout = report.output.unwrap()["stdout"].as_str().unwrap().to_string();
        let echoed: EngineEvent = serde_json::from_str(&stdout).unwrap();
        assert_eq!(echoed.id, event.id);
        assert_eq!(echoed.source, "db-primary");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let executor = ProcessExecutor::new();
        let action = shell(ActionSpec::new("restart", ActionType::Restart), "echo boom >&2; exit 3");
        let event = EngineEvent::error(EventSeverity::Error, "system");

        match executor.execute(&action, &event).await {
            Err(EngineError::ActionFailed { reason, .. }) => assert!(reason.contains("boom")),
            other => panic!("expected ActionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_configured_command_per_action_type() {
        let executor = ProcessExecutor::new().with_command(
            "scale_up",
            vec!["sh".to_string(), "-c".to_string(), "echo scaled".to_string()],
        );
        let action = ActionSpec::new("scale", ActionType::ScaleUp);
        let event = EngineEvent::error(EventSeverity::Warning, "agent");

        let report = executor.execute(&action, &event).await.unwrap();
        assert_eq!(report.output.unwrap()["stdout"], "scaled");
    }

    #[tokio::test]
    async fn test_missing_command_fails() {
        let executor = ProcessExecutor::new();
        let action = ActionSpec::new("recreate", ActionType::Recreate);
        let event = EngineEvent::error(EventSeverity::Error, "system");

        assert!(matches!(
            executor.execute(&action, &event).await,
            Err(EngineError::ActionFailed { .. })
        ));
    }
}
