//! Built-in rule packs.
//!
//! Three packs cover error recovery, user command supremacy and reasoning
//! strategy selection. Priorities are spaced so that packs never compete:
//! every rule is scoped to a single event kind.

use serde_json::json;

use crate::domain::models::action::{ActionSpec, ActionType};
use crate::domain::models::rule::Rule;

/// Every built-in rule, in registration order.
pub fn builtin_rules() -> Vec<Rule> {
    let mut rules = error_recovery_rules();
    rules.extend(command_supremacy_rules());
    rules.extend(strategy_selection_rules());
    rules
}

/// Recovery actions for runtime errors.
pub fn error_recovery_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "error-critical-system-restart",
            "Restart on critical system error",
            r#"kind == "error" AND severity == "critical" AND category == "system""#,
        )
        .with_description("Restart the failing component when a critical system error is reported")
        .with_priority(100)
        .with_cooldown_ms(30_000)
        .with_action(ActionSpec::new("restart", ActionType::Restart).with_timeout_ms(30_000)),

        Rule::new(
            "error-agent-retry",
            "Retry failed agent work",
            r#"kind == "error" AND category == "agent" AND severity >= "warning""#,
        )
        .with_description("Retry agent operations with exponential backoff")
        .with_priority(80)
        .with_cooldown_ms(5_000)
        .with_action(
            ActionSpec::new("retry", ActionType::Retry)
                .with_retry(3, 1_000, 2.0)
                .with_timeout_ms(10_000),
        ),

        Rule::new(
            "error-resource-breaker",
            "Trip breaker on repeated resource errors",
            r#"kind == "error" AND category == "resource" AND context.occurrences >= 3"#,
        )
        .with_description("Guard an exhausted resource with a circuit breaker and add capacity")
        .with_priority(70)
        .with_cooldown_ms(60_000)
        .with_action(
            ActionSpec::new("guard", ActionType::CircuitBreaker)
                .with_parameter("breaker", json!("resource"))
                .with_parameter("threshold", json!(3))
                .with_parameter("timeout_ms", json!(60_000)),
        )
        .with_action(ActionSpec::new("scale-up", ActionType::ScaleUp).depends_on("guard")),

        Rule::new(
            "error-network-failover",
            "Fail over on network errors",
            r#"kind == "error" AND category == "network" AND severity >= "error""#,
        )
        .with_description("Switch to the standby endpoint, restarting the primary if failover fails")
        .with_priority(60)
        .with_cooldown_ms(30_000)
        .with_action(
            ActionSpec::new("failover", ActionType::Failover)
                .with_timeout_ms(15_000)
                .with_rollback(ActionSpec::new("restart-primary", ActionType::Restart)),
        ),

        Rule::new(
            "error-critical-manual",
            "Escalate unhandled critical errors",
            r#"kind == "error" AND severity == "critical""#,
        )
        .with_description("Page an operator for critical errors no other rule handles")
        .with_priority(10)
        .with_action(
            ActionSpec::new("page-operator", ActionType::ManualIntervention)
                .with_parameter("reason", json!("critical error without automated recovery")),
        ),
    ]
}

/// User commands always win over automation, except where they are blocked
/// or need confirmation.
pub fn command_supremacy_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "command-explicit-override",
            "Honour explicit overrides",
            r#"kind == "user_command" AND context.override == true"#,
        )
        .with_description("Commands flagged as overrides bypass every other check")
        .with_priority(1_000)
        .with_action(
            ActionSpec::new("allow-override", ActionType::Allow)
                .with_parameter("reason", json!("explicit user override")),
        ),

        Rule::new(
            "command-blocked-source",
            "Block commands from blocked sources",
            r#"kind == "user_command" AND (context.blocked == true OR source IN ["anonymous", "untrusted"])"#,
        )
        .with_priority(900)
        .with_action(
            ActionSpec::new("deny", ActionType::Block)
                .with_parameter("reason", json!("command source is blocked")),
        ),

        Rule::new(
            "command-destructive-approval",
            "Confirm destructive commands",
            r#"kind == "user_command" AND context.destructive == true"#,
        )
        .with_description("Destructive commands wait for explicit approval")
        .with_priority(800)
        .with_action(
            ActionSpec::new("confirm", ActionType::RequireApproval)
                .with_parameter("reason", json!("destructive command")),
        ),

        Rule::new(
            "command-default-allow",
            "Allow user commands",
            r#"kind == "user_command""#,
        )
        .with_priority(0)
        .with_action(ActionSpec::new("allow", ActionType::Allow)),
    ]
}

/// Routes strategy-selection requests to a reasoning pattern.
pub fn strategy_selection_rules() -> Vec<Rule> {
    let choose = |strategy: &str| {
        ActionSpec::new(format!("use-{}", strategy.replace('_', "-")), ActionType::Allow)
            .with_parameter("strategy", json!(strategy))
    };

    vec![
        Rule::new(
            "strategy-reflexion",
            "Reflexion for iterative tasks",
            r#"kind == "strategy_selection" AND context.requires_iteration == true"#,
        )
        .with_priority(50)
        .with_action(choose("reflexion")),

        Rule::new(
            "strategy-tree-of-thoughts",
            "Tree of thoughts for complex tasks",
            r#"kind == "strategy_selection" AND context.complexity >= 0.8"#,
        )
        .with_priority(40)
        .with_action(choose("tree_of_thoughts")),

        Rule::new(
            "strategy-self-consistency",
            "Self-consistency for moderately complex tasks",
            r#"kind == "strategy_selection" AND context.complexity >= 0.5"#,
        )
        .with_priority(30)
        .with_action(choose("self_consistency")),

        Rule::new(
            "strategy-chain-of-thought",
            "Chain of thought by default",
            r#"kind == "strategy_selection""#,
        )
        .with_priority(0)
        .with_action(choose("chain_of_thought")),
    ]
}
