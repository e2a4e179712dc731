//! Workspace-policy gate for approval-requiring tools.

use coda_types::{CommandApproval, WorkspacePolicy};

/// Outcome of consulting the policy before a sensitive tool runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Run without asking.
    Approve,
    /// Refuse with this reason; the tool result is synthesized.
    Deny(String),
    /// Ask the client and await its decision.
    Prompt,
}

/// Evaluate the policy for a tool that declared `requires_approval`.
///
/// Auto-approved tool names skip everything. Command-scoped tools are
/// checked against the blocked and allowed command lists before the
/// approval mode applies.
pub fn evaluate_tool_policy(
    policy: &WorkspacePolicy,
    tool_name: &str,
    approval_scope: &str,
    arguments: &serde_json::Value,
) -> PolicyDecision {
    if policy.auto_approves(tool_name) {
        return PolicyDecision::Approve;
    }

    if approval_scope == "command" {
        let command = arguments["command"].as_str().unwrap_or_default();
        if policy.is_command_blocked(command) {
            return PolicyDecision::Deny("command blocked by workspace policy".to_string());
        }
        if policy.is_command_allowed(command) {
            return PolicyDecision::Approve;
        }
    }

    match policy.command_approval {
        CommandApproval::Always => PolicyDecision::Approve,
        CommandApproval::Never => {
            PolicyDecision::Deny("command approval disabled by workspace policy".to_string())
        }
        CommandApproval::Prompt => PolicyDecision::Prompt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(command: &str) -> serde_json::Value {
        serde_json::json!({ "command": command })
    }

    #[test]
    fn test_auto_approve_list_wins() {
        let policy = WorkspacePolicy {
            command_approval: CommandApproval::Never,
            auto_approve_tools: vec!["run_tests".to_string()],
            ..Default::default()
        };
        assert_eq!(
            evaluate_tool_policy(&policy, "run_tests", "command", &args("cargo test")),
            PolicyDecision::Approve
        );
    }

    #[test]
    fn test_blocked_command_denied_even_when_always() {
        let policy = WorkspacePolicy {
            command_approval: CommandApproval::Always,
            blocked_commands: vec!["rm".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            evaluate_tool_policy(&policy, "run_command", "command", &args("rm -rf /")),
            PolicyDecision::Deny(_)
        ));
    }

    #[test]
    fn test_allowed_command_skips_prompt() {
        let policy = WorkspacePolicy {
            allowed_commands: vec!["cargo test".to_string()],
            ..Default::default()
        };
        assert_eq!(
            evaluate_tool_policy(&policy, "run_command", "command", &args("cargo test --all")),
            PolicyDecision::Approve
        );
    }

    #[test]
    fn test_modes() {
        let mut policy = WorkspacePolicy::default();
        assert_eq!(
            evaluate_tool_policy(&policy, "run_command", "command", &args("ls")),
            PolicyDecision::Prompt
        );

        policy.command_approval = CommandApproval::Always;
        assert_eq!(
            evaluate_tool_policy(&policy, "run_command", "command", &args("ls")),
            PolicyDecision::Approve
        );

        policy.command_approval = CommandApproval::Never;
        assert!(matches!(
            evaluate_tool_policy(&policy, "run_command", "command", &args("ls")),
            PolicyDecision::Deny(_)
        ));
    }
}
