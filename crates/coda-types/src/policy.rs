//! Workspace policy consulted before executing sensitive tools.

use serde::{Deserialize, Serialize};

/// How command-class tools are approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandApproval {
    /// Auto-approve every command.
    Always,
    /// Deny every command.
    Never,
    /// Ask the client for each command.
    Prompt,
}

impl Default for CommandApproval {
    fn default() -> Self {
        CommandApproval::Prompt
    }
}

/// Per-workspace tool policy.
///
/// Read before executing any tool that declares `requires_approval`. Glob
/// lists use gitignore-style patterns relative to the workspace root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspacePolicy {
    /// Globs the agent may read.
    pub allowed_read_globs: Vec<String>,
    /// Globs the agent may write.
    pub allowed_write_globs: Vec<String>,
    /// Globs that are always off-limits.
    pub blocked_globs: Vec<String>,
    /// Approval mode for command execution.
    pub command_approval: CommandApproval,
    /// Commands auto-approved regardless of mode. Prefix match.
    pub allowed_commands: Vec<String>,
    /// Commands denied regardless of mode. Prefix match.
    pub blocked_commands: Vec<String>,
    /// Whether network-touching tools are permitted.
    pub network_enabled: bool,
    /// Tool names that skip the approval round-trip entirely.
    pub auto_approve_tools: Vec<String>,
}

impl Default for WorkspacePolicy {
    fn default() -> Self {
        Self {
            allowed_read_globs: vec!["**/*".to_string()],
            allowed_write_globs: vec!["**/*".to_string()],
            blocked_globs: vec![".git/**".to_string(), "node_modules/**".to_string()],
            command_approval: CommandApproval::Prompt,
            allowed_commands: Vec::new(),
            blocked_commands: Vec::new(),
            network_enabled: false,
            auto_approve_tools: Vec::new(),
        }
    }
}

impl WorkspacePolicy {
    /// Whether a command string matches the blocked list.
    pub fn is_command_blocked(&self, command: &str) -> bool {
        let trimmed = command.trim_start();
        self.blocked_commands
            .iter()
            .any(|b| !b.is_empty() && trimmed.starts_with(b.as_str()))
    }

    /// Whether a command string matches the allowed list.
    pub fn is_command_allowed(&self, command: &str) -> bool {
        let trimmed = command.trim_start();
        self.allowed_commands
            .iter()
            .any(|a| !a.is_empty() && trimmed.starts_with(a.as_str()))
    }

    /// Whether a tool is on the auto-approve list.
    pub fn auto_approves(&self, tool_name: &str) -> bool {
        self.auto_approve_tools.iter().any(|t| t == tool_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = WorkspacePolicy::default();
        assert_eq!(policy.command_approval, CommandApproval::Prompt);
        assert!(!policy.network_enabled);
        assert!(policy.blocked_globs.contains(&".git/**".to_string()));
    }

    #[test]
    fn test_command_lists_prefix_match() {
        let policy = WorkspacePolicy {
            allowed_commands: vec!["cargo test".to_string()],
            blocked_commands: vec!["rm".to_string()],
            ..Default::default()
        };
        assert!(policy.is_command_allowed("cargo test --all"));
        assert!(!policy.is_command_allowed("cargo build"));
        assert!(policy.is_command_blocked("rm -rf /"));
        assert!(policy.is_command_blocked("  rm file"));
        assert!(!policy.is_command_blocked("grm"));
    }

    #[test]
    fn test_serde_round_trip() {
        let policy = WorkspacePolicy::default();
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"prompt\""));
        let restored: WorkspacePolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.command_approval, CommandApproval::Prompt);
    }
}
