//! Built-in tools.

mod file;
mod shell;

pub use file::{ApplyPatchTool, ListFilesTool, ReadFileTool, WriteFileTool, resolve_within};
pub use shell::{RunCommandTool, RunTestsTool};

use crate::tool::ToolRegistry;
use coda_types::WorkspacePolicy;
use std::path::Path;

/// Register the standard tool set for a workspace.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    workspace_path: &Path,
    policy: &WorkspacePolicy,
) {
    registry.register(ReadFileTool::new(workspace_path));
    registry.register(WriteFileTool::new(workspace_path, policy.clone()));
    registry.register(ListFilesTool::new(workspace_path));
    registry.register(ApplyPatchTool::new(workspace_path, policy.clone()));
    registry.register(RunCommandTool::new(workspace_path));
    registry.register(RunTestsTool::new(workspace_path));
}
