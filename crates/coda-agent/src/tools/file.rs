//! Filesystem tools: read, write, list, and patch application.

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};

use coda_types::WorkspacePolicy;

use crate::tool::{Tool, failure};

/// Resolve a relative path inside `root`, rejecting traversal escapes.
pub fn resolve_within(root: &Path, rel: &str) -> Option<PathBuf> {
    let mut depth = 0usize;
    let mut out = root.to_path_buf();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

fn build_globset(patterns: &[String]) -> Option<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => tracing::warn!(pattern, error = %e, "Invalid policy glob"),
        }
    }
    builder.build().ok()
}

/// Whether the policy permits writing `rel_path`.
fn write_allowed(policy: &WorkspacePolicy, rel_path: &str) -> bool {
    if let Some(blocked) = build_globset(&policy.blocked_globs) {
        if blocked.is_match(rel_path) {
            return false;
        }
    }
    match build_globset(&policy.allowed_write_globs) {
        Some(allowed) => allowed.is_match(rel_path),
        None => true,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// read_file
// ─────────────────────────────────────────────────────────────────────────────

/// Read a file from the workspace.
pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    /// Create the tool rooted at the workspace.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file from the workspace"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to read, relative to workspace root"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> serde_json::Value {
        let Some(file_path) = arguments["file_path"].as_str() else {
            return failure("missing required parameter: file_path");
        };
        let Some(full_path) = resolve_within(&self.root, file_path) else {
            return failure("Access denied: path outside workspace");
        };
        if !full_path.exists() {
            return failure(format!("File not found: {}", file_path));
        }

        match tokio::fs::read(&full_path).await {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes).to_string();
                serde_json::json!({
                    "success": true,
                    "file_path": file_path,
                    "size": content.len(),
                    "content": content,
                })
            }
            Err(e) => {
                tracing::error!(file_path, error = %e, "read_file failed");
                failure(format!("Failed to read file: {}", e))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// write_file
// ─────────────────────────────────────────────────────────────────────────────

/// Write or create a file in the workspace, honoring write-policy globs.
pub struct WriteFileTool {
    root: PathBuf,
    policy: WorkspacePolicy,
}

impl WriteFileTool {
    /// Create the tool rooted at the workspace.
    pub fn new(root: impl Into<PathBuf>, policy: WorkspacePolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write or create a file in the workspace"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to write, relative to workspace root"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> serde_json::Value {
        let Some(file_path) = arguments["file_path"].as_str() else {
            return failure("missing required parameter: file_path");
        };
        let Some(content) = arguments["content"].as_str() else {
            return failure("missing required parameter: content");
        };
        let Some(full_path) = resolve_within(&self.root, file_path) else {
            return failure("Access denied: path outside workspace");
        };
        if !write_allowed(&self.policy, file_path) {
            return failure(format!("Write blocked by workspace policy: {}", file_path));
        }

        if let Some(parent) = full_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return failure(format!("Failed to create directories: {}", e));
            }
        }
        match tokio::fs::write(&full_path, content).await {
            Ok(()) => serde_json::json!({
                "success": true,
                "file_path": file_path,
                "bytes_written": content.len(),
            }),
            Err(e) => {
                tracing::error!(file_path, error = %e, "write_file failed");
                failure(format!("Failed to write file: {}", e))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// list_files
// ─────────────────────────────────────────────────────────────────────────────

/// List files and directories in the workspace.
pub struct ListFilesTool {
    root: PathBuf,
}

impl ListFilesTool {
    /// Create the tool rooted at the workspace.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories in the workspace"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "directory": {
                    "type": "string",
                    "description": "Directory path to list, relative to workspace root. Use '.' for root."
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Whether to list files recursively",
                    "default": false
                }
            },
            "required": ["directory"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> serde_json::Value {
        let directory = arguments["directory"].as_str().unwrap_or(".");
        let recursive = arguments["recursive"].as_bool().unwrap_or(false);

        let Some(full_path) = resolve_within(&self.root, directory) else {
            return failure("Access denied: path outside workspace");
        };
        if !full_path.exists() {
            return failure(format!("Directory not found: {}", directory));
        }
        if !full_path.is_dir() {
            return failure(format!("Not a directory: {}", directory));
        }

        let mut files = Vec::new();
        let mut directories = Vec::new();

        if recursive {
            for entry in walk(&full_path) {
                if let Ok(rel) = entry.strip_prefix(&self.root) {
                    files.push(rel.to_string_lossy().to_string());
                }
            }
        } else {
            let mut reader = match tokio::fs::read_dir(&full_path).await {
                Ok(reader) => reader,
                Err(e) => return failure(format!("Failed to list files: {}", e)),
            };
            while let Ok(Some(entry)) = reader.next_entry().await {
                let path = entry.path();
                let Ok(rel) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let rel = rel.to_string_lossy().to_string();
                if path.is_dir() {
                    directories.push(rel);
                } else {
                    files.push(rel);
                }
            }
        }

        files.sort();
        directories.sort();
        serde_json::json!({
            "success": true,
            "directory": directory,
            "total_files": files.len(),
            "total_directories": directories.len(),
            "files": files,
            "directories": directories,
        })
    }
}

fn walk(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// apply_patch
// ─────────────────────────────────────────────────────────────────────────────

/// Apply a unified diff to a workspace file.
pub struct ApplyPatchTool {
    root: PathBuf,
    policy: WorkspacePolicy,
}

impl ApplyPatchTool {
    /// Create the tool rooted at the workspace.
    pub fn new(root: impl Into<PathBuf>, policy: WorkspacePolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }
}

#[async_trait]
impl Tool for ApplyPatchTool {
    fn name(&self) -> &str {
        "apply_patch"
    }

    fn description(&self) -> &str {
        "Apply a unified diff patch to a file"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to patch"
                },
                "patch": {
                    "type": "string",
                    "description": "Unified diff patch content"
                }
            },
            "required": ["file_path", "patch"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> serde_json::Value {
        let Some(file_path) = arguments["file_path"].as_str() else {
            return failure("missing required parameter: file_path");
        };
        let Some(patch) = arguments["patch"].as_str() else {
            return failure("missing required parameter: patch");
        };
        let Some(full_path) = resolve_within(&self.root, file_path) else {
            return failure("Access denied: path outside workspace");
        };
        if !write_allowed(&self.policy, file_path) {
            return failure(format!("Write blocked by workspace policy: {}", file_path));
        }
        if !full_path.exists() {
            return failure(format!("File not found: {}", file_path));
        }

        let content = match tokio::fs::read_to_string(&full_path).await {
            Ok(content) => content,
            Err(e) => return failure(format!("Failed to read file: {}", e)),
        };

        let Some(patched) = apply_unified_diff(&content, patch) else {
            return failure("Failed to apply patch: hunk mismatch");
        };

        match tokio::fs::write(&full_path, &patched).await {
            Ok(()) => serde_json::json!({
                "success": true,
                "file_path": file_path,
                "bytes_written": patched.len(),
            }),
            Err(e) => failure(format!("Failed to write file: {}", e)),
        }
    }
}

/// Parse unified-diff hunks: (old_start, lines).
fn parse_hunks(diff: &str) -> Vec<(usize, Vec<String>)> {
    let mut hunks = Vec::new();
    let mut lines = diff.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(rest) = line.strip_prefix("@@ -") else {
            continue;
        };
        let old_start: usize = rest
            .split([',', ' '])
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(1);

        let mut hunk_lines = Vec::new();
        while let Some(next) = lines.peek() {
            if next.starts_with("@@") {
                break;
            }
            hunk_lines.push(lines.next().unwrap().to_string());
        }
        hunks.push((old_start, hunk_lines));
    }
    hunks
}

/// Apply a unified diff; `None` on any context or delete mismatch.
fn apply_unified_diff(content: &str, diff: &str) -> Option<String> {
    let original: Vec<&str> = content.lines().collect();
    let hunks = parse_hunks(diff);
    if hunks.is_empty() {
        return None;
    }

    let mut output: Vec<String> = Vec::new();
    let mut cursor = 0usize;

    for (old_start, hunk_lines) in hunks {
        let target = old_start.saturating_sub(1);
        if target < cursor {
            return None;
        }
        output.extend(original.get(cursor..target)?.iter().map(|s| s.to_string()));
        cursor = target;

        for line in hunk_lines {
            if line.starts_with("---") || line.starts_with("+++") || line.starts_with("diff ") {
                continue;
            }
            if line.starts_with('\\') {
                continue; // "\ No newline at end of file"
            }
            let (prefix, text) = line.split_at(1.min(line.len()));
            match prefix {
                " " => {
                    if original.get(cursor) != Some(&text) {
                        return None;
                    }
                    output.push(text.to_string());
                    cursor += 1;
                }
                "-" => {
                    if original.get(cursor) != Some(&text) {
                        return None;
                    }
                    cursor += 1;
                }
                "+" => output.push(text.to_string()),
                _ => {}
            }
        }
    }

    output.extend(original.get(cursor..)?.iter().map(|s| s.to_string()));
    Some(output.join("\n"))
}
