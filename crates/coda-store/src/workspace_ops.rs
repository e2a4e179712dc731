//! Workspace and policy operations.

use coda_types::WorkspacePolicy;
use rusqlite::{OptionalExtension, params};

use crate::error::{Result, StoreError};
use crate::{Store, now};

impl Store {
    /// Create or update a workspace row.
    pub fn upsert_workspace(&self, id: &str, name: &str, path: &str) -> Result<()> {
        let timestamp = now();
        self.conn().execute(
            "INSERT INTO workspaces (id, name, path, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, path = excluded.path, updated_at = excluded.updated_at",
            params![id, name, path, timestamp],
        )?;
        Ok(())
    }

    /// Fetch a workspace's (name, path).
    pub fn get_workspace(&self, id: &str) -> Result<(String, String)> {
        self.conn()
            .query_row(
                "SELECT name, path FROM workspaces WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("workspace", id))
    }

    /// The workspace's policy, or the default when none has been stored.
    pub fn get_policy(&self, workspace_id: &str) -> Result<WorkspacePolicy> {
        let json: Option<String> = self
            .conn()
            .query_row(
                "SELECT policy_json FROM workspace_policies WHERE workspace_id = ?1",
                params![workspace_id],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            None => Ok(WorkspacePolicy::default()),
            Some(text) => serde_json::from_str(&text)
                .map_err(|source| StoreError::CorruptJson {
                    column: "policy_json",
                    source,
                }),
        }
    }

    /// Store a workspace's policy.
    pub fn set_policy(&self, workspace_id: &str, policy: &WorkspacePolicy) -> Result<()> {
        let json = serde_json::to_string(policy).map_err(|source| StoreError::CorruptJson {
            column: "policy_json",
            source,
        })?;
        self.conn().execute(
            "INSERT INTO workspace_policies (workspace_id, policy_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(workspace_id) DO UPDATE SET
                policy_json = excluded.policy_json, updated_at = excluded.updated_at",
            params![workspace_id, json, now()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coda_types::CommandApproval;

    #[test]
    fn test_workspace_round_trip() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_workspace("ws1", "demo", "/tmp/demo").unwrap();
        assert_eq!(
            store.get_workspace("ws1").unwrap(),
            ("demo".to_string(), "/tmp/demo".to_string())
        );
        assert!(store.get_workspace("ghost").is_err());
    }

    #[test]
    fn test_missing_policy_defaults() {
        let store = Store::open_in_memory().unwrap();
        let policy = store.get_policy("ws1").unwrap();
        assert_eq!(policy.command_approval, CommandApproval::Prompt);
    }

    #[test]
    fn test_policy_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let mut policy = WorkspacePolicy::default();
        policy.command_approval = CommandApproval::Never;
        policy.auto_approve_tools.push("run_tests".to_string());

        store.set_policy("ws1", &policy).unwrap();
        let loaded = store.get_policy("ws1").unwrap();
        assert_eq!(loaded.command_approval, CommandApproval::Never);
        assert!(loaded.auto_approves("run_tests"));
    }
}
