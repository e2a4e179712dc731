//! Session, message-log, and tool-event operations.

use rusqlite::{OptionalExtension, params};

use crate::error::{Result, StoreError};
use crate::records::{MessageRecord, SessionRecord};
use crate::{Store, new_id, now};

/// Title length cap applied to the first user message.
const TITLE_MAX_CHARS: usize = 80;

impl Store {
    /// Create a session row.
    pub fn create_session(&self, session: &SessionRecord) -> Result<()> {
        let timestamp = now();
        self.conn().execute(
            "INSERT INTO sessions (id, workspace_id, agent_config_id, model_provider, model_name,
                                   model_url, context_window, temperature, title, status,
                                   message_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?11)",
            params![
                session.id,
                session.workspace_id,
                session.agent_config_id,
                session.model_provider,
                session.model_name,
                session.model_url,
                session.context_window,
                session.temperature,
                session.title,
                session.status,
                timestamp,
            ],
        )?;
        Ok(())
    }

    /// Fetch a session row.
    pub fn get_session(&self, session_id: &str) -> Result<SessionRecord> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, workspace_id, agent_config_id, model_provider, model_name, model_url,
                    context_window, temperature, title, status, message_count
             FROM sessions WHERE id = ?1",
            params![session_id],
            |row| {
                Ok(SessionRecord {
                    id: row.get(0)?,
                    workspace_id: row.get(1)?,
                    agent_config_id: row.get(2)?,
                    model_provider: row.get(3)?,
                    model_name: row.get(4)?,
                    model_url: row.get(5)?,
                    context_window: row.get(6)?,
                    temperature: row.get(7)?,
                    title: row.get(8)?,
                    status: row.get(9)?,
                    message_count: row.get(10)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("session", session_id))
    }

    /// Append a message to the session log.
    ///
    /// Assigns the next sequence number, mirrors the content into FTS, bumps
    /// the session's message count, and — for the first user message — sets
    /// the session title from the first 80 characters of its first line.
    pub fn append_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        context: Option<&serde_json::Value>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<MessageRecord> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::not_found("session", session_id));
        }

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq) + 1, 0) FROM session_messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        let id = new_id();
        let timestamp = now();
        tx.execute(
            "INSERT INTO session_messages (id, session_id, seq, role, content, context_json,
                                           metadata_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                session_id,
                seq,
                role,
                content,
                context.map(|c| c.to_string()),
                metadata.map(|m| m.to_string()),
                timestamp,
            ],
        )?;
        tx.execute(
            "INSERT INTO session_messages_fts (content, message_id, session_id)
             VALUES (?1, ?2, ?3)",
            params![content, id, session_id],
        )?;
        tx.execute(
            "UPDATE sessions SET message_count = message_count + 1, updated_at = ?2 WHERE id = ?1",
            params![session_id, timestamp],
        )?;

        if role == "user" {
            tx.execute(
                "UPDATE sessions SET title = ?2
                 WHERE id = ?1 AND (title IS NULL OR title = '')",
                params![session_id, derive_title(content)],
            )?;
        }

        tx.commit()?;
        Ok(MessageRecord {
            id,
            session_id: session_id.to_string(),
            seq: seq as u32,
            role: role.to_string(),
            content: content.to_string(),
            context: context.cloned(),
            metadata: metadata.cloned(),
        })
    }

    /// Messages of a session in append order.
    pub fn session_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, seq, role, content, context_json, metadata_json
             FROM session_messages WHERE session_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, session_id, seq, role, content, context, metadata)| {
                Ok(MessageRecord {
                    id,
                    session_id,
                    seq: seq as u32,
                    role,
                    content,
                    context: parse_json_column(context, "context_json")?,
                    metadata: parse_json_column(metadata, "metadata_json")?,
                })
            })
            .collect()
    }

    /// Full-text search over message content. Returns message ids.
    pub fn search_messages(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT message_id FROM session_messages_fts
             WHERE session_messages_fts MATCH ?1 LIMIT ?2",
        )?;
        let ids = stmt
            .query_map(params![query, limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Record one tool invocation.
    pub fn record_tool_event(
        &self,
        session_id: &str,
        tool_name: &str,
        arguments: &serde_json::Value,
        result: Option<&serde_json::Value>,
        success: Option<bool>,
    ) -> Result<()> {
        let conn = self.conn();
        let seq: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq) + 1, 0) FROM tool_events WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO tool_events (id, session_id, seq, tool_name, arguments_json,
                                      result_json, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new_id(),
                session_id,
                seq,
                tool_name,
                arguments.to_string(),
                result.map(|r| r.to_string()),
                success,
                now(),
            ],
        )?;
        Ok(())
    }
}

fn parse_json_column(
    value: Option<String>,
    column: &'static str,
) -> Result<Option<serde_json::Value>> {
    match value {
        None => Ok(None),
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StoreError::CorruptJson { column, source }),
    }
}

/// First 80 characters of the first line.
fn derive_title(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or("");
    first_line.chars().take(TITLE_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            workspace_id: "ws1".to_string(),
            agent_config_id: None,
            model_provider: Some("ollama".to_string()),
            model_name: Some("qwen3-coder".to_string()),
            model_url: None,
            context_window: Some(8192),
            temperature: Some(0.7),
            title: None,
            status: "active".to_string(),
            message_count: 0,
        }
    }

    #[test]
    fn test_append_assigns_sequence_and_counts() {
        let store = Store::open_in_memory().unwrap();
        store.create_session(&session("s1")).unwrap();

        let m0 = store.append_message("s1", "user", "hello", None, None).unwrap();
        let m1 = store.append_message("s1", "assistant", "hi", None, None).unwrap();
        assert_eq!(m0.seq, 0);
        assert_eq!(m1.seq, 1);

        let row = store.get_session("s1").unwrap();
        assert_eq!(row.message_count, 2);
    }

    #[test]
    fn test_title_from_first_user_message() {
        let store = Store::open_in_memory().unwrap();
        store.create_session(&session("s1")).unwrap();

        let long_line = "x".repeat(200);
        store
            .append_message("s1", "user", &format!("{long_line}\nsecond line"), None, None)
            .unwrap();
        let title = store.get_session("s1").unwrap().title.unwrap();
        assert_eq!(title.chars().count(), 80);

        // A later user message does not overwrite the title.
        store.append_message("s1", "user", "another", None, None).unwrap();
        assert_eq!(store.get_session("s1").unwrap().title.unwrap().len(), 80);
    }

    #[test]
    fn test_fts_mirror() {
        let store = Store::open_in_memory().unwrap();
        store.create_session(&session("s1")).unwrap();
        store
            .append_message("s1", "user", "refactor the websocket handler", None, None)
            .unwrap();
        store.append_message("s1", "assistant", "done", None, None).unwrap();

        let hits = store.search_messages("websocket", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store.search_messages("nonexistent", 10).unwrap().is_empty());
    }

    #[test]
    fn test_context_and_metadata_round_trip() {
        let store = Store::open_in_memory().unwrap();
        store.create_session(&session("s1")).unwrap();
        let context = serde_json::json!({"active_file": {"file_path": "a.rs"}});
        let metadata = serde_json::json!({"iterations": 2, "success": true});

        store.append_message("s1", "user", "q", Some(&context), None).unwrap();
        store.append_message("s1", "assistant", "a", None, Some(&metadata)).unwrap();

        let messages = store.session_messages("s1").unwrap();
        assert_eq!(messages[0].context.as_ref().unwrap()["active_file"]["file_path"], "a.rs");
        assert_eq!(messages[1].metadata.as_ref().unwrap()["iterations"], 2);
    }

    #[test]
    fn test_append_to_missing_session_errors() {
        let store = Store::open_in_memory().unwrap();
        let err = store.append_message("ghost", "user", "x", None, None).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_tool_events_sequence() {
        let store = Store::open_in_memory().unwrap();
        store.create_session(&session("s1")).unwrap();
        let args = serde_json::json!({"directory": "."});
        store.record_tool_event("s1", "list_files", &args, None, Some(true)).unwrap();
        store.record_tool_event("s1", "list_files", &args, None, Some(true)).unwrap();
    }
}
