//! Schema creation. Every statement is idempotent.

use rusqlite::Connection;

use crate::error::Result;

pub(crate) fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS workspaces (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            path        TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS workspace_policies (
            workspace_id TEXT PRIMARY KEY,
            policy_json  TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id              TEXT PRIMARY KEY,
            workspace_id    TEXT NOT NULL,
            agent_config_id TEXT,
            model_provider  TEXT,
            model_name      TEXT,
            model_url       TEXT,
            context_window  INTEGER,
            temperature     REAL,
            title           TEXT,
            status          TEXT NOT NULL DEFAULT 'active',
            message_count   INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS session_messages (
            id            TEXT PRIMARY KEY,
            session_id    TEXT NOT NULL,
            seq           INTEGER NOT NULL,
            role          TEXT NOT NULL,
            content       TEXT NOT NULL,
            context_json  TEXT,
            metadata_json TEXT,
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_session_messages_session
            ON session_messages(session_id, seq);

        CREATE VIRTUAL TABLE IF NOT EXISTS session_messages_fts USING fts5(
            content,
            message_id UNINDEXED,
            session_id UNINDEXED
        );

        CREATE TABLE IF NOT EXISTS tool_events (
            id             TEXT PRIMARY KEY,
            session_id     TEXT NOT NULL,
            seq            INTEGER NOT NULL,
            tool_name      TEXT NOT NULL,
            arguments_json TEXT NOT NULL,
            result_json    TEXT,
            success        INTEGER,
            created_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tool_events_session
            ON tool_events(session_id, seq);

        CREATE TABLE IF NOT EXISTS files (
            id           TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            path         TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            size         INTEGER NOT NULL,
            line_count   INTEGER NOT NULL,
            status       TEXT NOT NULL,
            indexed_at   TEXT NOT NULL,
            UNIQUE(workspace_id, path)
        );

        CREATE TABLE IF NOT EXISTS chunks (
            id              TEXT PRIMARY KEY,
            workspace_id    TEXT NOT NULL,
            file_id         TEXT NOT NULL,
            chunk_index     INTEGER NOT NULL,
            content         TEXT NOT NULL,
            content_hash    TEXT NOT NULL,
            chunk_type      TEXT NOT NULL,
            start_line      INTEGER,
            end_line        INTEGER,
            start_offset    INTEGER,
            end_offset      INTEGER,
            vector_id       TEXT NOT NULL,
            embedding_model TEXT NOT NULL,
            UNIQUE(file_id, chunk_index)
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_vector ON chunks(vector_id);
        CREATE INDEX IF NOT EXISTS idx_chunks_workspace ON chunks(workspace_id);

        CREATE TABLE IF NOT EXISTS symbols (
            id             TEXT PRIMARY KEY,
            workspace_id   TEXT NOT NULL,
            file_id        TEXT NOT NULL,
            name           TEXT NOT NULL,
            qualified_name TEXT,
            kind           TEXT NOT NULL,
            line           INTEGER NOT NULL,
            col            INTEGER NOT NULL,
            end_line       INTEGER NOT NULL,
            end_col        INTEGER NOT NULL,
            signature      TEXT,
            parent_qualname TEXT,
            chunk_id       TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_symbols_workspace ON symbols(workspace_id);
        CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);

        CREATE TABLE IF NOT EXISTS embedding_cache (
            content_hash TEXT PRIMARY KEY,
            model        TEXT NOT NULL,
            vector       BLOB NOT NULL,
            dimensions   INTEGER NOT NULL,
            use_count    INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}
