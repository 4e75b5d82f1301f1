//! Mirror tables and the statements that keep them in step with the primary store

use rusqlite::{params, Connection};

use super::error::AnalyticsResult;
use crate::events::ChangeEvent;
use crate::model::Prompt;

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS prompts (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL,
    system_instruction TEXT,
    category TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    is_favorite INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER,
    history_count INTEGER NOT NULL DEFAULT 0,
    saved_run_count INTEGER NOT NULL DEFAULT 0,
    model TEXT,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_prompts_category ON prompts(category);
CREATE INDEX IF NOT EXISTS idx_prompts_updated_at ON prompts(updated_at);

CREATE TABLE IF NOT EXISTS sql_query_history (
    query TEXT PRIMARY KEY,
    seq INTEGER NOT NULL,
    run_count INTEGER NOT NULL DEFAULT 1,
    executed_at INTEGER NOT NULL,
    last_row_count INTEGER,
    last_error TEXT
);

CREATE TABLE IF NOT EXISTS sql_favorites (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    query TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
";

pub(crate) fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )
}

/// Insert or replace the mirror row of `prompt`
pub(crate) fn upsert_prompt(conn: &Connection, prompt: &Prompt) -> AnalyticsResult<()> {
    let tags = serde_json::to_string(&prompt.tags)?;
    let payload = serde_json::to_string(prompt)?;
    let model = prompt.config.as_ref().map(|config| config.model.as_str());
    conn.execute(
        "INSERT INTO prompts (id, title, description, content, system_instruction, category,
                              tags, is_favorite, created_at, updated_at, deleted_at,
                              history_count, saved_run_count, model, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
         ON CONFLICT(id) DO UPDATE SET
           title = excluded.title,
           description = excluded.description,
           content = excluded.content,
           system_instruction = excluded.system_instruction,
           category = excluded.category,
           tags = excluded.tags,
           is_favorite = excluded.is_favorite,
           created_at = excluded.created_at,
           updated_at = excluded.updated_at,
           deleted_at = excluded.deleted_at,
           history_count = excluded.history_count,
           saved_run_count = excluded.saved_run_count,
           model = excluded.model,
           payload = excluded.payload",
        params![
            prompt.id,
            prompt.title,
            prompt.description,
            prompt.content,
            prompt.system_instruction,
            prompt.category,
            tags,
            prompt.is_favorite,
            prompt.created_at,
            prompt.updated_at,
            prompt.deleted_at,
            prompt.history.len() as i64,
            prompt.saved_runs.len() as i64,
            model,
            payload,
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_prompt(conn: &Connection, id: &str) -> AnalyticsResult<usize> {
    Ok(conn.execute("DELETE FROM prompts WHERE id = ?1", params![id])?)
}

/// Apply one change event. Updates for unknown ids insert the row.
pub(crate) fn apply_event(conn: &Connection, event: &ChangeEvent) -> AnalyticsResult<()> {
    match event {
        ChangeEvent::PromptCreated(prompt) | ChangeEvent::PromptUpdated(prompt) => {
            upsert_prompt(conn, prompt)
        }
        ChangeEvent::PromptDeleted { id } => delete_prompt(conn, id).map(|_| ()),
    }
}
