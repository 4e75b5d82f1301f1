//! SQL console: statement execution, query history and saved favorites

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

use super::error::{AnalyticsError, AnalyticsResult};
use crate::model::{new_id, now_millis};

/// Rows returned by a console statement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Rows changed by a write statement, 0 for queries
    pub rows_affected: usize,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryHistoryEntry {
    pub query: String,
    pub run_count: u32,
    pub executed_at: i64,
    pub last_row_count: Option<usize>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlFavorite {
    pub id: String,
    pub name: String,
    pub query: String,
    pub created_at: i64,
    pub updated_at: i64,
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

/// Run one statement. Writes fail with `WriteForbidden` unless `allow_writes`.
pub(crate) fn run_statement(
    conn: &Connection,
    sql: &str,
    allow_writes: bool,
) -> AnalyticsResult<QueryResult> {
    let mut stmt = conn.prepare(sql)?;
    // Transaction control and ATTACH report as read-only but change connection state
    let read_only = stmt.readonly() && stmt.column_count() > 0;
    if !read_only && !allow_writes {
        return Err(AnalyticsError::WriteForbidden);
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    if columns.is_empty() {
        let rows_affected = stmt.execute([])?;
        return Ok(QueryResult {
            columns,
            rows: Vec::new(),
            rows_affected,
            read_only,
        });
    }

    let width = columns.len();
    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for index in 0..width {
            values.push(to_json(row.get_ref(index)?));
        }
        rows.push(values);
    }
    Ok(QueryResult {
        columns,
        rows,
        rows_affected: 0,
        read_only,
    })
}

/// Record an execution, keeping the newest `limit` distinct queries
pub(crate) fn record_history(
    conn: &Connection,
    sql: &str,
    outcome: &AnalyticsResult<QueryResult>,
    limit: usize,
) -> AnalyticsResult<()> {
    let (row_count, error) = match outcome {
        Ok(result) => (Some(result.rows.len().max(result.rows_affected) as i64), None),
        Err(err) => (None, Some(err.to_string())),
    };
    conn.execute(
        "INSERT INTO sql_query_history (query, seq, run_count, executed_at, last_row_count, last_error)
         VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM sql_query_history), 1, ?2, ?3, ?4)
         ON CONFLICT(query) DO UPDATE SET
           seq = excluded.seq,
           run_count = run_count + 1,
           executed_at = excluded.executed_at,
           last_row_count = excluded.last_row_count,
           last_error = excluded.last_error",
        params![sql, now_millis(), row_count, error],
    )?;
    conn.execute(
        "DELETE FROM sql_query_history WHERE query NOT IN (
           SELECT query FROM sql_query_history ORDER BY seq DESC LIMIT ?1)",
        params![limit as i64],
    )?;
    Ok(())
}

pub(crate) fn query_history(conn: &Connection, limit: usize) -> AnalyticsResult<Vec<QueryHistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT query, run_count, executed_at, last_row_count, last_error
         FROM sql_query_history ORDER BY seq DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok(QueryHistoryEntry {
            query: row.get(0)?,
            run_count: row.get(1)?,
            executed_at: row.get(2)?,
            last_row_count: row.get::<_, Option<i64>>(3)?.map(|n| n as usize),
            last_error: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn clear_history(conn: &Connection) -> AnalyticsResult<()> {
    conn.execute("DELETE FROM sql_query_history", [])?;
    Ok(())
}

/// Save a favorite; an existing `id` is updated in place
pub(crate) fn save_favorite(
    conn: &Connection,
    id: Option<&str>,
    name: &str,
    sql: &str,
) -> AnalyticsResult<SqlFavorite> {
    let id = id.map(str::to_string).unwrap_or_else(new_id);
    let now = now_millis();
    conn.execute(
        "INSERT INTO sql_favorites (id, name, query, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           query = excluded.query,
           updated_at = excluded.updated_at",
        params![id, name, sql, now],
    )?;
    let favorite = conn
        .query_row(
            "SELECT id, name, query, created_at, updated_at FROM sql_favorites WHERE id = ?1",
            params![id],
            map_favorite,
        )
        .optional()?;
    favorite.ok_or(AnalyticsError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
}

fn map_favorite(row: &rusqlite::Row<'_>) -> rusqlite::Result<SqlFavorite> {
    Ok(SqlFavorite {
        id: row.get(0)?,
        name: row.get(1)?,
        query: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

pub(crate) fn list_favorites(conn: &Connection) -> AnalyticsResult<Vec<SqlFavorite>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, query, created_at, updated_at FROM sql_favorites
         ORDER BY name COLLATE NOCASE, id",
    )?;
    let rows = stmt.query_map([], map_favorite)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn delete_favorite(conn: &Connection, id: &str) -> AnalyticsResult<bool> {
    Ok(conn.execute("DELETE FROM sql_favorites WHERE id = ?1", params![id])? > 0)
}
