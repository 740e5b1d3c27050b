//! SQLite storage backend
//!
//! Expected schema (only the columns read here are listed):
//!
//! ```sql
//! session(id, project_id, parent_id, directory, title, time_created, time_updated)
//! message(id, session_id, time_created, data)   -- data: JSON body
//! part(id, message_id, session_id, time_created, data)
//! ```
//!
//! Column values are merged into the JSON body before validation so that the
//! same validators apply to both backends. Every query opens its own
//! read-only connection and drops it before returning.

use super::validate::{parse_message, parse_session, parse_tool_part};
use super::{sort_sessions, sort_tool_parts};
use crate::error::{Error, Result, StorageFailure, StorageFailureKind};
use crate::guard::PathGuard;
use crate::types::{SessionMetadata, StoredMessageMeta, StoredToolPart};
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Tables that must exist for the SQLite backend to be selected.
const REQUIRED_TABLES: [&str; 3] = ["session", "message", "part"];

/// Bound parameters per `IN (...)` query.
const PART_QUERY_CHUNK: usize = 500;

/// Classify an SQLite error message.
pub fn classify_error(message: &str) -> StorageFailureKind {
    let lower = message.to_lowercase();
    if lower.contains("busy") || lower.contains("locked") {
        StorageFailureKind::DbBusy
    } else if lower.contains("malformed") || lower.contains("corrupt") || lower.contains("not a database")
    {
        StorageFailureKind::DbCorrupt
    } else if lower.contains("unable to open") || lower.contains("cannot open") {
        StorageFailureKind::DbUnopenable
    } else {
        StorageFailureKind::DbQueryFailed
    }
}

fn query_failure(err: rusqlite::Error) -> Error {
    let message = err.to_string();
    Error::Storage(StorageFailure::new(classify_error(&message), message))
}

fn open_failure(err: rusqlite::Error) -> Error {
    let message = err.to_string();
    let kind = match classify_error(&message) {
        StorageFailureKind::DbQueryFailed => StorageFailureKind::DbUnopenable,
        other => other,
    };
    Error::Storage(StorageFailure::new(kind, message))
}

/// SQLite backend handle.
///
/// The directory holding the database is the only allowed root, so a
/// database symlinked to somewhere else is refused before it is opened.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    guard: PathGuard,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let guard = PathGuard::new([dir]);
        Self { path, guard }
    }

    fn open(&self) -> Result<Connection> {
        let resolved = self.guard.check(&self.path, None)?;
        if !resolved.is_file() {
            return Err(Error::Storage(StorageFailure::new(
                StorageFailureKind::DbUnopenable,
                format!("database not found: {}", self.path.display()),
            )));
        }
        Connection::open_with_flags(
            &resolved,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(open_failure)
    }

    /// Check that the database opens and carries the required tables.
    pub fn verify_schema(&self) -> Result<()> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .map_err(query_failure)?;
        for table in REQUIRED_TABLES {
            let found = stmt.exists([table]).map_err(query_failure)?;
            if !found {
                return Err(Error::Storage(StorageFailure::new(
                    StorageFailureKind::DbQueryFailed,
                    format!("missing table: {}", table),
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn list_sessions(&self, main_only: bool) -> Result<Vec<SessionMetadata>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, project_id, parent_id, directory, title, time_created, time_updated
                FROM session
                ORDER BY time_updated DESC, id DESC
                "#,
            )
            .map_err(query_failure)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(json!({
                    "id": row.get::<_, Option<String>>(0)?,
                    "projectID": row.get::<_, Option<String>>(1)?,
                    "parentID": row.get::<_, Option<String>>(2)?,
                    "directory": row.get::<_, Option<String>>(3)?,
                    "title": row.get::<_, Option<String>>(4)?,
                    "time": {
                        "created": row.get::<_, Option<i64>>(5)?,
                        "updated": row.get::<_, Option<i64>>(6)?,
                    },
                }))
            })
            .map_err(query_failure)?;

        let mut sessions = Vec::new();
        for row in rows {
            // A row with an unexpected column type is dropped like a malformed file.
            let Ok(value) = row else {
                continue;
            };
            if let Some(session) = parse_session(&value) {
                if !main_only || session.is_main() {
                    sessions.push(session);
                }
            }
        }

        sort_sessions(&mut sessions);
        Ok(sessions)
    }

    pub(crate) fn session_exists(&self, session_id: &str) -> Result<bool> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare("SELECT 1 FROM session WHERE id = ?1 LIMIT 1")
            .map_err(query_failure)?;
        stmt.exists([session_id]).map_err(query_failure)
    }

    pub(crate) fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessageMeta>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, session_id, time_created, data
                FROM message
                WHERE session_id = ?1
                ORDER BY time_created DESC, id DESC
                "#,
            )
            .map_err(query_failure)?;
        let mut rows = stmt.query(params![session_id]).map_err(query_failure)?;

        // Stream until `limit` valid rows are collected so dropped rows do
        // not shrink the page.
        let mut messages = Vec::new();
        while let Some(row) = rows.next().map_err(query_failure)? {
            let (Ok(id), Ok(sid), Ok(created), Ok(data)) = (
                row.get::<_, String>(0),
                row.get::<_, String>(1),
                row.get::<_, i64>(2),
                row.get::<_, String>(3),
            ) else {
                continue;
            };
            let Some(mut body) = parse_body(&data) else {
                continue;
            };
            body["id"] = Value::String(id);
            body["sessionID"] = Value::String(sid);
            set_created(&mut body, created);

            if let Some(message) = parse_message(&body) {
                messages.push(message);
                if messages.len() >= limit {
                    break;
                }
            }
        }

        Ok(messages)
    }

    pub(crate) fn tool_parts_for_messages(
        &self,
        message_ids: &[String],
    ) -> Result<Vec<StoredToolPart>> {
        let conn = self.open()?;
        let mut parts = Vec::new();

        for chunk in message_ids.chunks(PART_QUERY_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT id, message_id, session_id, data FROM part \
                 WHERE message_id IN ({}) ORDER BY message_id ASC, time_created ASC, id ASC",
                placeholders
            );
            let mut stmt = conn.prepare(&sql).map_err(query_failure)?;
            let mut rows = stmt
                .query(params_from_iter(chunk.iter()))
                .map_err(query_failure)?;

            while let Some(row) = rows.next().map_err(query_failure)? {
                let (Ok(id), Ok(message_id), Ok(session_id), Ok(data)) = (
                    row.get::<_, String>(0),
                    row.get::<_, String>(1),
                    row.get::<_, String>(2),
                    row.get::<_, String>(3),
                ) else {
                    continue;
                };
                let Some(mut body) = parse_body(&data) else {
                    continue;
                };
                body["id"] = Value::String(id);
                body["messageID"] = Value::String(message_id);
                body["sessionID"] = Value::String(session_id);

                if let Some(part) = parse_tool_part(&body) {
                    parts.push(part);
                }
            }
        }

        sort_tool_parts(&mut parts);
        Ok(parts)
    }
}

/// Parse a `data` column; only JSON objects are usable bodies.
fn parse_body(data: &str) -> Option<Value> {
    serde_json::from_str::<Value>(data)
        .ok()
        .filter(|v| v.is_object())
}

/// The `time_created` column is authoritative for message ordering.
fn set_created(body: &mut Value, created: i64) {
    if !body.get("time").map(Value::is_object).unwrap_or(false) {
        body["time"] = json!({});
    }
    body["time"]["created"] = json!(created);
}
