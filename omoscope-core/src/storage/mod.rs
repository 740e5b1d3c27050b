//! Read-only storage backends
//!
//! OpenCode persists sessions either as a directory tree of JSON files or in
//! a SQLite database. Both are exposed through [`StorageBackend`], a closed
//! set of variants that answer the same five queries with the same ordering
//! and the same row sanitation:
//!
//! | Query | Ordering |
//! |-------|----------|
//! | [`StorageBackend::list_main_sessions`] | `updated` desc, then id desc |
//! | [`StorageBackend::list_all_sessions`] | `updated` desc, then id desc |
//! | [`StorageBackend::session_exists`] | - |
//! | [`StorageBackend::recent_messages`] | `created` desc, then id desc |
//! | [`StorageBackend::tool_parts_for_messages`] | message id, start time, part id (all asc) |
//!
//! Storage unavailability surfaces as [`Error::Storage`](crate::Error::Storage)
//! so callers can fall back to the other backend.

pub mod files;
pub mod sqlite;
pub mod validate;

pub use files::FileStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::guard::resolve_real_path;
use crate::types::{SessionMetadata, StoredMessageMeta, StoredToolPart};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Which backend a [`StorageBackend`] reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Files,
    Sqlite,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Files => "files",
            BackendKind::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable handle on one storage backend.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    Files(FileStore),
    Sqlite(SqliteStore),
}

impl StorageBackend {
    /// Files backend rooted at `storage_root`.
    pub fn files(storage_root: impl Into<PathBuf>) -> Self {
        StorageBackend::Files(FileStore::new(storage_root))
    }

    /// SQLite backend reading `sqlite_path`.
    pub fn sqlite(sqlite_path: impl Into<PathBuf>) -> Self {
        StorageBackend::Sqlite(SqliteStore::new(sqlite_path))
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            StorageBackend::Files(_) => BackendKind::Files,
            StorageBackend::Sqlite(_) => BackendKind::Sqlite,
        }
    }

    /// Top-level sessions, optionally only those whose directory resolves to
    /// the same real path as `directory_filter`.
    pub fn list_main_sessions(
        &self,
        directory_filter: Option<&Path>,
    ) -> Result<Vec<SessionMetadata>> {
        let sessions = match self {
            StorageBackend::Files(store) => store.list_sessions(true)?,
            StorageBackend::Sqlite(store) => store.list_sessions(true)?,
        };
        Ok(match directory_filter {
            Some(root) => filter_by_directory(sessions, root),
            None => sessions,
        })
    }

    /// Every session including sub-sessions.
    pub fn list_all_sessions(&self) -> Result<Vec<SessionMetadata>> {
        match self {
            StorageBackend::Files(store) => store.list_sessions(false),
            StorageBackend::Sqlite(store) => store.list_sessions(false),
        }
    }

    pub fn session_exists(&self, session_id: &str) -> Result<bool> {
        match self {
            StorageBackend::Files(store) => store.session_exists(session_id),
            StorageBackend::Sqlite(store) => store.session_exists(session_id),
        }
    }

    /// Up to `limit` newest messages of a session.
    pub fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessageMeta>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        match self {
            StorageBackend::Files(store) => store.recent_messages(session_id, limit),
            StorageBackend::Sqlite(store) => store.recent_messages(session_id, limit),
        }
    }

    /// Tool parts attached to any of `message_ids`.
    pub fn tool_parts_for_messages(&self, message_ids: &[String]) -> Result<Vec<StoredToolPart>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            StorageBackend::Files(store) => store.tool_parts_for_messages(message_ids),
            StorageBackend::Sqlite(store) => store.tool_parts_for_messages(message_ids),
        }
    }
}

/// Choose the backend once at startup.
///
/// SQLite wins when the file opens read-only and has the `session`, `message`
/// and `part` tables. Any failure falls back to the files backend silently.
pub fn select_backend(sqlite_path: &Path, storage_root: &Path) -> StorageBackend {
    let store = SqliteStore::new(sqlite_path);
    match store.verify_schema() {
        Ok(()) => {
            tracing::info!(path = %sqlite_path.display(), "Using SQLite storage backend");
            StorageBackend::Sqlite(store)
        }
        Err(e) => {
            tracing::debug!(
                path = %sqlite_path.display(),
                error = %e,
                "SQLite backend unavailable, using files"
            );
            tracing::info!(root = %storage_root.display(), "Using files storage backend");
            StorageBackend::files(storage_root)
        }
    }
}

pub(crate) fn sort_sessions(sessions: &mut [SessionMetadata]) {
    sessions.sort_by(|a, b| {
        b.updated_ms
            .cmp(&a.updated_ms)
            .then_with(|| b.id.cmp(&a.id))
    });
}

pub(crate) fn sort_messages(messages: &mut [StoredMessageMeta]) {
    messages.sort_by(|a, b| {
        b.created_ms
            .cmp(&a.created_ms)
            .then_with(|| b.id.cmp(&a.id))
    });
}

pub(crate) fn sort_tool_parts(parts: &mut [StoredToolPart]) {
    parts.sort_by(|a, b| {
        a.message_id
            .cmp(&b.message_id)
            .then_with(|| a.created_key().cmp(&b.created_key()))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Relative session directories never match: resolving them would depend on
/// the process working directory.
fn filter_by_directory(sessions: Vec<SessionMetadata>, root: &Path) -> Vec<SessionMetadata> {
    let wanted = resolve_real_path(root).unwrap_or_else(|_| root.to_path_buf());
    let mut resolved: HashMap<String, PathBuf> = HashMap::new();

    sessions
        .into_iter()
        .filter(|session| {
            if !Path::new(&session.directory).is_absolute() {
                return false;
            }
            let real = resolved
                .entry(session.directory.clone())
                .or_insert_with(|| {
                    let dir = Path::new(&session.directory);
                    resolve_real_path(dir).unwrap_or_else(|_| dir.to_path_buf())
                });
            *real == wanted
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DelegationArgs, Role, ToolStatus};

    fn session(id: &str, updated: i64) -> SessionMetadata {
        SessionMetadata {
            id: id.to_string(),
            project_id: "p".to_string(),
            directory: "/repo".to_string(),
            title: None,
            parent_id: None,
            created_ms: 0,
            updated_ms: updated,
        }
    }

    #[test]
    fn test_sort_sessions_updated_then_id() {
        let mut sessions = vec![session("a", 5), session("c", 9), session("b", 9)];
        sort_sessions(&mut sessions);
        let ids: Vec<_> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_sort_messages_created_then_id() {
        let message = |id: &str, created: i64| StoredMessageMeta {
            id: id.to_string(),
            session_id: "s".to_string(),
            role: Role::User,
            created_ms: created,
            completed_ms: None,
            agent: None,
            provider_id: None,
            model_id: None,
            tokens: None,
        };
        let mut messages = vec![message("m1", 10), message("m3", 20), message("m2", 20)];
        sort_messages(&mut messages);
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m2", "m1"]);
    }

    #[test]
    fn test_sort_tool_parts() {
        let part = |id: &str, message: &str, start: Option<i64>| StoredToolPart {
            id: id.to_string(),
            session_id: "s".to_string(),
            message_id: message.to_string(),
            call_id: format!("call-{}", id),
            tool: "read".to_string(),
            status: ToolStatus::Completed,
            delegation: DelegationArgs::default(),
            started_ms: start,
        };
        let mut parts = vec![
            part("p3", "m2", Some(1)),
            part("p2", "m1", Some(50)),
            part("p1", "m1", Some(50)),
            part("p0", "m1", None),
        ];
        sort_tool_parts(&mut parts);
        let ids: Vec<_> = parts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p0", "p1", "p2", "p3"]);
    }

    #[test]
    fn test_select_backend_falls_back_to_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = select_backend(&dir.path().join("missing.db"), dir.path());
        assert_eq!(backend.kind(), BackendKind::Files);

        let not_db = dir.path().join("garbage.db");
        std::fs::write(&not_db, "definitely not sqlite").unwrap();
        assert_eq!(select_backend(&not_db, dir.path()).kind(), BackendKind::Files);
    }

    #[test]
    fn test_select_backend_requires_all_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE session (id TEXT); CREATE TABLE message (id TEXT);")
            .unwrap();
        drop(conn);
        assert_eq!(select_backend(&path, dir.path()).kind(), BackendKind::Files);

        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE part (id TEXT);").unwrap();
        drop(conn);
        assert_eq!(select_backend(&path, dir.path()).kind(), BackendKind::Sqlite);
    }

    #[test]
    fn test_directory_filter_ignores_relative_directories() {
        let cwd = std::env::current_dir().unwrap();
        let sessions = ["", ".", "./", "src"]
            .iter()
            .enumerate()
            .map(|(i, dir)| {
                let mut s = session(&format!("ses_{}", i), i as i64);
                s.directory = dir.to_string();
                s
            })
            .collect();
        assert!(filter_by_directory(sessions, &cwd).is_empty());

        let mut absolute = session("ses_abs", 1);
        absolute.directory = cwd.to_string_lossy().to_string();
        assert_eq!(filter_by_directory(vec![absolute], &cwd).len(), 1);
    }

    #[test]
    fn test_directory_filter_follows_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("repo");
        std::fs::create_dir_all(&real).unwrap();

        let mut inside = session("inside", 1);
        inside.directory = real.to_string_lossy().to_string();
        let mut other = session("other", 2);
        other.directory = dir.path().join("elsewhere").to_string_lossy().to_string();

        let kept = filter_by_directory(vec![inside, other], &real);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "inside");

        #[cfg(unix)]
        {
            let alias = dir.path().join("alias");
            std::os::unix::fs::symlink(&real, &alias).unwrap();
            let mut via_alias = session("alias", 3);
            via_alias.directory = alias.to_string_lossy().to_string();
            let kept = filter_by_directory(vec![via_alias], &real);
            assert_eq!(kept.len(), 1);
        }
    }
}
