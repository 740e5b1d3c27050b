//! Directory-of-JSON storage backend
//!
//! OpenCode's file storage layout:
//!
//! ```text
//! <root>/session/<projectID>/<sessionID>.json
//! <root>/message/<sessionID>/<messageID>.json
//! <root>/part/<messageID>/<partID>.json
//! ```
//!
//! Files are rewritten in place by the running agent, so a read can observe
//! a half-written file. Anything that fails to read or parse is skipped.

use super::validate::{parse_message, parse_session, parse_tool_part};
use super::{sort_messages, sort_sessions, sort_tool_parts};
use crate::error::{Error, Result, StorageFailure, StorageFailureKind};
use crate::guard::PathGuard;
use crate::types::{SessionMetadata, StoredMessageMeta, StoredToolPart};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Files backend handle.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    guard: PathGuard,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let guard = PathGuard::new([&root]);
        Self { root, guard }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_root(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(Error::Storage(StorageFailure::new(
                StorageFailureKind::StorageMissing,
                format!("storage root not found: {}", self.root.display()),
            )))
        }
    }

    /// Read one JSON file through the guard. Unreadable or malformed files
    /// yield `None`; escapes outside the root are errors.
    fn read_json(&self, path: &Path) -> Result<Option<Value>> {
        let resolved = self.guard.check(path, None)?;
        let content = match std::fs::read_to_string(&resolved) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(path = %resolved.display(), error = %e, "Skipping unreadable record");
                return Ok(None);
            }
        };
        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::debug!(path = %resolved.display(), error = %e, "Skipping malformed record");
                Ok(None)
            }
        }
    }

    /// All `*.json` files directly inside `dir`, sorted by name.
    /// A missing directory is an empty listing.
    fn json_files_in(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let resolved = self.guard.check(dir, None)?;
        let entries = match std::fs::read_dir(&resolved) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                tracing::debug!(dir = %resolved.display(), error = %e, "Cannot list directory");
                return Ok(Vec::new());
            }
        };

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        files.sort();
        Ok(files)
    }

    fn session_files(&self, file_name: &str) -> Result<Vec<PathBuf>> {
        let root = glob::Pattern::escape(&self.root.to_string_lossy());
        let pattern = Path::new(&root).join("session").join("*").join(file_name);
        let pattern_str = pattern.to_string_lossy();
        let entries = glob::glob(&pattern_str).map_err(|e| {
            Error::Storage(StorageFailure::new(
                StorageFailureKind::StorageMissing,
                format!("invalid session pattern: {}", e),
            ))
        })?;
        Ok(entries.flatten().collect())
    }

    pub(crate) fn list_sessions(&self, main_only: bool) -> Result<Vec<SessionMetadata>> {
        self.ensure_root()?;

        let mut sessions = Vec::new();
        for path in self.session_files("*.json")? {
            let Some(value) = self.read_json(&path)? else {
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
        self.ensure_root()?;
        if !is_safe_segment(session_id) {
            return Ok(false);
        }

        let file_name = format!("{}.json", glob::Pattern::escape(session_id));
        for path in self.session_files(&file_name)? {
            if let Some(value) = self.read_json(&path)? {
                if parse_session(&value).map(|s| s.id == session_id).unwrap_or(false) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    pub(crate) fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessageMeta>> {
        self.ensure_root()?;
        if !is_safe_segment(session_id) {
            return Ok(Vec::new());
        }

        let dir = self.root.join("message").join(session_id);
        let mut messages = Vec::new();
        for path in self.json_files_in(&dir)? {
            let Some(value) = self.read_json(&path)? else {
                continue;
            };
            if let Some(message) = parse_message(&value) {
                if message.session_id == session_id {
                    messages.push(message);
                }
            }
        }

        sort_messages(&mut messages);
        messages.truncate(limit);
        Ok(messages)
    }

    pub(crate) fn tool_parts_for_messages(
        &self,
        message_ids: &[String],
    ) -> Result<Vec<StoredToolPart>> {
        self.ensure_root()?;

        let mut parts = Vec::new();
        for message_id in message_ids {
            if !is_safe_segment(message_id) {
                continue;
            }
            let dir = self.root.join("part").join(message_id);
            for path in self.json_files_in(&dir)? {
                let Some(value) = self.read_json(&path)? else {
                    continue;
                };
                if let Some(part) = parse_tool_part(&value) {
                    if &part.message_id == message_id {
                        parts.push(part);
                    }
                }
            }
        }

        sort_tool_parts(&mut parts);
        Ok(parts)
    }
}

/// Ids become path segments; anything that could traverse is refused.
fn is_safe_segment(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, value: &Value) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_string(value).unwrap()).unwrap();
    }

    fn seed(root: &Path) {
        write(
            root,
            "session/prj/ses_a.json",
            &json!({"id": "ses_a", "projectID": "prj", "directory": "/repo",
                    "time": {"created": 1, "updated": 10}}),
        );
        write(
            root,
            "session/prj/ses_b.json",
            &json!({"id": "ses_b", "projectID": "prj", "directory": "/repo", "parentID": "ses_a",
                    "time": {"created": 2, "updated": 20}}),
        );
        write(
            root,
            "message/ses_a/msg_1.json",
            &json!({"id": "msg_1", "sessionID": "ses_a", "role": "user", "time": {"created": 100}}),
        );
        write(
            root,
            "message/ses_a/msg_2.json",
            &json!({"id": "msg_2", "sessionID": "ses_a", "role": "assistant", "time": {"created": 200}}),
        );
        write(
            root,
            "message/ses_a/msg_3.json",
            &json!({"id": "msg_3", "sessionID": "ses_a", "role": "system", "time": {"created": 300}}),
        );
        write(
            root,
            "part/msg_2/prt_1.json",
            &json!({"id": "prt_1", "sessionID": "ses_a", "messageID": "msg_2", "type": "tool",
                    "callID": "c1", "tool": "bash",
                    "state": {"status": "completed", "input": {}, "time": {"start": 210}}}),
        );
        write(
            root,
            "part/msg_2/prt_0.json",
            &json!({"id": "prt_0", "sessionID": "ses_a", "messageID": "msg_2", "type": "text"}),
        );
    }

    #[test]
    fn test_list_sessions() {
        let dir = TempDir::new().unwrap();
        seed(dir.path());
        let store = FileStore::new(dir.path());

        let all = store.list_sessions(false).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "ses_b");

        let main = store.list_sessions(true).unwrap();
        assert_eq!(main.len(), 1);
        assert_eq!(main[0].id, "ses_a");
    }

    #[test]
    fn test_messages_skip_bad_roles_and_files() {
        let dir = TempDir::new().unwrap();
        seed(dir.path());
        fs::write(dir.path().join("message/ses_a/broken.json"), "{\"id\": ").unwrap();
        let store = FileStore::new(dir.path());

        let messages = store.recent_messages("ses_a", 10).unwrap();
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["msg_2", "msg_1"]);

        let capped = store.recent_messages("ses_a", 1).unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].id, "msg_2");

        assert!(store.recent_messages("ses_missing", 10).unwrap().is_empty());
    }

    #[test]
    fn test_tool_parts_only_tools() {
        let dir = TempDir::new().unwrap();
        seed(dir.path());
        let store = FileStore::new(dir.path());

        let parts = store
            .tool_parts_for_messages(&["msg_2".to_string(), "msg_1".to_string()])
            .unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].tool, "bash");
    }

    #[test]
    fn test_session_exists() {
        let dir = TempDir::new().unwrap();
        seed(dir.path());
        let store = FileStore::new(dir.path());

        assert!(store.session_exists("ses_a").unwrap());
        assert!(store.session_exists("ses_b").unwrap());
        assert!(!store.session_exists("ses_zzz").unwrap());
        assert!(!store.session_exists("../ses_a").unwrap());
    }

    #[test]
    fn test_missing_root_is_storage_failure() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("nope"));
        let err = store.list_sessions(false).unwrap_err();
        assert_eq!(
            err.storage_failure().map(|f| f.kind),
            Some(StorageFailureKind::StorageMissing)
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_record_outside_root_is_denied() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("storage");
        seed(&root);
        let outside = dir.path().join("outside");
        write(
            &outside,
            "msg_9.json",
            &json!({"id": "msg_9", "sessionID": "ses_a", "role": "user", "time": {"created": 1}}),
        );
        std::os::unix::fs::symlink(
            outside.join("msg_9.json"),
            root.join("message/ses_a/msg_9.json"),
        )
        .unwrap();

        let store = FileStore::new(&root);
        let err = store.recent_messages("ses_a", 10).unwrap_err();
        assert!(matches!(err, Error::AccessDenied { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_root_with_glob_metacharacters() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("data [v2] *?");
        seed(&root);

        let store = FileStore::new(&root);
        let sessions = store.list_sessions(false).unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(store.session_exists("ses_a").unwrap());
    }
}
