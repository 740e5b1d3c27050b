//! Active session resolution

use crate::error::Result;
use crate::storage::StorageBackend;
use std::path::Path;

/// Pick the session to display for `project_root`.
///
/// Hint ids (from the boulder file) are tried last to first, so the most
/// recently declared intent wins; ids that no longer exist are skipped. With
/// no usable hint, the most recently updated top-level session whose
/// directory is `project_root` is returned.
pub fn pick_active_session_id(
    storage: &StorageBackend,
    project_root: &Path,
    boulder_session_ids: &[String],
) -> Result<Option<String>> {
    for id in boulder_session_ids.iter().rev() {
        if id.is_empty() {
            continue;
        }
        if storage.session_exists(id)? {
            tracing::debug!(session_id = %id, "Active session from boulder hint");
            return Ok(Some(id.clone()));
        }
        tracing::debug!(session_id = %id, "Boulder hint names a missing session");
    }

    let fallback = storage
        .list_main_sessions(Some(project_root))?
        .into_iter()
        .next()
        .map(|s| s.id);
    Ok(fallback)
}
