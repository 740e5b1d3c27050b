//! Plan state written by the orchestrator under `<project>/.sisyphus/`
//!
//! `boulder.json` names the active plan and the sessions working on it. Both
//! it and the plan markdown are read through a [`PathGuard`] rooted at the
//! project, so a plan path pointing outside the project is refused.

use crate::error::Result;
use crate::guard::PathGuard;
use crate::types::{BoulderState, PlanProgress};
use std::path::Path;

pub const BOULDER_FILE: &str = ".sisyphus/boulder.json";

/// Read `<project_root>/.sisyphus/boulder.json`.
///
/// A missing file is `None`. A malformed file is also `None`, with a warning.
pub fn read_boulder_state(project_root: &Path) -> Result<Option<BoulderState>> {
    let guard = PathGuard::new([project_root]);
    let path = guard.check(Path::new(BOULDER_FILE), Some(project_root))?;

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_str::<BoulderState>(&content) {
        Ok(state) => Ok(Some(state)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed boulder file");
            Ok(None)
        }
    }
}

/// Count checkboxes in the plan at `plan_path` (relative paths resolve
/// against `project_root`). A missing plan is `None`.
pub fn read_plan_progress(project_root: &Path, plan_path: &Path) -> Result<Option<PlanProgress>> {
    let guard = PathGuard::new([project_root]);
    let path = guard.check(plan_path, Some(project_root))?;

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(Some(count_checkboxes(&content))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Count `- [ ]` / `- [x]` list items (also `*` bullets, any indentation).
pub fn count_checkboxes(markdown: &str) -> PlanProgress {
    let mut completed = 0;
    let mut total = 0;
    for line in markdown.lines() {
        let line = line.trim_start();
        let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) else {
            continue;
        };
        match rest.get(..3) {
            Some("[ ]") => total += 1,
            Some("[x]") | Some("[X]") => {
                total += 1;
                completed += 1;
            }
            _ => {}
        }
    }
    PlanProgress::new(completed, total)
}
