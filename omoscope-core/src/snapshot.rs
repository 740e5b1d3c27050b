//! One-shot dashboard snapshot
//!
//! [`Dashboard::snapshot`] runs every derivation for a project and merges the
//! results into a [`DashboardSnapshot`]. A storage failure on the primary
//! backend recomputes the whole snapshot against the fallback backend, so a
//! snapshot never mixes rows from two backends.

use crate::boulder::{read_boulder_state, read_plan_progress};
use crate::config::{DashboardConfig, StorageConfig};
use crate::derive::{
    derive_background_tasks, derive_time_series_activity, derive_token_usage, derive_tool_calls,
    get_main_session_view, pick_active_session_id, BackgroundTaskRow, MainSessionView,
    TimeSeriesOptions, TimeSeriesPayload, TokenUsageAggregate, ToolCallsPayload,
};
use crate::error::{Error, Result};
use crate::storage::{select_backend, BackendKind, StorageBackend};
use crate::types::{BoulderState, PlanProgress};
use serde::Serialize;
use std::path::Path;

/// Plan summary taken from the boulder file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub name: Option<String>,
    pub path: Option<String>,
    pub started_at: Option<String>,
    pub progress: Option<PlanProgress>,
}

/// Everything the dashboard shows at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub generated_at_ms: i64,
    pub backend: BackendKind,
    pub project_root: String,
    pub plan: Option<PlanSummary>,
    pub main_session: MainSessionView,
    pub background_tasks: Vec<BackgroundTaskRow>,
    pub time_series: TimeSeriesPayload,
    pub token_usage: TokenUsageAggregate,
}

/// Backends plus derivation settings.
#[derive(Debug, Clone)]
pub struct Dashboard {
    primary: StorageBackend,
    fallback: Option<StorageBackend>,
    settings: DashboardConfig,
}

impl Dashboard {
    pub fn new(primary: StorageBackend, settings: DashboardConfig) -> Self {
        Self {
            primary,
            fallback: None,
            settings,
        }
    }

    pub fn with_fallback(mut self, fallback: StorageBackend) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Pick backends from configuration.
    ///
    /// With `prefer_sqlite`, a usable database becomes the primary backend
    /// and the files tree its fallback.
    pub fn from_config(storage: &StorageConfig, settings: DashboardConfig) -> Self {
        let storage_root = storage.storage_root();
        if !storage.prefer_sqlite {
            return Self::new(StorageBackend::files(storage_root), settings);
        }

        let primary = select_backend(&storage.sqlite_path(), &storage_root);
        match primary.kind() {
            BackendKind::Sqlite => {
                Self::new(primary, settings).with_fallback(StorageBackend::files(storage_root))
            }
            BackendKind::Files => Self::new(primary, settings),
        }
    }

    pub fn primary(&self) -> &StorageBackend {
        &self.primary
    }

    pub fn settings(&self) -> &DashboardConfig {
        &self.settings
    }

    /// Run `f` on the primary backend, retrying once on the fallback when
    /// the primary reports a storage failure.
    fn with_backends<T>(&self, mut f: impl FnMut(&StorageBackend) -> Result<T>) -> Result<T> {
        match f(&self.primary) {
            Err(Error::Storage(failure)) => match &self.fallback {
                Some(fallback) => {
                    tracing::warn!(
                        primary = %self.primary.kind(),
                        fallback = %fallback.kind(),
                        failure = %failure,
                        "Primary storage failed, using fallback"
                    );
                    f(fallback)
                }
                None => Err(Error::Storage(failure)),
            },
            other => other,
        }
    }

    /// Build a snapshot for `project_root` at `now_ms`.
    pub fn snapshot(&self, project_root: &Path, now_ms: i64) -> Result<DashboardSnapshot> {
        let boulder = read_boulder_state(project_root)?;
        let plan = boulder.as_ref().map(|b| plan_summary(project_root, b));
        let hints = boulder.map(|b| b.session_ids).unwrap_or_default();

        let mut snapshot =
            self.with_backends(|storage| self.compute(storage, project_root, &hints, now_ms))?;
        snapshot.plan = plan;
        Ok(snapshot)
    }

    /// Redacted tool calls of the active session, or `None` without one.
    pub fn tool_calls(&self, project_root: &Path) -> Result<Option<ToolCallsPayload>> {
        let hints = read_boulder_state(project_root)?
            .map(|b| b.session_ids)
            .unwrap_or_default();

        self.with_backends(|storage| {
            let Some(session_id) = pick_active_session_id(storage, project_root, &hints)? else {
                return Ok(None);
            };
            derive_tool_calls(
                storage,
                &session_id,
                self.settings.tool_call_max_messages,
                self.settings.tool_call_max_calls,
            )
            .map(Some)
        })
    }

    fn compute(
        &self,
        storage: &StorageBackend,
        project_root: &Path,
        hints: &[String],
        now_ms: i64,
    ) -> Result<DashboardSnapshot> {
        let options = TimeSeriesOptions {
            window_ms: self.settings.window_ms,
            bucket_ms: self.settings.bucket_ms,
        };
        let mut snapshot = DashboardSnapshot {
            generated_at_ms: now_ms,
            backend: storage.kind(),
            project_root: project_root.display().to_string(),
            plan: None,
            main_session: MainSessionView::empty(),
            background_tasks: Vec::new(),
            time_series: TimeSeriesPayload::empty(options, now_ms),
            token_usage: TokenUsageAggregate::empty(),
        };

        let Some(session_id) = pick_active_session_id(storage, project_root, hints)? else {
            tracing::debug!(project = %project_root.display(), "No active session");
            return Ok(snapshot);
        };

        snapshot.main_session = get_main_session_view(storage, &session_id, now_ms)?;
        snapshot.background_tasks = derive_background_tasks(storage, &session_id, now_ms)?;
        snapshot.time_series = derive_time_series_activity(storage, &session_id, now_ms, options)?;

        let children: Vec<String> = snapshot
            .background_tasks
            .iter()
            .filter_map(|row| row.session_id.clone())
            .collect();
        snapshot.token_usage = derive_token_usage(storage, &session_id, &children)?;

        Ok(snapshot)
    }
}

fn plan_summary(project_root: &Path, boulder: &BoulderState) -> PlanSummary {
    let progress = boulder.active_plan.as_deref().and_then(|plan| {
        match read_plan_progress(project_root, Path::new(plan)) {
            Ok(progress) => progress,
            Err(e) => {
                tracing::warn!(plan = %plan, error = %e, "Cannot read plan progress");
                None
            }
        }
    });

    PlanSummary {
        name: boulder.plan_name.clone(),
        path: boulder.active_plan.clone(),
        started_at: boulder.started_at.clone(),
        progress,
    }
}
