//! Background task derivation
//!
//! Delegation tool calls (`delegate_task` / `task`) in the main session spawn
//! child sessions, but nothing on disk links a call to its child directly.
//! The link is recovered heuristically from the child's creation time and
//! title, and the child's own messages then supply the row's statistics.
//!
//! The heuristic can attribute a call to the wrong sibling when two
//! delegations share a description inside the time window and carry no
//! subagent type. The tie-break order below is the contract; do not try to
//! be smarter than it.

use super::{SessionActivity, FRESHNESS_WINDOW_MS, RECENT_MESSAGE_LIMIT};
use crate::error::Result;
use crate::format::format_timeline;
use crate::storage::StorageBackend;
use crate::types::{SessionMetadata, StoredMessageMeta, StoredToolPart};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Tools whose calls spawn sub-agent sessions.
const DELEGATION_TOOLS: [&str; 2] = ["delegate_task", "task"];

/// Rows returned per call, newest first.
pub const MAX_BACKGROUND_ROWS: usize = 50;

const MAX_DESCRIPTION_CHARS: usize = 120;
const MAX_LABEL_CHARS: usize = 30;

/// Children created this long before the call still match (clock skew).
const WINDOW_BEFORE_MS: i64 = 10_000;
/// Children created up to this long after the call match.
const WINDOW_AFTER_MS: i64 = 15 * 60_000;

/// Status of one background task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundStatus {
    /// No child session found yet
    Queued,
    Running,
    Completed,
    Unknown,
}

impl BackgroundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackgroundStatus::Queued => "queued",
            BackgroundStatus::Running => "running",
            BackgroundStatus::Completed => "completed",
            BackgroundStatus::Unknown => "unknown",
        }
    }
}

/// One delegated task and what its child session has done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundTaskRow {
    /// Call id of the delegation tool part
    pub id: String,
    pub description: String,
    pub agent: String,
    pub status: BackgroundStatus,
    pub tool_calls: Option<u64>,
    pub last_tool: Option<String>,
    pub timeline: String,
    pub session_id: Option<String>,
}

/// Title preference order for exact matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TitleOrder {
    BackgroundFirst,
    TaskFirst,
}

/// Fields pulled out of a delegation call.
struct Delegation<'a> {
    part: &'a StoredToolPart,
    run_in_background: bool,
    description: String,
    subagent_type: Option<String>,
    category: Option<String>,
    started_at: i64,
}

impl<'a> Delegation<'a> {
    fn extract(part: &'a StoredToolPart, message: &StoredMessageMeta) -> Option<Self> {
        if !DELEGATION_TOOLS.contains(&part.tool.as_str()) {
            return None;
        }
        let args = &part.delegation;
        let run_in_background = args.run_in_background?;
        let description = clip(args.description.as_deref().unwrap_or(""), MAX_DESCRIPTION_CHARS);
        if description.is_empty() {
            return None;
        }

        Some(Self {
            part,
            run_in_background,
            description,
            subagent_type: clip_opt(args.subagent_type.as_deref(), MAX_LABEL_CHARS),
            category: clip_opt(args.category.as_deref(), MAX_LABEL_CHARS),
            started_at: part.started_ms.unwrap_or(message.created_ms),
        })
    }

    fn agent(&self) -> String {
        self.subagent_type
            .clone()
            .or_else(|| self.category.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn clip(value: &str, max_chars: usize) -> String {
    value.trim().chars().take(max_chars).collect()
}

fn clip_opt(value: Option<&str>, max_chars: usize) -> Option<String> {
    value.map(|v| clip(v, max_chars)).filter(|v| !v.is_empty())
}

/// Aggregate activity of one child session.
#[derive(Debug, Clone, Default)]
struct ChildStats {
    tool_calls: u64,
    last_tool: Option<String>,
    last_update_at: Option<i64>,
}

/// Per-call memo; rebuilt on every [`derive_background_tasks`] call.
struct ChildCache<'a> {
    storage: &'a StorageBackend,
    stats: HashMap<String, ChildStats>,
    has_messages: HashMap<String, bool>,
}

impl<'a> ChildCache<'a> {
    fn new(storage: &'a StorageBackend) -> Self {
        Self {
            storage,
            stats: HashMap::new(),
            has_messages: HashMap::new(),
        }
    }

    fn has_messages(&mut self, session_id: &str) -> Result<bool> {
        if let Some(known) = self.has_messages.get(session_id) {
            return Ok(*known);
        }
        let found = !self.storage.recent_messages(session_id, 1)?.is_empty();
        self.has_messages.insert(session_id.to_string(), found);
        Ok(found)
    }

    fn stats(&mut self, session_id: &str) -> Result<ChildStats> {
        if let Some(stats) = self.stats.get(session_id) {
            return Ok(stats.clone());
        }

        let activity = SessionActivity::load(self.storage, session_id, RECENT_MESSAGE_LIMIT)?;
        let mut stats = ChildStats::default();
        // Oldest to newest so `last_tool` ends on the most recent call.
        for message in activity.messages.iter().rev() {
            for part in activity.parts_for(&message.id) {
                stats.tool_calls += 1;
                stats.last_tool = Some(part.tool.clone());
            }
            stats.last_update_at = Some(
                stats
                    .last_update_at
                    .map_or(message.created_ms, |t| t.max(message.created_ms)),
            );
        }

        self.has_messages
            .insert(session_id.to_string(), !activity.messages.is_empty());
        self.stats.insert(session_id.to_string(), stats.clone());
        Ok(stats)
    }
}

/// Derive background task rows for `main_session_id`.
pub fn derive_background_tasks(
    storage: &StorageBackend,
    main_session_id: &str,
    now_ms: i64,
) -> Result<Vec<BackgroundTaskRow>> {
    let activity = SessionActivity::load(storage, main_session_id, RECENT_MESSAGE_LIMIT)?;

    let delegations: Vec<Delegation> = activity
        .messages
        .iter()
        .flat_map(|message| {
            activity
                .parts_for(&message.id)
                .iter()
                .rev()
                .filter_map(move |part| Delegation::extract(part, message))
        })
        .take(MAX_BACKGROUND_ROWS)
        .collect();

    if delegations.is_empty() {
        return Ok(Vec::new());
    }

    let children: Vec<SessionMetadata> = storage
        .list_all_sessions()?
        .into_iter()
        .filter(|s| s.parent_id.as_deref() == Some(main_session_id))
        .collect();

    let mut cache = ChildCache::new(storage);
    let mut rows = Vec::with_capacity(delegations.len());
    for delegation in &delegations {
        let child = resolve_child(&mut cache, &children, delegation)?;
        rows.push(build_row(&mut cache, delegation, child, now_ms)?);
    }

    tracing::debug!(
        session_id = %main_session_id,
        rows = rows.len(),
        children = children.len(),
        "Derived background tasks"
    );
    Ok(rows)
}

fn resolve_child(
    cache: &mut ChildCache,
    children: &[SessionMetadata],
    delegation: &Delegation,
) -> Result<Option<String>> {
    let subagent = delegation.subagent_type.as_deref();

    if delegation.run_in_background {
        return Ok(correlate(
            children,
            delegation.started_at,
            &delegation.description,
            subagent,
            TitleOrder::BackgroundFirst,
        ));
    }

    if let Some(resume) = delegation.part.delegation.resume.as_deref() {
        if cache.has_messages(resume)? {
            return Ok(Some(resume.to_string()));
        }
    }

    let first = correlate(
        children,
        delegation.started_at,
        &delegation.description,
        subagent,
        TitleOrder::BackgroundFirst,
    );
    if first.is_some() {
        return Ok(first);
    }
    Ok(correlate(
        children,
        delegation.started_at,
        &delegation.description,
        subagent,
        TitleOrder::TaskFirst,
    ))
}

fn title_candidates(description: &str, subagent: Option<&str>, order: TitleOrder) -> Vec<String> {
    let background = format!("Background: {}", description);
    let task = format!("Task: {}", description);
    let subagent_title = subagent.map(|s| format!("{} (@{} subagent)", description, s));

    let (first, last) = match order {
        TitleOrder::BackgroundFirst => (background, task),
        TitleOrder::TaskFirst => (task, background),
    };
    let mut titles = vec![first];
    titles.extend(subagent_title);
    titles.push(last);
    titles
}

/// Closest creation time, then newest, then largest id.
fn tie_break(a: &SessionMetadata, b: &SessionMetadata, started_at: i64) -> Ordering {
    let da = a.created_ms.abs_diff(started_at);
    let db = b.created_ms.abs_diff(started_at);
    da.cmp(&db)
        .then_with(|| b.created_ms.cmp(&a.created_ms))
        .then_with(|| b.id.cmp(&a.id))
}

fn best<'a>(
    candidates: impl Iterator<Item = &'a SessionMetadata>,
    started_at: i64,
) -> Option<&'a SessionMetadata> {
    candidates.min_by(|a, b| tie_break(a, b, started_at))
}

fn correlate(
    children: &[SessionMetadata],
    started_at: i64,
    description: &str,
    subagent: Option<&str>,
    order: TitleOrder,
) -> Option<String> {
    let lower = started_at.saturating_sub(WINDOW_BEFORE_MS);
    let upper = started_at.saturating_add(WINDOW_AFTER_MS);
    let in_window: Vec<&SessionMetadata> = children
        .iter()
        .filter(|s| s.created_ms >= lower && s.created_ms <= upper)
        .collect();
    if in_window.is_empty() {
        return None;
    }

    for title in title_candidates(description, subagent, order) {
        let exact = in_window
            .iter()
            .copied()
            .filter(|s| s.title.as_deref() == Some(title.as_str()));
        if let Some(found) = best(exact, started_at) {
            return Some(found.id.clone());
        }
    }

    let mention = subagent.map(|s| format!("@{}", s));
    let prefixed = in_window.iter().copied().filter(|s| {
        let title = s.title.as_deref().unwrap_or("");
        title.starts_with(description)
            && mention.as_deref().map_or(true, |m| title.contains(m))
    });
    if let Some(found) = best(prefixed, started_at) {
        return Some(found.id.clone());
    }

    best(in_window.iter().copied(), started_at).map(|s| s.id.clone())
}

fn build_row(
    cache: &mut ChildCache,
    delegation: &Delegation,
    child: Option<String>,
    now_ms: i64,
) -> Result<BackgroundTaskRow> {
    let Some(child_id) = child else {
        return Ok(BackgroundTaskRow {
            id: delegation.part.call_id.clone(),
            description: delegation.description.clone(),
            agent: delegation.agent(),
            status: BackgroundStatus::Queued,
            tool_calls: None,
            last_tool: None,
            timeline: format_timeline(delegation.started_at, now_ms),
            session_id: None,
        });
    };

    let stats = cache.stats(&child_id)?;
    let status = match stats.last_update_at {
        Some(last) if now_ms.saturating_sub(last) <= FRESHNESS_WINDOW_MS => BackgroundStatus::Running,
        _ if stats.tool_calls > 0 => BackgroundStatus::Completed,
        _ => BackgroundStatus::Unknown,
    };
    let end = match (status, stats.last_update_at) {
        (BackgroundStatus::Completed, Some(last)) => last,
        _ => now_ms,
    };

    Ok(BackgroundTaskRow {
        id: delegation.part.call_id.clone(),
        description: delegation.description.clone(),
        agent: delegation.agent(),
        status,
        tool_calls: Some(stats.tool_calls),
        last_tool: stats.last_tool,
        timeline: format_timeline(delegation.started_at, end),
        session_id: Some(child_id),
    })
}
