//! Main session status derivation
//!
//! Status is decided by the first matching rule:
//!
//! 1. `running_tool` - any tool part in the recent window is pending or running
//! 2. `thinking` - the newest message is an assistant message without `completed`
//! 3. `busy` / `idle` - newest message is within / outside the freshness window
//! 4. `unknown` - there are no messages
//!
//! Rule 1 looks at the whole window, so an in-flight tool on an older
//! assistant message still reports `running_tool` after a newer user message.

use super::{SessionActivity, FRESHNESS_WINDOW_MS, RECENT_MESSAGE_LIMIT};
use crate::error::Result;
use crate::storage::StorageBackend;
use crate::types::{Role, SessionMetadata};
use serde::Serialize;

/// Live status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Busy,
    Thinking,
    RunningTool,
    Unknown,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Busy => "busy",
            SessionStatus::Thinking => "thinking",
            SessionStatus::RunningTool => "running_tool",
            SessionStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the main session is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MainSessionView {
    pub session_id: Option<String>,
    pub session_label: String,
    pub agent: String,
    pub status: SessionStatus,
    pub current_tool: Option<String>,
    pub current_model: Option<String>,
    pub last_updated: Option<i64>,
}

impl MainSessionView {
    /// View used when no session could be resolved.
    pub fn empty() -> Self {
        Self {
            session_id: None,
            session_label: "(no session)".to_string(),
            agent: "unknown".to_string(),
            status: SessionStatus::Unknown,
            current_tool: None,
            current_model: None,
            last_updated: None,
        }
    }
}

/// Derive the main session view for `session_id`.
pub fn get_main_session_view(
    storage: &StorageBackend,
    session_id: &str,
    now_ms: i64,
) -> Result<MainSessionView> {
    let meta = storage
        .list_all_sessions()?
        .into_iter()
        .find(|s| s.id == session_id);
    let activity = SessionActivity::load(storage, session_id, RECENT_MESSAGE_LIMIT)?;
    Ok(build_view(session_id, meta.as_ref(), &activity, now_ms))
}

pub(crate) fn build_view(
    session_id: &str,
    meta: Option<&SessionMetadata>,
    activity: &SessionActivity,
    now_ms: i64,
) -> MainSessionView {
    let newest = activity.messages.first();
    let (status, current_tool) = derive_status(activity, now_ms);

    let current_model = activity.messages.iter().find_map(|m| m.model_key());

    MainSessionView {
        session_id: Some(session_id.to_string()),
        session_label: meta
            .map(|m| m.label().to_string())
            .unwrap_or_else(|| session_id.to_string()),
        agent: newest
            .and_then(|m| m.agent.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        status,
        current_tool,
        current_model,
        last_updated: newest.map(|m| m.created_ms),
    }
}

fn derive_status(activity: &SessionActivity, now_ms: i64) -> (SessionStatus, Option<String>) {
    // Newest message first, and within a message the latest part first.
    for message in &activity.messages {
        if let Some(part) = activity
            .parts_for(&message.id)
            .iter()
            .rev()
            .find(|p| p.status.is_in_flight())
        {
            return (SessionStatus::RunningTool, Some(part.tool.clone()));
        }
    }

    let Some(newest) = activity.messages.first() else {
        return (SessionStatus::Unknown, None);
    };

    if newest.role == Role::Assistant && newest.completed_ms.is_none() {
        return (SessionStatus::Thinking, None);
    }

    if now_ms.saturating_sub(newest.created_ms) <= FRESHNESS_WINDOW_MS {
        (SessionStatus::Busy, None)
    } else {
        (SessionStatus::Idle, None)
    }
}
