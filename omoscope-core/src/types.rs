//! Core domain types for omoscope
//!
//! Stored records mirror what the OpenCode runtime writes to disk. They are
//! produced only by the validators in [`crate::storage::validate`] and are
//! never written back.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | One agent conversation thread; a session with a parent is a sub-session |
//! | **Message** | One turn within a session, authored by `user` or `assistant` |
//! | **Tool part** | A single tool invocation attached to a message |
//! | **Background task** | A delegation call whose spawned child session is correlated heuristically |
//! | **Canonical agent** | One of sisyphus, prometheus, atlas or other |
//!
//! All timestamps are milliseconds since the Unix epoch.

use serde::{Deserialize, Serialize};

// ============================================
// Sessions
// ============================================

/// Metadata for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMetadata {
    pub id: String,
    pub project_id: String,
    /// Working directory the session was started in
    pub directory: String,
    pub title: Option<String>,
    /// Set when this session was spawned by a delegation tool call
    pub parent_id: Option<String>,
    pub created_ms: i64,
    pub updated_ms: i64,
}

impl SessionMetadata {
    /// Title when present, otherwise the id.
    pub fn label(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.id)
    }

    pub fn is_main(&self) -> bool {
        self.parent_id.is_none()
    }
}

// ============================================
// Messages
// ============================================

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    /// Only the exact lowercase spellings are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// Token counters attached to an assistant message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

impl TokenCounts {
    pub fn total(&self) -> u64 {
        self.input + self.output + self.reasoning + self.cache_read + self.cache_write
    }
}

/// Metadata for one message; message text is never loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessageMeta {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub created_ms: i64,
    /// Absent while the message is still streaming
    pub completed_ms: Option<i64>,
    pub agent: Option<String>,
    pub provider_id: Option<String>,
    pub model_id: Option<String>,
    pub tokens: Option<TokenCounts>,
}

impl StoredMessageMeta {
    /// `"{provider}/{model}"` when both halves are known.
    pub fn model_key(&self) -> Option<String> {
        match (&self.provider_id, &self.model_id) {
            (Some(provider), Some(model)) => Some(format!("{}/{}", provider, model)),
            _ => None,
        }
    }
}

// ============================================
// Tool parts
// ============================================

/// Lifecycle status of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Pending => "pending",
            ToolStatus::Running => "running",
            ToolStatus::Completed => "completed",
            ToolStatus::Error => "error",
        }
    }

    /// Pending or running.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ToolStatus::Pending | ToolStatus::Running)
    }
}

impl std::str::FromStr for ToolStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ToolStatus::Pending),
            "running" => Ok(ToolStatus::Running),
            "completed" => Ok(ToolStatus::Completed),
            "error" => Ok(ToolStatus::Error),
            _ => Err(format!("unknown tool status: {}", s)),
        }
    }
}

/// The delegation-related subset of a tool call's input.
///
/// Everything else in the input object is discarded during validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegationArgs {
    /// `None` when the field is missing or not a boolean
    pub run_in_background: Option<bool>,
    pub description: Option<String>,
    pub subagent_type: Option<String>,
    pub category: Option<String>,
    /// Session id a synchronous call resumes
    pub resume: Option<String>,
}

/// One tool invocation attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredToolPart {
    pub id: String,
    pub session_id: String,
    pub message_id: String,
    pub call_id: String,
    pub tool: String,
    pub status: ToolStatus,
    pub delegation: DelegationArgs,
    pub started_ms: Option<i64>,
}

impl StoredToolPart {
    /// Sort key used by both backends: start time, or 0 when unknown.
    pub fn created_key(&self) -> i64 {
        self.started_ms.unwrap_or(0)
    }
}

// ============================================
// Boulder / plan state
// ============================================

/// Contents of `.sisyphus/boulder.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoulderState {
    #[serde(default)]
    pub active_plan: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    /// Candidate session ids, most recent intent last
    #[serde(default)]
    pub session_ids: Vec<String>,
    #[serde(default)]
    pub plan_name: Option<String>,
}

/// Checkbox progress of a plan file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanProgress {
    pub completed: usize,
    pub total: usize,
    pub is_complete: bool,
}

impl PlanProgress {
    pub fn new(completed: usize, total: usize) -> Self {
        Self {
            completed,
            total,
            is_complete: total == 0 || completed == total,
        }
    }
}
