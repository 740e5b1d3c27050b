//! Derivation engine
//!
//! Pure functions from stored records (plus an injected `now`) to the views a
//! dashboard renders. Every function takes a [`StorageBackend`] and behaves
//! identically for the files and SQLite variants.
//!
//! | Function | Produces |
//! |----------|----------|
//! | [`pick_active_session_id`] | The session to display for a project |
//! | [`get_main_session_view`] | Live status, current tool and model |
//! | [`derive_background_tasks`] | Delegated sub-agent rows |
//! | [`derive_time_series_activity`] | Bucketed tool-call counts per agent |
//! | [`derive_token_usage`] | Token sums per provider/model |
//! | [`derive_tool_calls`] | Redacted per-call rows |
//!
//! No derived value carries tool inputs, outputs, errors or prompt text.

pub mod background;
pub mod main_view;
pub mod session;
pub mod timeseries;
pub mod tokens;
pub mod tool_calls;

pub use background::{derive_background_tasks, BackgroundStatus, BackgroundTaskRow};
pub use main_view::{get_main_session_view, MainSessionView, SessionStatus};
pub use session::pick_active_session_id;
pub use timeseries::{
    canonical_agent, derive_time_series_activity, ActivitySeries, CanonicalAgent,
    TimeSeriesOptions, TimeSeriesPayload,
};
pub use tokens::{derive_token_usage, TokenUsageAggregate, TokenUsageRow};
pub use tool_calls::{derive_tool_calls, ToolCallRow, ToolCallsPayload};

use crate::error::Result;
use crate::storage::StorageBackend;
use crate::types::{StoredMessageMeta, StoredToolPart};
use std::collections::HashMap;

/// Messages read per session for status and background derivations.
pub const RECENT_MESSAGE_LIMIT: usize = 200;

/// Activity younger than this counts as "now".
pub const FRESHNESS_WINDOW_MS: i64 = 15_000;

/// A session's newest messages together with their tool parts.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionActivity {
    /// Newest first
    pub messages: Vec<StoredMessageMeta>,
    /// Keyed by message id, each list in storage order (oldest first)
    parts: HashMap<String, Vec<StoredToolPart>>,
}

impl SessionActivity {
    pub fn load(storage: &StorageBackend, session_id: &str, limit: usize) -> Result<Self> {
        let messages = storage.recent_messages(session_id, limit)?;
        Self::with_parts(storage, messages)
    }

    /// Attach tool parts to an already loaded message list.
    pub fn with_parts(storage: &StorageBackend, messages: Vec<StoredMessageMeta>) -> Result<Self> {
        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
        let mut parts: HashMap<String, Vec<StoredToolPart>> = HashMap::new();
        for part in storage.tool_parts_for_messages(&ids)? {
            parts.entry(part.message_id.clone()).or_default().push(part);
        }
        Ok(Self { messages, parts })
    }

    pub fn parts_for(&self, message_id: &str) -> &[StoredToolPart] {
        self.parts
            .get(message_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
