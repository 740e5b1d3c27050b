//! Redacted tool-call listing for one session

use super::SessionActivity;
use crate::error::Result;
use crate::storage::StorageBackend;
use crate::types::ToolStatus;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRow {
    pub session_id: String,
    pub message_id: String,
    pub call_id: String,
    pub tool: String,
    pub status: ToolStatus,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallsPayload {
    pub session_id: String,
    pub calls: Vec<ToolCallRow>,
    /// Set when either cap cut the listing short
    pub truncated: bool,
}

/// List tool calls of `session_id`, newest message first.
///
/// At most `max_messages` messages are scanned and at most `max_calls` rows
/// returned.
pub fn derive_tool_calls(
    storage: &StorageBackend,
    session_id: &str,
    max_messages: usize,
    max_calls: usize,
) -> Result<ToolCallsPayload> {
    // One extra message tells us whether the cap was hit.
    let mut messages = storage.recent_messages(session_id, max_messages.saturating_add(1))?;
    let mut truncated = messages.len() > max_messages;
    messages.truncate(max_messages);

    let activity = SessionActivity::with_parts(storage, messages)?;
    let mut calls = Vec::new();
    'messages: for message in &activity.messages {
        for part in activity.parts_for(&message.id) {
            if calls.len() == max_calls {
                truncated = true;
                break 'messages;
            }
            calls.push(ToolCallRow {
                session_id: part.session_id.clone(),
                message_id: part.message_id.clone(),
                call_id: part.call_id.clone(),
                tool: part.tool.clone(),
                status: part.status,
                created_at_ms: part.started_ms.unwrap_or(message.created_ms),
            });
        }
    }

    Ok(ToolCallsPayload {
        session_id: session_id.to_string(),
        calls,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::testing::{assert_redacted, Fixture};
    use serde_json::json;

    fn fixture() -> Fixture {
        let fx = Fixture::new();
        fx.message("ses_main", "msg_1", "assistant", 1000, json!({"completed": 1500}));
        fx.tool("ses_main", "msg_1", "prt_a", "read", "completed", Some(1100), json!({"filePath": "/etc/passwd"}));
        fx.tool("ses_main", "msg_1", "prt_b", "bash", "error", None, json!({"command": "rm -rf /"}));
        fx.message("ses_main", "msg_2", "assistant", 2000, json!({}));
        fx.tool("ses_main", "msg_2", "prt_c", "edit", "running", Some(2100), json!({}));
        fx
    }

    #[test]
    fn test_rows_and_order() {
        let fx = fixture();
        let payload = derive_tool_calls(&fx.storage(), "ses_main", 10, 10).unwrap();
        assert!(!payload.truncated);

        let ids: Vec<_> = payload.calls.iter().map(|c| c.call_id.as_str()).collect();
        // prt_b has no start time so it sorts before prt_a within msg_1.
        assert_eq!(ids, vec!["call_prt_c", "call_prt_b", "call_prt_a"]);
        assert_eq!(payload.calls[1].created_at_ms, 1000);
        assert_eq!(payload.calls[1].status, ToolStatus::Error);
        assert_eq!(payload.calls[2].created_at_ms, 1100);

        let value = serde_json::to_value(&payload).unwrap();
        assert_redacted(&value);
        assert!(!value.to_string().contains("passwd"));
    }

    #[test]
    fn test_message_cap_truncates() {
        let fx = fixture();
        let payload = derive_tool_calls(&fx.storage(), "ses_main", 1, 10).unwrap();
        assert!(payload.truncated);
        assert_eq!(payload.calls.len(), 1);
        assert_eq!(payload.calls[0].tool, "edit");
    }

    #[test]
    fn test_call_cap_truncates() {
        let fx = fixture();
        let payload = derive_tool_calls(&fx.storage(), "ses_main", 10, 2).unwrap();
        assert!(payload.truncated);
        assert_eq!(payload.calls.len(), 2);

        let exact = derive_tool_calls(&fx.storage(), "ses_main", 10, 3).unwrap();
        assert!(!exact.truncated);
    }
}
