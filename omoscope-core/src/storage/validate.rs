//! Explicit shape checks for raw records
//!
//! Each validator takes an untrusted JSON value and returns either a fully
//! typed record or `None`. Rejected records are dropped by the callers; they
//! are never reported as errors. Fields are checked one by one rather than
//! through `serde` derives so that acceptance rules stay exact (for example a
//! role of `"User"` is rejected, not normalized).

use crate::types::{
    DelegationArgs, Role, SessionMetadata, StoredMessageMeta, StoredToolPart, TokenCounts,
    ToolStatus,
};
use serde_json::Value;

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn opt_string(value: &Value, key: &str) -> Option<String> {
    non_empty_str(value, key).map(str::to_string)
}

/// Largest accepted epoch-millisecond magnitude (the ECMAScript `Date` range).
pub const MAX_EPOCH_MS: i64 = 8_640_000_000_000_000;

fn as_millis(value: &Value) -> Option<i64> {
    let millis = match value.as_i64() {
        Some(ms) => ms,
        None => {
            let f = value.as_f64().filter(|f| f.is_finite())?.trunc();
            if f.abs() > MAX_EPOCH_MS as f64 {
                return None;
            }
            f as i64
        }
    };
    (millis.checked_abs()? <= MAX_EPOCH_MS).then_some(millis)
}

fn time_field(value: &Value, key: &str) -> Option<i64> {
    value.get("time").and_then(|t| t.get(key)).and_then(as_millis)
}

fn counter(value: Option<&Value>) -> u64 {
    value
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().filter(|f| *f > 0.0).map(|f| f as u64)))
        .unwrap_or(0)
}

/// Validate a session record.
pub fn parse_session(value: &Value) -> Option<SessionMetadata> {
    let id = non_empty_str(value, "id")?;
    let project_id = non_empty_str(value, "projectID")?;
    let directory = non_empty_str(value, "directory")?;
    let created_ms = time_field(value, "created")?;
    let updated_ms = time_field(value, "updated").unwrap_or(created_ms);

    Some(SessionMetadata {
        id: id.to_string(),
        project_id: project_id.to_string(),
        directory: directory.to_string(),
        title: value
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string),
        parent_id: opt_string(value, "parentID"),
        created_ms,
        updated_ms,
    })
}

/// Validate a message record. Only `user` and `assistant` roles survive.
pub fn parse_message(value: &Value) -> Option<StoredMessageMeta> {
    let id = non_empty_str(value, "id")?;
    let session_id = non_empty_str(value, "sessionID")?;
    let role: Role = value.get("role")?.as_str()?.parse().ok()?;
    let created_ms = time_field(value, "created")?;

    // Assistant messages carry the pair at top level, user messages under `model`.
    let nested = value.get("model");
    let provider_id = opt_string(value, "providerID")
        .or_else(|| nested.and_then(|m| opt_string(m, "providerID")));
    let model_id =
        opt_string(value, "modelID").or_else(|| nested.and_then(|m| opt_string(m, "modelID")));

    let tokens = value.get("tokens").filter(|t| t.is_object()).map(|t| {
        let cache = t.get("cache");
        TokenCounts {
            input: counter(t.get("input")),
            output: counter(t.get("output")),
            reasoning: counter(t.get("reasoning")),
            cache_read: counter(cache.and_then(|c| c.get("read"))),
            cache_write: counter(cache.and_then(|c| c.get("write"))),
        }
    });

    Some(StoredMessageMeta {
        id: id.to_string(),
        session_id: session_id.to_string(),
        role,
        created_ms,
        completed_ms: time_field(value, "completed"),
        agent: opt_string(value, "agent").or_else(|| opt_string(value, "mode")),
        provider_id,
        model_id,
        tokens,
    })
}

/// Validate a tool part record.
///
/// Non-tool parts (text, reasoning, step markers) are rejected here too.
pub fn parse_tool_part(value: &Value) -> Option<StoredToolPart> {
    if value.get("type").and_then(Value::as_str) != Some("tool") {
        return None;
    }
    let id = non_empty_str(value, "id")?;
    let session_id = non_empty_str(value, "sessionID")?;
    let message_id = non_empty_str(value, "messageID")?;
    let call_id = non_empty_str(value, "callID")?;
    let tool = non_empty_str(value, "tool")?;

    let state = value.get("state")?;
    let status: ToolStatus = state.get("status")?.as_str()?.parse().ok()?;
    let input = state.get("input").filter(|i| i.is_object())?;

    let delegation = DelegationArgs {
        run_in_background: input.get("run_in_background").and_then(Value::as_bool),
        description: input
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        subagent_type: input
            .get("subagent_type")
            .and_then(Value::as_str)
            .map(str::to_string),
        category: input
            .get("category")
            .and_then(Value::as_str)
            .map(str::to_string),
        resume: opt_string(input, "resume"),
    };

    Some(StoredToolPart {
        id: id.to_string(),
        session_id: session_id.to_string(),
        message_id: message_id.to_string(),
        call_id: call_id.to_string(),
        tool: tool.to_string(),
        status,
        delegation,
        started_ms: time_field(state, "start"),
    })
}
