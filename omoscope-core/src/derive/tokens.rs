//! Token usage per provider/model

use crate::error::Result;
use crate::storage::StorageBackend;
use crate::types::{Role, TokenCounts};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Messages read per session.
pub const TOKEN_MESSAGE_LIMIT: usize = 10_000;

/// Summed counters for one `provider/model` key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsageRow {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsageRow {
    fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    fn add(&mut self, tokens: &TokenCounts) {
        self.input_tokens += tokens.input;
        self.output_tokens += tokens.output;
        self.reasoning_tokens += tokens.reasoning;
        self.cache_read_tokens += tokens.cache_read;
        self.cache_write_tokens += tokens.cache_write;
        self.total_tokens += tokens.total();
    }

    fn merge(&mut self, other: &TokenUsageRow) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsageAggregate {
    /// Sorted by model key
    pub rows: Vec<TokenUsageRow>,
    /// Sum over all rows, `model` is `"total"`
    pub totals: TokenUsageRow,
}

impl TokenUsageAggregate {
    pub fn empty() -> Self {
        Self {
            rows: Vec::new(),
            totals: TokenUsageRow::new("total"),
        }
    }
}

/// Sum assistant token counters of the main session and the given
/// background sessions, grouped by `provider/model`.
pub fn derive_token_usage(
    storage: &StorageBackend,
    main_session_id: &str,
    background_session_ids: &[String],
) -> Result<TokenUsageAggregate> {
    let mut seen = HashSet::new();
    let sessions = std::iter::once(main_session_id)
        .chain(background_session_ids.iter().map(String::as_str))
        .filter(|id| !id.is_empty() && seen.insert(*id));

    let mut by_model: BTreeMap<String, TokenUsageRow> = BTreeMap::new();
    for session_id in sessions {
        for message in storage.recent_messages(session_id, TOKEN_MESSAGE_LIMIT)? {
            if message.role != Role::Assistant {
                continue;
            }
            let (Some(key), Some(tokens)) = (message.model_key(), message.tokens.as_ref()) else {
                continue;
            };
            by_model
                .entry(key.clone())
                .or_insert_with(|| TokenUsageRow::new(key))
                .add(tokens);
        }
    }

    let mut aggregate = TokenUsageAggregate::empty();
    for row in by_model.into_values() {
        aggregate.totals.merge(&row);
        aggregate.rows.push(row);
    }
    Ok(aggregate)
}
