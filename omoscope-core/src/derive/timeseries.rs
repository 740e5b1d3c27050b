//! Tool-call activity histogram
//!
//! Counts tool parts into fixed-width buckets ending at the current bucket
//! boundary (`anchor`). Main-session activity is attributed to a canonical
//! agent where possible; child-session activity only feeds the totals.

use super::{SessionActivity, RECENT_MESSAGE_LIMIT};
use crate::error::Result;
use crate::storage::StorageBackend;
use crate::types::StoredMessageMeta;
use serde::Serialize;

/// Children included in the background series, most recently updated first.
pub const MAX_CHILD_SESSIONS: usize = 25;

/// Agents with their own series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalAgent {
    Sisyphus,
    Prometheus,
    Atlas,
    Other,
}

impl CanonicalAgent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalAgent::Sisyphus => "sisyphus",
            CanonicalAgent::Prometheus => "prometheus",
            CanonicalAgent::Atlas => "atlas",
            CanonicalAgent::Other => "other",
        }
    }
}

/// Map a free-text agent label onto a [`CanonicalAgent`] by prefix.
///
/// `sisyphus-junior` shares the `sisyphus` prefix and lands in the same series.
pub fn canonical_agent(label: &str) -> CanonicalAgent {
    let lower = label.trim().to_lowercase();
    if lower.starts_with("sisyphus") {
        CanonicalAgent::Sisyphus
    } else if lower.starts_with("prometheus") {
        CanonicalAgent::Prometheus
    } else if lower.starts_with("atlas") {
        CanonicalAgent::Atlas
    } else {
        CanonicalAgent::Other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSeriesOptions {
    pub window_ms: i64,
    pub bucket_ms: i64,
}

impl Default for TimeSeriesOptions {
    fn default() -> Self {
        Self {
            window_ms: 300_000,
            bucket_ms: 2_000,
        }
    }
}

impl TimeSeriesOptions {
    fn bucket_count(&self) -> usize {
        if self.bucket_ms <= 0 || self.window_ms <= 0 {
            return 0;
        }
        (self.window_ms / self.bucket_ms) as usize
    }
}

/// One line of the histogram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySeries {
    pub id: String,
    pub label: String,
    pub values: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesPayload {
    pub window_ms: i64,
    pub bucket_ms: i64,
    pub buckets: usize,
    pub anchor_ms: i64,
    pub series: Vec<ActivitySeries>,
}

impl TimeSeriesPayload {
    /// A zeroed payload, used when no session is active.
    pub fn empty(options: TimeSeriesOptions, now_ms: i64) -> Self {
        Histogram::new(options, now_ms).finish()
    }

    pub fn series(&self, id: &str) -> Option<&ActivitySeries> {
        self.series.iter().find(|s| s.id == id)
    }
}

const OVERALL: usize = 0;
const BACKGROUND: usize = 4;

const SERIES: [(&str, &str); 5] = [
    ("overall-main", "Overall"),
    ("agent:sisyphus", "Sisyphus"),
    ("agent:prometheus", "Prometheus"),
    ("agent:atlas", "Atlas"),
    ("background-total", "Background"),
];

fn agent_series(agent: CanonicalAgent) -> Option<usize> {
    match agent {
        CanonicalAgent::Sisyphus => Some(1),
        CanonicalAgent::Prometheus => Some(2),
        CanonicalAgent::Atlas => Some(3),
        CanonicalAgent::Other => None,
    }
}

struct Histogram {
    options: TimeSeriesOptions,
    anchor_ms: i64,
    start_ms: i64,
    values: [Vec<u64>; 5],
}

impl Histogram {
    fn new(options: TimeSeriesOptions, now_ms: i64) -> Self {
        let buckets = options.bucket_count();
        let anchor_ms = if options.bucket_ms > 0 {
            now_ms
                .div_euclid(options.bucket_ms)
                .saturating_mul(options.bucket_ms)
        } else {
            now_ms
        };
        let zeros = vec![0u64; buckets];
        Self {
            options,
            anchor_ms,
            start_ms: anchor_ms.saturating_sub(options.window_ms),
            values: [
                zeros.clone(),
                zeros.clone(),
                zeros.clone(),
                zeros.clone(),
                zeros,
            ],
        }
    }

    /// Messages newest first, trimmed to the window. Scanning stops at the
    /// first message older than the window start.
    fn in_window(&self, messages: Vec<StoredMessageMeta>) -> Vec<StoredMessageMeta> {
        messages
            .into_iter()
            .take_while(|m| m.created_ms >= self.start_ms)
            .filter(|m| m.created_ms < self.anchor_ms)
            .collect()
    }

    fn bucket(&self, created_ms: i64) -> Option<usize> {
        if self.options.bucket_ms <= 0 {
            return None;
        }
        let offset = created_ms.checked_sub(self.start_ms).filter(|d| *d >= 0)?;
        let index = usize::try_from(offset / self.options.bucket_ms).ok()?;
        (index < self.values[OVERALL].len()).then_some(index)
    }

    fn add(&mut self, series: &[usize], created_ms: i64, count: u64) {
        if count == 0 {
            return;
        }
        if let Some(index) = self.bucket(created_ms) {
            for &s in series {
                self.values[s][index] += count;
            }
        }
    }

    fn finish(self) -> TimeSeriesPayload {
        let buckets = self.options.bucket_count();
        let series = SERIES
            .iter()
            .zip(self.values)
            .map(|((id, label), values)| ActivitySeries {
                id: id.to_string(),
                label: label.to_string(),
                values,
            })
            .collect();
        TimeSeriesPayload {
            window_ms: self.options.window_ms,
            bucket_ms: self.options.bucket_ms,
            buckets,
            anchor_ms: self.anchor_ms,
            series,
        }
    }
}

/// Bucket tool-call activity of `main_session_id` and its recent children.
pub fn derive_time_series_activity(
    storage: &StorageBackend,
    main_session_id: &str,
    now_ms: i64,
    options: TimeSeriesOptions,
) -> Result<TimeSeriesPayload> {
    let mut histogram = Histogram::new(options, now_ms);
    if histogram.values[OVERALL].is_empty() {
        return Ok(histogram.finish());
    }

    let messages = histogram.in_window(storage.recent_messages(main_session_id, RECENT_MESSAGE_LIMIT)?);
    let activity = SessionActivity::with_parts(storage, messages)?;
    for message in &activity.messages {
        let count = activity.parts_for(&message.id).len() as u64;
        let agent = message
            .agent
            .as_deref()
            .map(canonical_agent)
            .and_then(agent_series);
        match agent {
            Some(series) => histogram.add(&[OVERALL, series], message.created_ms, count),
            None => histogram.add(&[OVERALL], message.created_ms, count),
        }
    }

    let children: Vec<String> = storage
        .list_all_sessions()?
        .into_iter()
        .filter(|s| s.parent_id.as_deref() == Some(main_session_id))
        .take(MAX_CHILD_SESSIONS)
        .map(|s| s.id)
        .collect();

    for child in &children {
        let messages = histogram.in_window(storage.recent_messages(child, RECENT_MESSAGE_LIMIT)?);
        let activity = SessionActivity::with_parts(storage, messages)?;
        for message in &activity.messages {
            let count = activity.parts_for(&message.id).len() as u64;
            histogram.add(&[OVERALL, BACKGROUND], message.created_ms, count);
        }
    }

    tracing::debug!(
        session_id = %main_session_id,
        children = children.len(),
        anchor_ms = histogram.anchor_ms,
        "Derived time series"
    );
    Ok(histogram.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::testing::Fixture;
    use serde_json::json;

    fn options(window_ms: i64, bucket_ms: i64) -> TimeSeriesOptions {
        TimeSeriesOptions {
            window_ms,
            bucket_ms,
        }
    }

    fn fixture() -> Fixture {
        let fx = Fixture::new();
        let dir = fx.dir.path().to_path_buf();
        fx.session("ses_main", &dir, None, None, 0, 0);
        fx
    }

    fn tool_message(fx: &Fixture, session: &str, id: &str, created: i64, agent: &str, tools: usize) {
        fx.message(session, id, "assistant", created, json!({"agent": agent, "completed": created}));
        for i in 0..tools {
            fx.tool(
                session,
                id,
                &format!("{}_p{}", id, i),
                "read",
                "completed",
                Some(created),
                json!({}),
            );
        }
    }

    #[test]
    fn test_canonical_agent() {
        assert_eq!(canonical_agent("Sisyphus"), CanonicalAgent::Sisyphus);
        assert_eq!(canonical_agent("sisyphus-junior"), CanonicalAgent::Sisyphus);
        assert_eq!(canonical_agent("Prometheus (Planner)"), CanonicalAgent::Prometheus);
        assert_eq!(canonical_agent("ATLAS"), CanonicalAgent::Atlas);
        assert_eq!(canonical_agent("build"), CanonicalAgent::Other);
        assert_eq!(canonical_agent(""), CanonicalAgent::Other);
    }

    #[test]
    fn test_bucket_scenario() {
        let fx = fixture();
        tool_message(&fx, "ses_main", "msg_1", 1000, "build", 1);
        tool_message(&fx, "ses_main", "msg_2", 1001, "build", 1);
        tool_message(&fx, "ses_main", "msg_3", 2500, "build", 1);

        let payload =
            derive_time_series_activity(&fx.storage(), "ses_main", 10_000, options(10_000, 2_000))
                .unwrap();
        assert_eq!(payload.buckets, 5);
        assert_eq!(payload.anchor_ms, 10_000);
        assert_eq!(payload.series("overall-main").unwrap().values, vec![2, 1, 0, 0, 0]);
        assert_eq!(payload.series("agent:sisyphus").unwrap().values, vec![0; 5]);
    }

    #[test]
    fn test_series_order_and_agent_attribution() {
        let fx = fixture();
        tool_message(&fx, "ses_main", "msg_1", 1000, "Sisyphus", 2);
        tool_message(&fx, "ses_main", "msg_2", 3000, "prometheus", 1);
        tool_message(&fx, "ses_main", "msg_3", 5000, "Atlas", 3);

        let payload =
            derive_time_series_activity(&fx.storage(), "ses_main", 10_500, options(10_000, 2_000))
                .unwrap();
        let ids: Vec<_> = payload.series.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["overall-main", "agent:sisyphus", "agent:prometheus", "agent:atlas", "background-total"]
        );
        assert_eq!(payload.series[0].values, vec![2, 1, 3, 0, 0]);
        assert_eq!(payload.series[1].values, vec![2, 0, 0, 0, 0]);
        assert_eq!(payload.series[2].values, vec![0, 1, 0, 0, 0]);
        assert_eq!(payload.series[3].values, vec![0, 0, 3, 0, 0]);
    }

    #[test]
    fn test_window_edges() {
        let fx = fixture();
        // anchor = 20000, window start = 10000
        tool_message(&fx, "ses_main", "msg_old", 9_999, "Sisyphus", 1);
        tool_message(&fx, "ses_main", "msg_first", 10_000, "Sisyphus", 1);
        tool_message(&fx, "ses_main", "msg_last", 19_999, "Sisyphus", 1);
        tool_message(&fx, "ses_main", "msg_anchor", 20_000, "Sisyphus", 1);

        let payload =
            derive_time_series_activity(&fx.storage(), "ses_main", 21_999, options(10_000, 2_000))
                .unwrap();
        assert_eq!(payload.anchor_ms, 20_000);
        assert_eq!(payload.series[0].values, vec![1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_children_feed_background_total() {
        let fx = fixture();
        let dir = fx.dir.path().to_path_buf();
        fx.session("ses_child", &dir, Some("ses_main"), Some("Background: x"), 0, 5);
        fx.session("ses_other", &dir, Some("ses_unrelated"), None, 0, 6);
        tool_message(&fx, "ses_child", "cm_1", 4000, "Sisyphus", 2);
        tool_message(&fx, "ses_other", "om_1", 4000, "Sisyphus", 7);
        tool_message(&fx, "ses_main", "msg_1", 4000, "Sisyphus", 1);

        let payload =
            derive_time_series_activity(&fx.storage(), "ses_main", 10_000, options(10_000, 2_000))
                .unwrap();
        assert_eq!(payload.series[0].values, vec![0, 0, 3, 0, 0]);
        assert_eq!(payload.series[1].values, vec![0, 0, 1, 0, 0]);
        assert_eq!(payload.series[4].values, vec![0, 0, 2, 0, 0]);
    }

    #[test]
    fn test_child_cap_keeps_most_recently_updated() {
        let fx = fixture();
        let dir = fx.dir.path().to_path_buf();
        for i in 0..MAX_CHILD_SESSIONS + 2 {
            let id = format!("ses_child_{:02}", i);
            fx.session(&id, &dir, Some("ses_main"), None, 0, 100 + i as i64);
            // The two least recently updated children carry a distinctive load.
            let tools = if i < 2 { 10 } else { 1 };
            tool_message(&fx, &id, &format!("cm_{:02}", i), 4000, "Sisyphus", tools);
        }

        let payload =
            derive_time_series_activity(&fx.storage(), "ses_main", 10_000, options(10_000, 2_000))
                .unwrap();
        let background = payload.series("background-total").unwrap();
        assert_eq!(background.values, vec![0, 0, MAX_CHILD_SESSIONS as u64, 0, 0]);
        assert_eq!(payload.series("overall-main").unwrap().values, background.values);
    }

    #[test]
    fn test_extreme_now_does_not_overflow() {
        let fx = fixture();
        tool_message(&fx, "ses_main", "msg_1", 1000, "Sisyphus", 1);

        for now in [i64::MIN, i64::MAX] {
            let payload =
                derive_time_series_activity(&fx.storage(), "ses_main", now, options(10_000, 2_000))
                    .unwrap();
            assert_eq!(payload.buckets, 5);
            assert!(payload.series[0].values.iter().all(|v| *v == 0));
        }
    }

    #[test]
    fn test_empty_payload_shape() {
        let payload = TimeSeriesPayload::empty(TimeSeriesOptions::default(), 301_234);
        assert_eq!(payload.buckets, 150);
        assert_eq!(payload.anchor_ms, 300_000);
        assert_eq!(payload.series.len(), 5);
        assert!(payload.series.iter().all(|s| s.values.iter().all(|v| *v == 0)));
    }
}
