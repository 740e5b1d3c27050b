//! Plain-text rendering of snapshots and tool-call listings

use omoscope_core::derive::{ActivitySeries, BackgroundTaskRow, ToolCallsPayload};
use omoscope_core::format::{format_iso_seconds, format_relative_time_opt};
use omoscope_core::DashboardSnapshot;
use std::fmt::Write;

const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
const SPARK_WIDTH: usize = 60;

/// Truncate to `max` characters, marking the cut with an ellipsis.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

/// Compress a series into at most [`SPARK_WIDTH`] columns.
fn sparkline(values: &[u64]) -> String {
    if values.is_empty() {
        return String::new();
    }
    let per_column = (values.len() + SPARK_WIDTH - 1) / SPARK_WIDTH;
    let columns: Vec<u64> = values.chunks(per_column).map(|c| c.iter().sum()).collect();
    let max = columns.iter().copied().max().unwrap_or(0);

    columns
        .iter()
        .map(|&v| {
            if v == 0 || max == 0 {
                ' '
            } else {
                let level = ((v * (SPARK_LEVELS.len() as u64 - 1)) / max) as usize;
                SPARK_LEVELS[level]
            }
        })
        .collect()
}

fn series_line(out: &mut String, series: &ActivitySeries) {
    let total: u64 = series.values.iter().sum();
    let _ = writeln!(
        out,
        "  {:<12} {:>5}  |{}|",
        series.label,
        total,
        sparkline(&series.values)
    );
}

fn task_line(out: &mut String, row: &BackgroundTaskRow) {
    let calls = row
        .tool_calls
        .map(|n| n.to_string())
        .unwrap_or_else(|| "-".to_string());
    let _ = writeln!(
        out,
        "  {:<10} {:<14} {:>5}  {:<12} {}  {}",
        row.status.as_str(),
        truncate(&row.agent, 14),
        calls,
        truncate(row.last_tool.as_deref().unwrap_or("-"), 12),
        row.timeline,
        truncate(&row.description, 60),
    );
}

/// Render a full snapshot.
pub fn snapshot(snapshot: &DashboardSnapshot) -> String {
    let mut out = String::new();
    let main = &snapshot.main_session;
    let now = snapshot.generated_at_ms;

    let _ = writeln!(
        out,
        "omoscope  {}  [{}]",
        format_iso_seconds(now),
        snapshot.backend
    );
    let _ = writeln!(out, "Project:  {}", snapshot.project_root);

    if let Some(plan) = &snapshot.plan {
        let name = plan
            .name
            .as_deref()
            .or(plan.path.as_deref())
            .unwrap_or("(unnamed plan)");
        match &plan.progress {
            Some(p) => {
                let _ = writeln!(out, "Plan:     {} ({}/{} done)", name, p.completed, p.total);
            }
            None => {
                let _ = writeln!(out, "Plan:     {}", name);
            }
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Session:  {}", main.session_label);
    let _ = writeln!(out, "Agent:    {}", main.agent);
    match &main.current_tool {
        Some(tool) => {
            let _ = writeln!(out, "Status:   {} ({})", main.status, tool);
        }
        None => {
            let _ = writeln!(out, "Status:   {}", main.status);
        }
    }
    let _ = writeln!(
        out,
        "Model:    {}",
        main.current_model.as_deref().unwrap_or("-")
    );
    let _ = writeln!(
        out,
        "Updated:  {}",
        format_relative_time_opt(main.last_updated, now)
    );

    let _ = writeln!(out);
    let _ = writeln!(out, "Background tasks ({}):", snapshot.background_tasks.len());
    if snapshot.background_tasks.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for row in &snapshot.background_tasks {
        task_line(&mut out, row);
    }

    let ts = &snapshot.time_series;
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Tool activity (last {}s, {}s buckets):",
        ts.window_ms / 1000,
        ts.bucket_ms / 1000
    );
    for series in &ts.series {
        series_line(&mut out, series);
    }

    let usage = &snapshot.token_usage;
    let _ = writeln!(out);
    let _ = writeln!(out, "Token usage:");
    if usage.rows.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    // Totals only with more than one model
    let totals = (usage.rows.len() > 1).then_some(&usage.totals);
    for row in usage.rows.iter().chain(totals) {
        let _ = writeln!(
            out,
            "  {:<40} in {:>9}  out {:>8}  reason {:>7}  cache r/w {:>9}/{:<8}  total {:>10}",
            truncate(&row.model, 40),
            row.input_tokens,
            row.output_tokens,
            row.reasoning_tokens,
            row.cache_read_tokens,
            row.cache_write_tokens,
            row.total_tokens,
        );
    }

    out.trim_end().to_string()
}

/// Render a tool-call listing.
pub fn tool_calls(payload: Option<&ToolCallsPayload>, now_ms: i64) -> String {
    let Some(payload) = payload else {
        return "No active session".to_string();
    };

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Tool calls for {} ({}{}):",
        payload.session_id,
        payload.calls.len(),
        if payload.truncated { ", truncated" } else { "" }
    );
    for call in &payload.calls {
        let _ = writeln!(
            out,
            "  {:<10} {:<10} {:<20} {}",
            format_relative_time_opt(Some(call.created_at_ms), now_ms),
            call.status.as_str(),
            truncate(&call.tool, 20),
            call.call_id
        );
    }
    out.trim_end().to_string()
}
