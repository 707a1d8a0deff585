// src/commands.rs

//! Operator subcommands: `status` and `upload <node>`.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agent::Agent;
use crate::errors::{Result, SnapdError};
use crate::jobs::JobOutcome;
use crate::store::Store;
use crate::types::TriggerType;
use crate::upload::UploadRecord;

/// Text report of running uploads, plus the last completed upload for each
/// configured node that is idle.
pub async fn status_report<'a>(
    store: &dyn Store,
    nodes: impl IntoIterator<Item = &'a str>,
    now: DateTime<Utc>,
) -> Result<String> {
    let running = store.get_all_running().await?;

    let mut latest = Vec::new();
    for node in nodes {
        if running.iter().any(|r| r.node_name == node) {
            continue;
        }
        if let Some(record) = store.get_latest_completed_for_node(node).await? {
            latest.push(record);
        }
    }

    Ok(render_status(&running, &latest, now))
}

pub fn render_status(running: &[UploadRecord], latest: &[UploadRecord], now: DateTime<Utc>) -> String {
    let mut out = String::new();

    if running.is_empty() {
        out.push_str("No active uploads\n");
    } else {
        let _ = writeln!(out, "Active uploads: {}", running.len());
        for r in running {
            out.push('\n');
            let _ = writeln!(out, "Node:       {}", r.node_name);
            let _ = writeln!(out, "  ID:       {}", r.id);
            let _ = writeln!(out, "  Started:  {}", r.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
            let _ = writeln!(out, "  Elapsed:  {}", format_elapsed(r.elapsed(now)));
            let _ = writeln!(out, "  Trigger:  {}", r.trigger_type);
            let _ = writeln!(out, "  Status:   {}", r.status);
            if let Some(p) = r.progress_percent {
                let _ = writeln!(out, "  Progress: {p:.2}%");
            }
            if let (Some(c), Some(t)) = (r.chunks_completed, r.chunks_total) {
                let _ = writeln!(out, "  Chunks:   {c}/{t}");
            }
        }
    }

    if !latest.is_empty() {
        out.push_str("\nLast completed:\n");
        for r in latest {
            let completed = r
                .completed_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  {}: #{} at {} ({})",
                r.node_name,
                r.id,
                completed,
                format_elapsed(r.elapsed(now))
            );
        }
    }

    out
}

/// `1h02m03s` style rendering, dropping leading zero units.
pub fn format_elapsed(d: chrono::Duration) -> String {
    let total = d.num_seconds().max(0);
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h{m:02}m{s:02}s")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}

/// Run the node upload workflow once with `trigger = manual`.
///
/// A skipped upload is an error here so the process exits non-zero.
pub async fn manual_upload(agent: &Agent, node: &str, cancel: &CancellationToken) -> Result<i64> {
    let job = agent.node_upload_job(node, TriggerType::Manual)?;
    match job.execute(cancel).await? {
        JobOutcome::Initiated(id) => {
            info!(node, upload_id = id, "manual upload initiated");
            Ok(id)
        }
        JobOutcome::Skipped => Err(SnapdError::UploadSkipped(node.to_string())),
    }
}
