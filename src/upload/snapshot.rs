// src/upload/snapshot.rs

//! Parser for the external tool's `info upload` output.
//!
//! The tool prints a block of `key: value` lines, for example:
//!
//! ```text
//! status:           2025-12-07 13:41:43 UTC| Finished with exit code 0 and message `...`
//! progress:         100.00% (3248/3248 multi-client upload completed)
//! restart_count:    0
//! upgrade_blocking: true
//! logs:             <empty>
//! ```
//!
//! Parsing never fails: a line that cannot be understood simply leaves its
//! field unset.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

/// Substrings (lowercase) meaning "no upload job exists on this node".
const NOT_RUNNING_SENTINELS: &[&str] = &[
    "no job",
    "no upload",
    "not found",
    "job 'upload' not found",
    "unknown status",
    "job_status failed",
];

/// Status words that mark a finished job. Checked after "running".
const TERMINAL_WORDS: &[&str] = &["finished", "completed", "failed", "exit code", "unknown", "error"];

static TIMESTAMPED_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\s*UTC\s*\|\s*(.*)$").expect("valid regex")
});

static EXIT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)exit code\s+(-?\d+)").expect("valid regex"));

static CHUNKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*(\d+)\s*/\s*(\d+)").expect("valid regex"));

/// Point-in-time view of the external upload job for one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadSnapshot {
    pub is_running: bool,
    /// Value of the `status:` line, verbatim.
    pub raw_status_line: Option<String>,
    /// Start time embedded in the status line, when present.
    pub started_at: Option<DateTime<Utc>>,
    /// Exit code mentioned in the status line (`... exit code N ...`).
    pub exit_code: Option<i32>,
    pub progress_percent: Option<f64>,
    pub chunks_completed: Option<i64>,
    pub chunks_total: Option<i64>,
    pub restart_count: Option<String>,
    pub upgrade_blocking: Option<String>,
    pub logs: Option<String>,
    pub raw_output: String,
}

impl UploadSnapshot {
    /// Snapshot for a node with no upload job, keeping whatever the tool said.
    pub fn not_running(raw_output: impl Into<String>) -> Self {
        Self {
            raw_output: raw_output.into(),
            ..Self::default()
        }
    }

    /// Message recorded when the job is seen to have ended.
    pub fn completion_message(&self) -> Option<&str> {
        self.raw_status_line.as_deref()
    }

    pub fn has_progress(&self) -> bool {
        self.progress_percent.is_some()
            || self.chunks_completed.is_some()
            || self.chunks_total.is_some()
    }

    /// True when the status line reports a non-zero exit code.
    pub fn exited_with_failure(&self) -> bool {
        matches!(self.exit_code, Some(code) if code != 0)
    }
}

/// True if the text contains any "job does not exist" sentinel.
pub fn contains_not_running_sentinel(text: &str) -> bool {
    let lower = text.to_lowercase();
    NOT_RUNNING_SENTINELS.iter().any(|s| lower.contains(s))
}

/// Parse the stdout of `info upload` into an [`UploadSnapshot`].
pub fn parse_upload_info(output: &str) -> UploadSnapshot {
    let trimmed = output.trim();

    if trimmed.is_empty() || contains_not_running_sentinel(trimmed) {
        return UploadSnapshot::not_running(trimmed);
    }

    let mut snapshot = UploadSnapshot {
        raw_output: trimmed.to_string(),
        ..UploadSnapshot::default()
    };

    for line in trimmed.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim().to_lowercase().as_str() {
            "status" => apply_status(&mut snapshot, value),
            "progress" => apply_progress(&mut snapshot, value),
            "restart_count" => snapshot.restart_count = Some(value.to_string()),
            "upgrade_blocking" => snapshot.upgrade_blocking = Some(value.to_string()),
            "logs" => snapshot.logs = Some(value.to_string()),
            _ => {}
        }
    }

    snapshot
}

fn apply_status(snapshot: &mut UploadSnapshot, value: &str) {
    snapshot.raw_status_line = Some(value.to_string());

    let status_text = match TIMESTAMPED_STATUS.captures(value) {
        Some(caps) => {
            snapshot.started_at = NaiveDateTime::parse_from_str(&caps[1], "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc());
            caps.get(2).map(|m| m.as_str()).unwrap_or_default()
        }
        None => value,
    };

    snapshot.exit_code = EXIT_CODE
        .captures(status_text)
        .and_then(|caps| caps[1].parse().ok());

    let lower = status_text.to_lowercase();
    if lower.contains("running") {
        snapshot.is_running = true;
    } else if TERMINAL_WORDS.iter().any(|w| lower.contains(w)) {
        snapshot.is_running = false;
    }
}

fn apply_progress(snapshot: &mut UploadSnapshot, value: &str) {
    if let Some((percent, _)) = value.split_once('%') {
        snapshot.progress_percent = parse_percent(percent);
    }

    if let Some(caps) = CHUNKS.captures(value) {
        let completed = caps[1].parse::<i64>().ok();
        let total = caps[2].parse::<i64>().ok();
        // Counts are kept only as a consistent pair.
        if let (Some(c), Some(t)) = (completed, total)
            && c <= t
        {
            snapshot.chunks_completed = Some(c);
            snapshot.chunks_total = Some(t);
        }
    }
}

/// Convert a percent string such as `" 25.00%"` into a number in `0..=100`.
///
/// Anything that is not a finite number in range is treated as unset.
pub fn parse_percent(s: &str) -> Option<f64> {
    let s = s.trim();
    let s = s.strip_suffix('%').unwrap_or(s).trim();
    let value: f64 = s.parse().ok()?;
    (value.is_finite() && (0.0..=100.0).contains(&value)).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FINISHED: &str = "\
status:           2025-12-07 13:41:43 UTC| Finished with exit code 0 and message `Upload completed`
progress:         100.00% (3248/3248 multi-client upload completed)
restart_count:    0
upgrade_blocking: true
logs:             <empty>";

    #[test]
    fn empty_output_is_not_running() {
        let snap = parse_upload_info("");
        assert!(!snap.is_running);
        assert_eq!(snap, UploadSnapshot::default());
    }

    #[test]
    fn running_without_progress_line() {
        let snap = parse_upload_info("status: Running\n");
        assert!(snap.is_running);
        assert_eq!(snap.progress_percent, None);
        assert_eq!(snap.chunks_completed, None);
        assert_eq!(snap.chunks_total, None);
    }

    #[test]
    fn finished_output_is_parsed() {
        let snap = parse_upload_info(FINISHED);
        assert!(!snap.is_running);
        assert_eq!(snap.progress_percent, Some(100.0));
        assert_eq!(snap.chunks_completed, Some(3248));
        assert_eq!(snap.chunks_total, Some(3248));
        assert_eq!(snap.exit_code, Some(0));
        assert_eq!(snap.restart_count.as_deref(), Some("0"));
        assert_eq!(snap.upgrade_blocking.as_deref(), Some("true"));
        assert_eq!(snap.logs.as_deref(), Some("<empty>"));
        let started = snap.started_at.expect("timestamp parsed");
        assert_eq!(started.to_rfc3339(), "2025-12-07T13:41:43+00:00");
        assert!(
            snap.completion_message()
                .is_some_and(|m| m.contains("Finished with exit code 0"))
        );
    }

    #[test]
    fn fractional_progress_is_extracted() {
        let snap = parse_upload_info("status: Running\nprogress: 0.18% (6/3252 uploading)");
        assert!(snap.is_running);
        assert_eq!(snap.progress_percent, Some(0.18));
        assert_eq!(snap.chunks_completed, Some(6));
        assert_eq!(snap.chunks_total, Some(3252));
    }

    #[test]
    fn line_order_does_not_matter() {
        let a = parse_upload_info("status: Running\nprogress: 50.00% (100/200 uploading)");
        let b = parse_upload_info("progress: 50.00% (100/200 uploading)\nstatus: Running");
        assert_eq!(a.is_running, b.is_running);
        assert_eq!(a.progress_percent, b.progress_percent);
        assert_eq!(a.chunks_completed, b.chunks_completed);
        assert_eq!(a.chunks_total, b.chunks_total);
    }

    #[test]
    fn sentinels_short_circuit() {
        for text in [
            "Job 'upload' not found",
            "error: unknown status",
            "JOB_STATUS FAILED",
            "no upload configured",
        ] {
            let snap = parse_upload_info(text);
            assert!(!snap.is_running, "{text}");
            assert_eq!(snap.raw_output, text);
            assert!(!snap.has_progress());
        }
    }

    #[test]
    fn unknown_status_text_keeps_default() {
        let snap = parse_upload_info("status: Pending\nprogress: 1.00% (1/100)");
        assert!(!snap.is_running);
        assert_eq!(snap.chunks_total, Some(100));
    }

    #[test]
    fn garbage_progress_is_left_unset() {
        let snap = parse_upload_info("status: Running\nprogress: NaN% (abc/def)");
        assert!(snap.is_running);
        assert_eq!(snap.progress_percent, None);
        assert_eq!(snap.chunks_completed, None);
    }

    #[test]
    fn inconsistent_chunk_counts_are_dropped() {
        let snap = parse_upload_info("status: Running\nprogress: 10.00% (300/200)");
        assert_eq!(snap.progress_percent, Some(10.0));
        assert_eq!(snap.chunks_completed, None);
        assert_eq!(snap.chunks_total, None);
    }

    #[test]
    fn one_sided_chunk_overflow_drops_both_counts() {
        let snap = parse_upload_info("status: Running\nprogress: 0.01% (5/99999999999999999999)");
        assert_eq!(snap.progress_percent, Some(0.01));
        assert_eq!(snap.chunks_completed, None);
        assert_eq!(snap.chunks_total, None);

        let snap = parse_upload_info("status: Running\nprogress: 0.01% (99999999999999999999/5)");
        assert_eq!(snap.chunks_completed, None);
        assert_eq!(snap.chunks_total, None);
    }

    #[test]
    fn nonzero_exit_code_is_detected() {
        let snap = parse_upload_info("status: 2025-12-07 13:41:43 UTC| Finished with exit code 2");
        assert!(!snap.is_running);
        assert!(snap.exited_with_failure());
    }

    #[test]
    fn percent_conversion() {
        assert_eq!(parse_percent(" 25.00% "), Some(25.0));
        assert_eq!(parse_percent("100"), Some(100.0));
        assert_eq!(parse_percent("inf"), None);
        assert_eq!(parse_percent("101"), None);
        assert_eq!(parse_percent(""), None);
    }
}
