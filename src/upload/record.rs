// src/upload/record.rs

//! Persisted upload rows and the partial updates applied to them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{TriggerType, UploadStatus};
use crate::upload::snapshot::UploadSnapshot;

/// Opaque blockchain state captured when an upload starts.
pub type ProtocolData = serde_json::Map<String, serde_json::Value>;

/// One upload run as stored in the `uploads` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRecord {
    pub id: i64,
    pub node_name: String,
    pub protocol: String,
    pub node_type: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: UploadStatus,
    pub trigger_type: TriggerType,
    pub protocol_data: ProtocolData,
    pub progress_percent: Option<f64>,
    pub chunks_completed: Option<i64>,
    pub chunks_total: Option<i64>,
    pub last_progress_check: Option<DateTime<Utc>>,
    pub total_chunks: Option<i64>,
    pub completion_message: Option<String>,
    pub error_message: Option<String>,
}

impl UploadRecord {
    /// Time between start and completion, or between start and `now` while
    /// the upload is still running.
    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.completed_at.unwrap_or(now) - self.started_at
    }
}

/// Values for a freshly created row. The store always inserts it as
/// `running` with no completion fields.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUpload {
    pub node_name: String,
    pub protocol: String,
    pub node_type: String,
    pub started_at: DateTime<Utc>,
    pub trigger_type: TriggerType,
    pub protocol_data: ProtocolData,
    pub progress_percent: Option<f64>,
    pub chunks_completed: Option<i64>,
    pub chunks_total: Option<i64>,
    pub last_progress_check: Option<DateTime<Utc>>,
}

/// Partial update for an existing row. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadPatch {
    pub id: i64,
    pub status: Option<UploadStatus>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress_percent: Option<f64>,
    pub chunks_completed: Option<i64>,
    pub chunks_total: Option<i64>,
    pub last_progress_check: Option<DateTime<Utc>>,
    pub total_chunks: Option<i64>,
    pub completion_message: Option<String>,
    pub error_message: Option<String>,
}

impl UploadPatch {
    /// Progress-only patch built from a live snapshot.
    pub fn progress(id: i64, snapshot: &UploadSnapshot, checked_at: DateTime<Utc>) -> Self {
        Self {
            id,
            progress_percent: snapshot.progress_percent,
            chunks_completed: snapshot.chunks_completed,
            chunks_total: snapshot.chunks_total,
            last_progress_check: Some(checked_at),
            ..Self::default()
        }
    }

    /// Terminal patch moving the row out of `running`.
    pub fn finish(
        id: i64,
        status: UploadStatus,
        completed_at: DateTime<Utc>,
        snapshot: &UploadSnapshot,
    ) -> Self {
        let message = snapshot.completion_message().map(str::to_string);
        let error_message = match status {
            UploadStatus::Failed => message.clone(),
            _ => None,
        };
        Self {
            id,
            status: Some(status),
            completed_at: Some(completed_at),
            progress_percent: snapshot.progress_percent,
            chunks_completed: snapshot.chunks_completed,
            chunks_total: snapshot.chunks_total,
            last_progress_check: Some(completed_at),
            total_chunks: snapshot.chunks_total,
            completion_message: message,
            error_message,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(UploadStatus::is_terminal)
    }

    pub fn has_progress(&self) -> bool {
        self.progress_percent.is_some()
            || self.chunks_completed.is_some()
            || self.chunks_total.is_some()
    }

    /// Reject patches that would leave the row inconsistent.
    pub fn validate(&self) -> Result<(), String> {
        match (self.status, self.completed_at) {
            (Some(UploadStatus::Running), _) => {
                return Err("a patch cannot move an upload back to running".to_string());
            }
            (Some(_), None) => {
                return Err("a terminal status requires completed_at".to_string());
            }
            (None, Some(_)) => {
                return Err("completed_at can only be set together with a terminal status".to_string());
            }
            _ => {}
        }

        if let Some(p) = self.progress_percent
            && !(p.is_finite() && (0.0..=100.0).contains(&p))
        {
            return Err(format!("progress_percent out of range: {p}"));
        }

        if let (Some(c), Some(t)) = (self.chunks_completed, self.chunks_total)
            && c > t
        {
            return Err(format!("chunks_completed ({c}) exceeds chunks_total ({t})"));
        }

        Ok(())
    }
}
