// src/upload/manager.rs

//! Upload lifecycle coordination.
//!
//! [`UploadManager`] is the only component that drives the external tool
//! and writes upload rows. It reconciles three views of an upload: the
//! caller's intent, the database row, and what the tool reports.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::NodeSpec;
use crate::errors::{CommandError, Result, SnapdError};
use crate::exec::CommandRunner;
use crate::store::{Store, cancellable};
use crate::types::{TriggerType, UploadStatus};
use crate::upload::record::{NewUpload, ProtocolData, UploadPatch};
use crate::upload::snapshot::{UploadSnapshot, contains_not_running_sentinel, parse_upload_info};

/// Everything needed to create an upload row for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub node_name: String,
    pub protocol: String,
    pub node_type: String,
    pub trigger: TriggerType,
    pub protocol_data: ProtocolData,
}

impl UploadRequest {
    pub fn for_node(spec: &NodeSpec, trigger: TriggerType, protocol_data: ProtocolData) -> Self {
        Self {
            node_name: spec.name.clone(),
            protocol: spec.protocol.clone(),
            node_type: spec.node_type.clone(),
            trigger,
            protocol_data,
        }
    }
}

/// Result of reconciling one tracked upload against the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Still running; progress columns were refreshed.
    Running,
    /// Transitioned to `completed` on this call.
    Completed,
    /// Transitioned to `failed` on this call.
    Failed,
    /// The row was missing or already terminal; nothing was written.
    Unchanged,
}

impl ReconcileOutcome {
    /// True when this call moved the row into a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, ReconcileOutcome::Completed | ReconcileOutcome::Failed)
    }
}

pub struct UploadManager {
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn Store>,
    tool: String,
    nonzero_exit_is_failure: bool,
}

impl UploadManager {
    pub fn new(runner: Arc<dyn CommandRunner>, store: Arc<dyn Store>, tool: impl Into<String>) -> Self {
        Self {
            runner,
            store,
            tool: tool.into(),
            nonzero_exit_is_failure: false,
        }
    }

    /// Map terminal status lines carrying a non-zero exit code to `failed`.
    pub fn with_failure_policy(mut self, nonzero_exit_is_failure: bool) -> Self {
        self.nonzero_exit_is_failure = nonzero_exit_is_failure;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Whether a new upload for `node` must not be started right now.
    ///
    /// The database is consulted first; the tool is only asked when we have
    /// no running row of our own.
    pub async fn should_skip(&self, cancel: &CancellationToken, node: &str) -> Result<bool> {
        if let Some(existing) = cancellable(cancel, self.store.get_running_for_node(node)).await? {
            debug!(node, upload_id = existing.id, "running upload row exists; skipping");
            return Ok(true);
        }

        let snapshot = self.check_upload_status(cancel, node).await?;
        if snapshot.is_running {
            debug!(node, "external tool reports an upload in progress; skipping");
            return Ok(true);
        }

        Ok(false)
    }

    /// Ask the external tool for the live upload state of `node`.
    pub async fn check_upload_status(
        &self,
        cancel: &CancellationToken,
        node: &str,
    ) -> Result<UploadSnapshot> {
        let args = ["node", "job", node, "info", "upload"];
        match self.runner.run(cancel, &self.tool, &args).await {
            Ok(output) => Ok(parse_upload_info(&output.stdout)),
            Err(CommandError::Exit {
                code,
                stdout,
                stderr,
                ..
            }) if contains_not_running_sentinel(&stderr) || contains_not_running_sentinel(&stdout) => {
                debug!(node, exit_code = code, "no upload job known to the external tool");
                let raw = if stderr.trim().is_empty() { stdout } else { stderr };
                Ok(UploadSnapshot::not_running(raw.trim()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Start an upload with the external tool, then record it as running.
    ///
    /// Nothing is written if the tool fails. A [`StoreError::Conflict`]
    /// from the insert means another actor won the race for this node.
    ///
    /// [`StoreError::Conflict`]: crate::errors::StoreError::Conflict
    pub async fn initiate_upload_with_protocol_data(
        &self,
        cancel: &CancellationToken,
        request: UploadRequest,
    ) -> Result<i64> {
        if request.trigger == TriggerType::Discovered {
            return Err(SnapdError::ConfigError(format!(
                "node '{}': discovered uploads are recorded, not initiated",
                request.node_name
            )));
        }

        let args = ["node", "run", "upload", request.node_name.as_str()];
        self.runner.run(cancel, &self.tool, &args).await?;

        let node = request.node_name.clone();
        let trigger = request.trigger;
        let id = self.insert(cancel, request, None).await?;
        info!(node = %node, upload_id = id, %trigger, "upload initiated");
        Ok(id)
    }

    /// Record an upload that is already running on the host.
    ///
    /// `seed`, when given, supplies the start time and current progress
    /// reported by the tool.
    pub async fn create_upload_record(
        &self,
        cancel: &CancellationToken,
        request: UploadRequest,
        seed: Option<&UploadSnapshot>,
    ) -> Result<i64> {
        let node = request.node_name.clone();
        let trigger = request.trigger;
        let id = self.insert(cancel, request, seed).await?;
        info!(node = %node, upload_id = id, %trigger, "upload record created");
        Ok(id)
    }

    async fn insert(
        &self,
        cancel: &CancellationToken,
        request: UploadRequest,
        seed: Option<&UploadSnapshot>,
    ) -> Result<i64> {
        let now = Utc::now();
        let upload = NewUpload {
            node_name: request.node_name,
            protocol: request.protocol,
            node_type: request.node_type,
            started_at: seed.and_then(|s| s.started_at).unwrap_or(now),
            trigger_type: request.trigger,
            protocol_data: request.protocol_data,
            progress_percent: seed.and_then(|s| s.progress_percent),
            chunks_completed: seed.and_then(|s| s.chunks_completed),
            chunks_total: seed.and_then(|s| s.chunks_total),
            last_progress_check: seed.filter(|s| s.has_progress()).map(|_| now),
        };
        cancellable(cancel, self.store.create_upload(&upload)).await
    }

    /// Reconcile one tracked upload with the tool's live status.
    ///
    /// On error the row is left untouched and stays `running`.
    pub async fn monitor_upload_progress(
        &self,
        cancel: &CancellationToken,
        upload_id: i64,
        node: &str,
    ) -> Result<ReconcileOutcome> {
        let snapshot = self.check_upload_status(cancel, node).await?;
        let now = Utc::now();

        if snapshot.is_running {
            let patch = UploadPatch::progress(upload_id, &snapshot, now);
            let applied = cancellable(cancel, self.store.update_upload(&patch)).await?;
            if !applied {
                debug!(node, upload_id, "upload no longer running in store; progress not written");
                return Ok(ReconcileOutcome::Unchanged);
            }
            debug!(
                node,
                upload_id,
                progress = ?snapshot.progress_percent,
                chunks_completed = ?snapshot.chunks_completed,
                chunks_total = ?snapshot.chunks_total,
                "upload progress updated"
            );
            return Ok(ReconcileOutcome::Running);
        }

        let status = if self.nonzero_exit_is_failure && snapshot.exited_with_failure() {
            UploadStatus::Failed
        } else {
            UploadStatus::Completed
        };

        let patch = UploadPatch::finish(upload_id, status, now, &snapshot);
        let applied = cancellable(cancel, self.store.update_upload(&patch)).await?;
        if !applied {
            debug!(node, upload_id, "upload already terminal; nothing to do");
            return Ok(ReconcileOutcome::Unchanged);
        }

        match status {
            UploadStatus::Failed => {
                warn!(
                    node,
                    upload_id,
                    status_line = ?snapshot.raw_status_line,
                    "upload finished with non-zero exit code"
                );
                Ok(ReconcileOutcome::Failed)
            }
            _ => {
                info!(node, upload_id, total_chunks = ?snapshot.chunks_total, "upload completed");
                Ok(ReconcileOutcome::Completed)
            }
        }
    }
}
