// src/jobs/node_upload.rs

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::NodeSpec;
use crate::errors::{Result, SnapdError};
use crate::jobs::notify::NotificationDispatcher;
use crate::notification::NotificationPayload;
use crate::protocol::{MetricsError, ProtocolRegistry};
use crate::scheduler::Job;
use crate::types::{NotificationEvent, TriggerType};
use crate::upload::{ProtocolData, UploadManager, UploadRequest};

/// What one node tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Initiated(i64),
    /// An upload was already running, or another actor created one first.
    Skipped,
}

/// Per-node tick: skip check, metrics, start, notify.
pub struct NodeUploadJob {
    name: String,
    node: NodeSpec,
    trigger: TriggerType,
    manager: Arc<UploadManager>,
    protocols: Arc<ProtocolRegistry>,
    notifier: NotificationDispatcher,
}

impl NodeUploadJob {
    pub fn new(
        node: NodeSpec,
        manager: Arc<UploadManager>,
        protocols: Arc<ProtocolRegistry>,
        notifier: NotificationDispatcher,
    ) -> Self {
        Self {
            name: format!("upload:{}", node.name),
            node,
            trigger: TriggerType::Scheduled,
            manager,
            protocols,
            notifier,
        }
    }

    /// Use `trigger` for rows this job creates (`scheduled` by default).
    pub fn with_trigger(mut self, trigger: TriggerType) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn node(&self) -> &NodeSpec {
        &self.node
    }

    pub async fn execute(&self, cancel: &CancellationToken) -> Result<JobOutcome> {
        let node = self.node.name.as_str();

        let skip = match self.manager.should_skip(cancel, node).await {
            Ok(skip) => skip,
            Err(err) => {
                self.notify_failure(cancel, "Upload skip check failed", &err).await;
                return Err(err);
            }
        };
        if skip {
            info!(node, "upload already in progress; skipping");
            self.notify_skip(cancel, "Upload skipped: an upload is already running for this node")
                .await;
            return Ok(JobOutcome::Skipped);
        }

        let protocol_data = self.collect_protocol_data(cancel).await?;
        let request = UploadRequest::for_node(&self.node, self.trigger, protocol_data);

        match self
            .manager
            .initiate_upload_with_protocol_data(cancel, request)
            .await
        {
            Ok(id) => Ok(JobOutcome::Initiated(id)),
            Err(err) if err.is_conflict() => {
                info!(node, "another upload for this node was recorded first; skipping");
                self.notify_skip(cancel, "Upload skipped: another upload for this node started first")
                    .await;
                Ok(JobOutcome::Skipped)
            }
            Err(err) => {
                self.notify_failure(cancel, "Upload initiation failed", &err).await;
                Err(err)
            }
        }
    }

    /// Metrics for the node's protocol, or `{error: ...}` if they cannot be
    /// collected. Only cancellation aborts the tick.
    async fn collect_protocol_data(&self, cancel: &CancellationToken) -> Result<ProtocolData> {
        let collected = match self.protocols.get(&self.node.protocol) {
            Ok(module) => module.collect_metrics(cancel, &self.node).await,
            Err(err) => Err(err),
        };

        match collected {
            Ok(data) => Ok(data),
            Err(MetricsError::Cancelled) => Err(SnapdError::Cancelled),
            Err(err) => {
                warn!(node = %self.node.name, protocol = %self.node.protocol, error = %err, "metric collection failed; continuing");
                let mut data = ProtocolData::new();
                data.insert("error".to_string(), Value::String(err.to_string()));
                Ok(data)
            }
        }
    }

    async fn notify_skip(&self, cancel: &CancellationToken, message: &str) {
        let payload = NotificationPayload::new(NotificationEvent::Skip, &self.node.name, message)
            .with_detail("protocol", self.node.protocol.as_str())
            .with_detail("trigger", self.trigger.as_str());
        self.notifier
            .dispatch(cancel, self.node.notifications.as_ref(), &payload)
            .await;
    }

    async fn notify_failure(&self, cancel: &CancellationToken, message: &str, err: &SnapdError) {
        if err.is_cancelled() {
            return;
        }
        let payload = NotificationPayload::new(NotificationEvent::Failure, &self.node.name, message)
            .with_detail("protocol", self.node.protocol.as_str())
            .with_detail("trigger", self.trigger.as_str())
            .with_detail("error", err.to_string());
        self.notifier
            .dispatch(cancel, self.node.notifications.as_ref(), &payload)
            .await;
    }
}

#[async_trait]
impl Job for NodeUploadJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.execute(&cancel).await.map(|_| ())
    }
}
