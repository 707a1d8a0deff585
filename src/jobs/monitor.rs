// src/jobs/monitor.rs

//! Global monitor tick: discovery, then progress reconciliation.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::NodeSpec;
use crate::errors::Result;
use crate::jobs::notify::NotificationDispatcher;
use crate::notification::NotificationPayload;
use crate::protocol::ProtocolRegistry;
use crate::scheduler::Job;
use crate::store::cancellable;
use crate::types::{NotificationEvent, TriggerType};
use crate::upload::{ProtocolData, ReconcileOutcome, UploadManager, UploadRecord, UploadRequest};

/// Summary of one monitor tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
    /// `(node, upload_id)` for every upload discovered this tick.
    pub discovered: Vec<(String, i64)>,
    pub still_running: Vec<i64>,
    pub completed: Vec<i64>,
    pub failed: Vec<i64>,
    /// Subtasks that returned an error or panicked.
    pub errors: usize,
}

pub struct MonitorJob {
    nodes: Arc<BTreeMap<String, NodeSpec>>,
    manager: Arc<UploadManager>,
    protocols: Arc<ProtocolRegistry>,
    notifier: NotificationDispatcher,
}

enum Reconciled {
    Outcome(i64, ReconcileOutcome),
    Error,
}

impl MonitorJob {
    pub fn new(
        nodes: Arc<BTreeMap<String, NodeSpec>>,
        manager: Arc<UploadManager>,
        protocols: Arc<ProtocolRegistry>,
        notifier: NotificationDispatcher,
    ) -> Self {
        Self {
            nodes,
            manager,
            protocols,
            notifier,
        }
    }

    pub async fn execute(&self, cancel: &CancellationToken) -> Result<MonitorReport> {
        let records = cancellable(cancel, self.manager.store().get_all_running()).await?;
        let tracked: HashSet<&str> = records.iter().map(|r| r.node_name.as_str()).collect();

        let mut report = MonitorReport::default();

        self.discover(cancel, &tracked, &mut report).await;
        self.reconcile(cancel, records, &mut report).await;

        if !report.discovered.is_empty() || !report.completed.is_empty() || !report.failed.is_empty() {
            info!(
                discovered = report.discovered.len(),
                running = report.still_running.len(),
                completed = report.completed.len(),
                failed = report.failed.len(),
                errors = report.errors,
                "monitor tick finished"
            );
        } else {
            debug!(running = report.still_running.len(), errors = report.errors, "monitor tick finished");
        }
        Ok(report)
    }

    async fn discover(
        &self,
        cancel: &CancellationToken,
        tracked: &HashSet<&str>,
        report: &mut MonitorReport,
    ) {
        let mut tasks = JoinSet::new();

        for node in self.nodes.values() {
            if tracked.contains(node.name.as_str()) {
                continue;
            }
            let node = node.clone();
            let manager = self.manager.clone();
            let protocols = self.protocols.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let res = discover_node(&cancel, &node, &manager, &protocols).await;
                (node.name, res)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((node, Ok(Some(id)))) => report.discovered.push((node, id)),
                Ok((_, Ok(None))) => {}
                Ok((node, Err(err))) => {
                    report.errors += 1;
                    if err.is_cancelled() {
                        debug!(node = %node, "discovery cancelled");
                    } else {
                        warn!(node = %node, error = %err, "discovery failed");
                    }
                }
                Err(join_err) => {
                    report.errors += 1;
                    error!(error = %join_err, "discovery task panicked");
                }
            }
        }
    }

    async fn reconcile(
        &self,
        cancel: &CancellationToken,
        records: Vec<UploadRecord>,
        report: &mut MonitorReport,
    ) {
        let mut tasks = JoinSet::new();

        for record in records {
            let manager = self.manager.clone();
            let notifier = self.notifier.clone();
            let node = self.nodes.get(&record.node_name).cloned();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                reconcile_record(&cancel, record, node, &manager, &notifier).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Reconciled::Outcome(id, outcome)) => match outcome {
                    ReconcileOutcome::Running => report.still_running.push(id),
                    ReconcileOutcome::Completed => report.completed.push(id),
                    ReconcileOutcome::Failed => report.failed.push(id),
                    ReconcileOutcome::Unchanged => {}
                },
                Ok(Reconciled::Error) => report.errors += 1,
                Err(join_err) => {
                    report.errors += 1;
                    error!(error = %join_err, "reconciliation task panicked");
                }
            }
        }
    }
}

/// Record an upload the tool is running but we are not tracking.
async fn discover_node(
    cancel: &CancellationToken,
    node: &NodeSpec,
    manager: &UploadManager,
    protocols: &ProtocolRegistry,
) -> Result<Option<i64>> {
    let snapshot = manager.check_upload_status(cancel, &node.name).await?;
    if !snapshot.is_running {
        return Ok(None);
    }

    let protocol_data = match protocols.get(&node.protocol) {
        Ok(module) => match module.collect_metrics(cancel, node).await {
            Ok(data) => data,
            Err(err) => {
                debug!(node = %node.name, error = %err, "metrics unavailable for discovered upload");
                ProtocolData::new()
            }
        },
        Err(_) => ProtocolData::new(),
    };

    let request = UploadRequest::for_node(node, TriggerType::Discovered, protocol_data);
    match manager
        .create_upload_record(cancel, request, Some(&snapshot))
        .await
    {
        Ok(id) => {
            info!(node = %node.name, upload_id = id, "discovered running upload");
            Ok(Some(id))
        }
        Err(err) if err.is_conflict() => {
            debug!(node = %node.name, "upload was recorded concurrently; discovery skipped");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

async fn reconcile_record(
    cancel: &CancellationToken,
    record: UploadRecord,
    node: Option<NodeSpec>,
    manager: &UploadManager,
    notifier: &NotificationDispatcher,
) -> Reconciled {
    let outcome = match manager
        .monitor_upload_progress(cancel, record.id, &record.node_name)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            if err.is_cancelled() {
                debug!(node = %record.node_name, upload_id = record.id, "reconciliation cancelled");
            } else {
                warn!(node = %record.node_name, upload_id = record.id, error = %err, "reconciliation failed");
            }
            return Reconciled::Error;
        }
    };

    let event = match outcome {
        ReconcileOutcome::Completed => Some(NotificationEvent::Complete),
        ReconcileOutcome::Failed => Some(NotificationEvent::Failure),
        ReconcileOutcome::Running | ReconcileOutcome::Unchanged => None,
    };

    if let Some(event) = event {
        match &node {
            Some(node) => {
                let payload = finished_payload(event, &record, manager, cancel).await;
                notifier
                    .dispatch(cancel, node.notifications.as_ref(), &payload)
                    .await;
            }
            None => {
                debug!(node = %record.node_name, "node no longer configured; no notification sent");
            }
        }
    }

    Reconciled::Outcome(record.id, outcome)
}

/// Build the notification for a finished upload from its stored row.
async fn finished_payload(
    event: NotificationEvent,
    record: &UploadRecord,
    manager: &UploadManager,
    cancel: &CancellationToken,
) -> NotificationPayload {
    // The stored row carries the final totals; fall back to what we had.
    let finished = cancellable(cancel, manager.store().get_upload(record.id))
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| record.clone());

    let message = match event {
        NotificationEvent::Failure => format!("Upload for node {} finished with an error", finished.node_name),
        _ => format!("Upload for node {} completed", finished.node_name),
    };

    let elapsed = finished.elapsed(chrono::Utc::now());
    let mut payload = NotificationPayload::new(event, &finished.node_name, message)
        .with_detail("upload_id", finished.id)
        .with_detail("protocol", finished.protocol.as_str())
        .with_detail("trigger", finished.trigger_type.as_str())
        .with_detail("duration_secs", elapsed.num_seconds());
    if let Some(total) = finished.total_chunks {
        payload = payload.with_detail("total_chunks", total);
    }
    if let Some(message) = finished.error_message.as_deref().or(finished.completion_message.as_deref()) {
        payload = payload.with_detail("status", message);
    }
    payload
}

#[async_trait]
impl Job for MonitorJob {
    fn name(&self) -> &str {
        "monitor"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.execute(&cancel).await.map(|_| ())
    }
}
