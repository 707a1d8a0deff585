use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use snapd::config::NodeSpec;
use snapd::notification::{NotificationError, NotificationPayload, Notifier};
use snapd::protocol::{MetricsError, ProtocolModule};
use snapd::types::NotificationEvent;
use snapd::upload::ProtocolData;
use tokio_util::sync::CancellationToken;

/// Notifier that keeps every payload it is asked to send.
pub struct RecordingNotifier {
    name: String,
    fail: bool,
    sent: Mutex<Vec<(String, NotificationPayload)>>,
}

impl RecordingNotifier {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Records the payload, then reports a delivery failure.
    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn payloads(&self) -> Vec<NotificationPayload> {
        self.sent.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.sent.lock().unwrap().iter().map(|(_, p)| p.event).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        _cancel: &CancellationToken,
        url: &str,
        payload: &NotificationPayload,
    ) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));
        if self.fail {
            return Err(NotificationError::Status {
                transport: self.name.clone(),
                status: 500,
            });
        }
        Ok(())
    }
}

/// Protocol module answering with fixed metrics.
pub struct StaticMetrics {
    name: String,
    data: ProtocolData,
}

impl StaticMetrics {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data: ProtocolData::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

#[async_trait]
impl ProtocolModule for StaticMetrics {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect_metrics(
        &self,
        cancel: &CancellationToken,
        _node: &NodeSpec,
    ) -> Result<ProtocolData, MetricsError> {
        if cancel.is_cancelled() {
            return Err(MetricsError::Cancelled);
        }
        Ok(self.data.clone())
    }
}

/// Protocol module whose endpoint always looks broken.
pub struct FailingMetrics {
    name: String,
}

impl FailingMetrics {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ProtocolModule for FailingMetrics {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect_metrics(
        &self,
        _cancel: &CancellationToken,
        node: &NodeSpec,
    ) -> Result<ProtocolData, MetricsError> {
        Err(MetricsError::Decode {
            endpoint: node.url.clone(),
            reason: "connection refused".to_string(),
        })
    }
}
